// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Augmented AVL map.
//!
//! Every node caches an aggregate computed from its own entry and the
//! aggregates of its two children. Each mutation recomputes the aggregates
//! on the path from the changed node to the root only, so
//! [`AugTree::root_aggregate`] is always an O(1) read of a correct value.

use std::cmp::Ordering;
use std::fmt;

/// Bottom-up aggregate computation for an [`AugTree`].
pub trait Augment<K, V> {
    type Agg: Clone + fmt::Debug;

    /// Aggregate of a node from its entry and its children's aggregates.
    fn augment(key: &K, value: &V, left: Option<&Self::Agg>, right: Option<&Self::Agg>)
        -> Self::Agg;
}

/// Trees without an aggregate.
#[derive(Debug)]
pub struct NoAugment;

impl<K, V> Augment<K, V> for NoAugment {
    type Agg = ();

    fn augment(_: &K, _: &V, _: Option<&()>, _: Option<&()>) {}
}

type Link<K, V, A> = Option<Box<Node<K, V, A>>>;

struct Node<K, V, A: Augment<K, V>> {
    key: K,
    value: V,
    height: u8,
    agg: A::Agg,
    left: Link<K, V, A>,
    right: Link<K, V, A>,
}

impl<K, V, A: Augment<K, V>> Node<K, V, A> {
    fn leaf(key: K, value: V) -> Box<Self> {
        let agg = A::augment(&key, &value, None, None);
        Box::new(Node {
            key,
            value,
            height: 1,
            agg,
            left: None,
            right: None,
        })
    }

    fn refresh(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        self.agg = A::augment(
            &self.key,
            &self.value,
            self.left.as_ref().map(|n| &n.agg),
            self.right.as_ref().map(|n| &n.agg),
        );
    }
}

fn height<K, V, A: Augment<K, V>>(link: &Link<K, V, A>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn rotate_right<K, V, A: Augment<K, V>>(mut n: Box<Node<K, V, A>>) -> Box<Node<K, V, A>> {
    let Some(mut l) = n.left.take() else {
        return n;
    };
    n.left = l.right.take();
    n.refresh();
    l.right = Some(n);
    l.refresh();
    l
}

fn rotate_left<K, V, A: Augment<K, V>>(mut n: Box<Node<K, V, A>>) -> Box<Node<K, V, A>> {
    let Some(mut r) = n.right.take() else {
        return n;
    };
    n.right = r.left.take();
    n.refresh();
    r.left = Some(n);
    r.refresh();
    r
}

fn rebalance<K, V, A: Augment<K, V>>(mut n: Box<Node<K, V, A>>) -> Box<Node<K, V, A>> {
    n.refresh();
    let bf = i16::from(height(&n.left)) - i16::from(height(&n.right));
    if bf > 1 {
        if let Some(l) = n.left.take() {
            let l = if height(&l.left) < height(&l.right) {
                rotate_left(l)
            } else {
                l
            };
            n.left = Some(l);
        }
        rotate_right(n)
    } else if bf < -1 {
        if let Some(r) = n.right.take() {
            let r = if height(&r.right) < height(&r.left) {
                rotate_right(r)
            } else {
                r
            };
            n.right = Some(r);
        }
        rotate_left(n)
    } else {
        n
    }
}

fn insert<K: Ord, V, A: Augment<K, V>>(
    link: Link<K, V, A>,
    key: K,
    value: V,
) -> (Box<Node<K, V, A>>, Option<V>) {
    let Some(mut n) = link else {
        return (Node::leaf(key, value), None);
    };
    match key.cmp(&n.key) {
        Ordering::Equal => (n, Some(value)),
        Ordering::Less => {
            let (child, rejected) = insert(n.left.take(), key, value);
            n.left = Some(child);
            if rejected.is_some() {
                return (n, rejected);
            }
            (rebalance(n), None)
        }
        Ordering::Greater => {
            let (child, rejected) = insert(n.right.take(), key, value);
            n.right = Some(child);
            if rejected.is_some() {
                return (n, rejected);
            }
            (rebalance(n), None)
        }
    }
}

fn remove_min<K, V, A: Augment<K, V>>(
    mut n: Box<Node<K, V, A>>,
) -> (Link<K, V, A>, Box<Node<K, V, A>>) {
    match n.left.take() {
        None => {
            let rest = n.right.take();
            (rest, n)
        }
        Some(l) => {
            let (rest, min) = remove_min(l);
            n.left = rest;
            (Some(rebalance(n)), min)
        }
    }
}

fn remove<K: Ord, V, A: Augment<K, V>>(
    link: Link<K, V, A>,
    key: &K,
) -> (Link<K, V, A>, Option<(K, V)>) {
    let Some(mut n) = link else {
        return (None, None);
    };
    match key.cmp(&n.key) {
        Ordering::Less => {
            let (child, removed) = remove(n.left.take(), key);
            n.left = child;
            if removed.is_none() {
                return (Some(n), None);
            }
            (Some(rebalance(n)), removed)
        }
        Ordering::Greater => {
            let (child, removed) = remove(n.right.take(), key);
            n.right = child;
            if removed.is_none() {
                return (Some(n), None);
            }
            (Some(rebalance(n)), removed)
        }
        Ordering::Equal => {
            let Node {
                key, value, left, right, ..
            } = *n;
            let replacement = match (left, right) {
                (None, r) => r,
                (l, None) => l,
                (Some(l), Some(r)) => {
                    let (rest, mut min) = remove_min(r);
                    min.left = Some(l);
                    min.right = rest;
                    Some(rebalance(min))
                }
            };
            (replacement, Some((key, value)))
        }
    }
}

fn update<K: Ord, V, A: Augment<K, V>, R>(
    link: &mut Link<K, V, A>,
    key: &K,
    f: impl FnOnce(&mut V) -> R,
) -> Option<R> {
    let n = link.as_mut()?;
    let r = match key.cmp(&n.key) {
        Ordering::Less => update(&mut n.left, key, f)?,
        Ordering::Greater => update(&mut n.right, key, f)?,
        Ordering::Equal => f(&mut n.value),
    };
    n.refresh();
    Some(r)
}

fn for_each_mut<K, V, A: Augment<K, V>>(link: &mut Link<K, V, A>, f: &mut impl FnMut(&K, &mut V)) {
    if let Some(n) = link.as_mut() {
        for_each_mut(&mut n.left, f);
        f(&n.key, &mut n.value);
        for_each_mut(&mut n.right, f);
        n.refresh();
    }
}

fn drain_into<K, V, A: Augment<K, V>>(link: Link<K, V, A>, out: &mut Vec<(K, V)>) {
    if let Some(n) = link {
        let Node {
            key, value, left, right, ..
        } = *n;
        drain_into(left, out);
        out.push((key, value));
        drain_into(right, out);
    }
}

/// Ordered map with per-node cached aggregates.
pub struct AugTree<K, V, A: Augment<K, V> = NoAugment> {
    root: Link<K, V, A>,
    len: usize,
}

impl<K: Ord, V, A: Augment<K, V>> AugTree<K, V, A> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert; if `key` is already present the tree is unchanged and the
    /// value is handed back.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), V> {
        let (root, rejected) = insert(self.root.take(), key, value);
        self.root = Some(root);
        match rejected {
            Some(v) => Err(v),
            None => {
                self.len += 1;
                Ok(())
            }
        }
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (root, removed) = remove(self.root.take(), key);
        self.root = root;
        removed.map(|(_, v)| {
            self.len -= 1;
            v
        })
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut cur = &self.root;
        while let Some(n) = cur {
            match key.cmp(&n.key) {
                Ordering::Equal => return Some(&n.value),
                Ordering::Less => cur = &n.left,
                Ordering::Greater => cur = &n.right,
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Mutate the value under `key` and refresh the aggregates on its path.
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        update(&mut self.root, key, f)
    }

    /// Mutate every value, then refresh every aggregate.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&K, &mut V)) {
        for_each_mut(&mut self.root, &mut f);
    }

    /// Cached aggregate of the whole tree; `None` when empty.
    pub fn root_aggregate(&self) -> Option<&A::Agg> {
        self.root.as_ref().map(|n| &n.agg)
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut n = self.root.as_ref()?;
        while let Some(l) = n.left.as_ref() {
            n = l;
        }
        Some((&n.key, &n.value))
    }

    /// Smallest entry with a key strictly greater than `key`.
    pub fn successor(&self, key: &K) -> Option<(&K, &V)> {
        let mut cur = &self.root;
        let mut best = None;
        while let Some(n) = cur {
            if n.key > *key {
                best = Some((&n.key, &n.value));
                cur = &n.left;
            } else {
                cur = &n.right;
            }
        }
        best
    }

    /// In-order iterator.
    pub fn iter(&self) -> Iter<'_, K, V, A> {
        let mut it = Iter { stack: Vec::new() };
        it.push_left(&self.root);
        it
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Remove every entry, returning them in key order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len);
        drain_into(self.root.take(), &mut out);
        self.len = 0;
        out
    }

    #[cfg(test)]
    pub(crate) fn height(&self) -> u8 {
        height(&self.root)
    }
}

impl<K: Ord, V, A: Augment<K, V>> Default for AugTree<K, V, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug, A: Augment<K, V>> fmt::Debug for AugTree<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over an [`AugTree`].
pub struct Iter<'a, K, V, A: Augment<K, V>> {
    stack: Vec<&'a Node<K, V, A>>,
}

impl<'a, K, V, A: Augment<K, V>> Iter<'a, K, V, A> {
    fn push_left(&mut self, mut link: &'a Link<K, V, A>) {
        while let Some(n) = link {
            self.stack.push(n);
            link = &n.left;
        }
    }
}

impl<'a, K, V, A: Augment<K, V>> Iterator for Iter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        self.push_left(&n.right);
        Some((&n.key, &n.value))
    }
}
