// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity status events.
//!
//! Status changes are delivered as a sum type through a [`StatusListener`].
//! Listeners are always invoked without any entity lock held. Deletion is
//! reported as an explicit [`StatusEvent::Deleted`] and is the last event an
//! entity ever delivers.

use std::fmt;
use std::sync::Arc;

use crate::guid::GUID;

/// Publication matched status (writer side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<GUID>,
}

/// Subscription matched status (reader side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched publication.
    pub last_publication_handle: Option<GUID>,
}

/// Direction of a liveliness transition observed by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivelinessTransition {
    NotAliveToAlive,
    AliveToNotAlive,
    /// New match with an alive writer.
    AliveFromNone,
    /// Alive writer unmatched.
    AliveToNone,
    /// Not-alive writer unmatched.
    NotAliveToNone,
}

/// Liveliness changed status (reader side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    pub alive_count: u32,
    pub alive_count_change: i32,
    pub not_alive_count: u32,
    pub not_alive_count_change: i32,
    /// GUID of the last publication to change liveliness.
    pub last_publication_handle: Option<GUID>,
}

impl LivelinessChangedStatus {
    /// Apply one transition, resetting the `*_change` fields first.
    pub fn apply(&mut self, writer: GUID, t: LivelinessTransition) {
        self.alive_count_change = 0;
        self.not_alive_count_change = 0;
        let (da, dn): (i32, i32) = match t {
            LivelinessTransition::NotAliveToAlive => (1, -1),
            LivelinessTransition::AliveToNotAlive => (-1, 1),
            LivelinessTransition::AliveFromNone => (1, 0),
            LivelinessTransition::AliveToNone => (-1, 0),
            LivelinessTransition::NotAliveToNone => (0, -1),
        };
        self.alive_count = self.alive_count.saturating_add_signed(da);
        self.not_alive_count = self.not_alive_count.saturating_add_signed(dn);
        self.alive_count_change = da;
        self.not_alive_count_change = dn;
        self.last_publication_handle = Some(writer);
    }
}

/// Liveliness lost status (writer side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessLostStatus {
    pub total_count: u32,
    pub total_count_change: i32,
}

/// Status event delivered to an entity's listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    PublicationMatched(PublicationMatchedStatus),
    SubscriptionMatched(SubscriptionMatchedStatus),
    LivelinessChanged {
        status: LivelinessChangedStatus,
        transition: LivelinessTransition,
    },
    LivelinessLost(LivelinessLostStatus),
    /// The entity is gone; no further events follow.
    Deleted,
}

/// Receiver of status events.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, entity: GUID, event: &StatusEvent);
}

/// Listener wrapping a closure.
pub struct ClosureListener<F: Fn(GUID, &StatusEvent) + Send + Sync> {
    callback: F,
}

impl<F: Fn(GUID, &StatusEvent) + Send + Sync> ClosureListener<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: Fn(GUID, &StatusEvent) + Send + Sync> StatusListener for ClosureListener<F> {
    fn on_status(&self, entity: GUID, event: &StatusEvent) {
        (self.callback)(entity, event);
    }
}

/// Shared listener handle.
pub type SharedListener = Arc<dyn StatusListener>;

/// Build a shared listener from a closure.
pub fn listener<F>(f: F) -> SharedListener
where
    F: Fn(GUID, &StatusEvent) + Send + Sync + 'static,
{
    Arc::new(ClosureListener::new(f))
}

/// Optional listener slot of an entity.
#[derive(Clone, Default)]
pub struct ListenerSlot(Option<SharedListener>);

impl ListenerSlot {
    pub fn new(l: Option<SharedListener>) -> Self {
        Self(l)
    }

    pub fn notify(&self, entity: GUID, event: &StatusEvent) {
        if let Some(l) = &self.0 {
            l.on_status(entity, event);
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerSlot({})", if self.0.is_some() { "set" } else { "none" })
    }
}

/// Matched-count bookkeeping shared by publication and subscription status.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCounts {
    pub total: u32,
    pub current: u32,
}

impl MatchCounts {
    pub fn added(&mut self) -> (u32, i32, u32, i32) {
        self.total += 1;
        self.current += 1;
        (self.total, 1, self.current, 1)
    }

    pub fn removed(&mut self) -> (u32, i32, u32, i32) {
        self.current = self.current.saturating_sub(1);
        (self.total, 0, self.current, -1)
    }

    pub fn publication(&mut self, peer: GUID, added: bool) -> StatusEvent {
        let (t, tc, c, cc) = if added { self.added() } else { self.removed() };
        StatusEvent::PublicationMatched(PublicationMatchedStatus {
            total_count: t,
            total_count_change: tc,
            current_count: c,
            current_count_change: cc,
            last_subscription_handle: Some(peer),
        })
    }

    pub fn subscription(&mut self, peer: GUID, added: bool) -> StatusEvent {
        let (t, tc, c, cc) = if added { self.added() } else { self.removed() };
        StatusEvent::SubscriptionMatched(SubscriptionMatchedStatus {
            total_count: t,
            total_count_change: tc,
            current_count: c,
            current_count_change: cc,
            last_publication_handle: Some(peer),
        })
    }
}
