// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint QoS subset consumed by the protocol core.
//!
//! Applications hand in a sparse [`Qos`] (only what they set); creation
//! merges it over the kind-specific defaults into an [`EndpointQos`]
//! without touching the caller's value.

use std::time::Duration;

/// Reliability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    BestEffort,
    /// Reliable delivery; `max_blocking_time` bounds a throttled write.
    Reliable { max_blocking_time: Duration },
}

impl Reliability {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Reliability::Reliable { .. })
    }
}

/// Durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Durability {
    Volatile,
    TransientLocal,
}

/// History policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    KeepLast(u32),
    KeepAll,
}

/// Liveliness kinds, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LivelinessKind {
    /// DDS infrastructure automatically asserts liveliness.
    #[default]
    Automatic,
    /// Application must assert per participant.
    ManualByParticipant,
    /// Application must assert per writer/topic.
    ManualByTopic,
}

/// Liveliness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    /// `Duration::MAX` means infinite.
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: Duration::MAX,
        }
    }
}

/// Destination order policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DestinationOrderKind {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

/// Fully resolved QoS of a writer or reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointQos {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub liveliness: Liveliness,
    pub destination_order: DestinationOrderKind,
    /// `Duration::MAX` means samples never expire.
    pub lifespan: Duration,
    /// `Duration::MAX` means no deadline.
    pub deadline: Duration,
    pub ownership_strength: i32,
    pub autodispose_unregistered_instances: bool,
}

impl EndpointQos {
    /// Writer defaults (reliable, 100 ms max blocking time).
    pub fn writer_default() -> Self {
        Self {
            reliability: Reliability::Reliable {
                max_blocking_time: Duration::from_millis(100),
            },
            ..Self::reader_default()
        }
    }

    /// Reader defaults (best effort).
    pub fn reader_default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            history: History::KeepLast(1),
            liveliness: Liveliness::default(),
            destination_order: DestinationOrderKind::ByReceptionTimestamp,
            lifespan: Duration::MAX,
            deadline: Duration::MAX,
            ownership_strength: 0,
            autodispose_unregistered_instances: true,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability.is_reliable()
    }

    pub fn is_transient_local(&self) -> bool {
        self.durability == Durability::TransientLocal
    }

    pub fn max_blocking_time(&self) -> Duration {
        match self.reliability {
            Reliability::Reliable { max_blocking_time } => max_blocking_time,
            Reliability::BestEffort => Duration::ZERO,
        }
    }
}

/// Sparse QoS as supplied by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Qos {
    pub reliability: Option<Reliability>,
    pub durability: Option<Durability>,
    pub history: Option<History>,
    pub liveliness: Option<Liveliness>,
    pub destination_order: Option<DestinationOrderKind>,
    pub lifespan: Option<Duration>,
    pub deadline: Option<Duration>,
    pub ownership_strength: Option<i32>,
    pub autodispose_unregistered_instances: Option<bool>,
}

impl Qos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reliable(mut self, max_blocking_time: Duration) -> Self {
        self.reliability = Some(Reliability::Reliable { max_blocking_time });
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.reliability = Some(Reliability::BestEffort);
        self
    }

    pub fn transient_local(mut self) -> Self {
        self.durability = Some(Durability::TransientLocal);
        self
    }

    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = Some(History::KeepLast(depth));
        self
    }

    pub fn keep_all(mut self) -> Self {
        self.history = Some(History::KeepAll);
        self
    }

    pub fn liveliness(mut self, kind: LivelinessKind, lease_duration: Duration) -> Self {
        self.liveliness = Some(Liveliness {
            kind,
            lease_duration,
        });
        self
    }

    pub fn by_source_timestamp(mut self) -> Self {
        self.destination_order = Some(DestinationOrderKind::BySourceTimestamp);
        self
    }

    pub fn lifespan(mut self, d: Duration) -> Self {
        self.lifespan = Some(d);
        self
    }

    pub fn deadline(mut self, d: Duration) -> Self {
        self.deadline = Some(d);
        self
    }

    pub fn ownership_strength(mut self, s: i32) -> Self {
        self.ownership_strength = Some(s);
        self
    }

    /// Merge over `defaults`; values set here always win.
    pub fn merge(&self, defaults: &EndpointQos) -> EndpointQos {
        EndpointQos {
            reliability: self.reliability.unwrap_or(defaults.reliability),
            durability: self.durability.unwrap_or(defaults.durability),
            history: self.history.unwrap_or(defaults.history),
            liveliness: self.liveliness.unwrap_or(defaults.liveliness),
            destination_order: self.destination_order.unwrap_or(defaults.destination_order),
            lifespan: self.lifespan.unwrap_or(defaults.lifespan),
            deadline: self.deadline.unwrap_or(defaults.deadline),
            ownership_strength: self.ownership_strength.unwrap_or(defaults.ownership_strength),
            autodispose_unregistered_instances: self
                .autodispose_unregistered_instances
                .unwrap_or(defaults.autodispose_unregistered_instances),
        }
    }
}

/// Policy that made a writer/reader pair incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosPolicyId {
    Reliability,
    Durability,
    Liveliness,
    Deadline,
    DestinationOrder,
}

/// Requested-vs-offered check for a writer/reader pair.
pub fn check_compatible(
    writer: &EndpointQos,
    reader: &EndpointQos,
) -> Result<(), QosPolicyId> {
    if reader.is_reliable() && !writer.is_reliable() {
        return Err(QosPolicyId::Reliability);
    }
    if reader.durability > writer.durability {
        return Err(QosPolicyId::Durability);
    }
    if reader.liveliness.kind > writer.liveliness.kind
        || reader.liveliness.lease_duration < writer.liveliness.lease_duration
    {
        return Err(QosPolicyId::Liveliness);
    }
    if reader.deadline < writer.deadline {
        return Err(QosPolicyId::Deadline);
    }
    if reader.destination_order > writer.destination_order {
        return Err(QosPolicyId::DestinationOrder);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_caller_wins() {
        let qos = Qos::new().best_effort().keep_all();
        let merged = qos.merge(&EndpointQos::writer_default());
        assert_eq!(merged.reliability, Reliability::BestEffort);
        assert_eq!(merged.history, History::KeepAll);
        assert_eq!(merged.durability, Durability::Volatile, "unset fields come from defaults");
        assert_eq!(qos.durability, None, "merge must not modify the caller's QoS");
    }

    #[test]
    fn test_writer_default_is_reliable() {
        let w = EndpointQos::writer_default();
        assert!(w.is_reliable());
        assert_eq!(w.max_blocking_time(), Duration::from_millis(100));
        assert!(!EndpointQos::reader_default().is_reliable());
    }

    #[test]
    fn test_compatibility() {
        let w = EndpointQos::writer_default();
        let r = Qos::new()
            .reliable(Duration::ZERO)
            .merge(&EndpointQos::reader_default());
        assert_eq!(check_compatible(&w, &r), Ok(()));

        let be_writer = Qos::new().best_effort().merge(&EndpointQos::writer_default());
        assert_eq!(check_compatible(&be_writer, &r), Err(QosPolicyId::Reliability));

        let tl_reader = Qos::new().transient_local().merge(&EndpointQos::reader_default());
        assert_eq!(check_compatible(&w, &tl_reader), Err(QosPolicyId::Durability));

        let lease_reader = Qos::new()
            .liveliness(LivelinessKind::Automatic, Duration::from_secs(1))
            .merge(&EndpointQos::reader_default());
        assert_eq!(check_compatible(&w, &lease_reader), Err(QosPolicyId::Liveliness));
    }
}
