// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-ddsi - RTPS reliable delivery and endpoint matching
//!
//! The protocol core underneath an HDDS domain: it decides which local and
//! remote endpoints are matched, what a reliable writer sends and when, how
//! acknowledgements release history, and how secure participants
//! authenticate before their protected endpoints may talk.
//!
//! Byte encoding, sockets and discovery payload parsing live elsewhere. The
//! core receives already-decoded submessages and discovery facts and hands
//! submessages to a [`Transmitter`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hdds_ddsi::{Domain, KeyedHistory, Qos, EndpointQos, Result};
//!
//! fn main() -> Result<()> {
//!     let domain = Domain::builder().build()?;
//!     let pp = domain.create_participant([1; 12], None)?;
//!
//!     let qos = Qos::new().reliable(Duration::from_millis(100));
//!     let writer = domain.create_writer(pp, "sensors/temperature", "Temperature", &qos, None)?;
//!     let rhc = KeyedHistory::shared(&qos.merge(&EndpointQos::reader_default()));
//!     let _reader = domain.create_reader(pp, "sensors/temperature", "Temperature", &qos, rhc.clone(), None)?;
//!
//!     domain.write(writer, 7, vec![0x2a])?;
//!     assert_eq!(rhc.take().len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                              Domain                                |
//! |  create/delete endpoints | discovery facts | received submessages  |
//! +--------------------------------------------------------------------+
//! |  entity: index, matching, lifecycle + GC   |  security: handshake, |
//! |  match_tree: per-endpoint match records    |  crypto tokens, PSK   |
//! |  liveliness: alive/vclock propagation      |                       |
//! +--------------------------------------------------------------------+
//! |  transmit: WHC, write, throttle, ACKNACK   |  receive: HEARTBEAT,  |
//! |  heartbeat: controller + event             |  DATA, GAP, reorder   |
//! +--------------------------------------------------------------------+
//! |  xevent (timer thread)  |  gc (GC thread)  |  Transmitter (boundary) |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Features
//!
//! - `config-loaders` (default): load [`DdsiConfig`] from YAML
//! - `security`: pre-shared-key authentication plugin ([`security::psk`])
//!
//! ## Logging
//!
//! All diagnostics go through the `log` facade with a bracketed component
//! prefix (`[match]`, `[heartbeat]`, `[acknack]`, ...). The crate installs no
//! logger.

pub mod config;
mod domain;
pub mod entity;
pub mod error;
pub mod gc;
pub mod guid;
pub mod heartbeat;
pub mod liveliness;
pub mod match_tree;
pub mod qos;
mod receive;
pub mod rhc;
pub mod security;
pub mod seq;
pub mod status;
pub mod time;
pub mod transmit;
pub mod xevent;

pub use config::{DdsiConfig, DdsiConfigBuilder, RetransmitMerging};
pub use domain::{Domain, DomainBuilder};
pub use entity::{ProxyEndpointInfo, WriterLifecycle, WriterStats};
pub use error::{Error, Result};
pub use guid::GUID;
pub use heartbeat::{AckRequired, HeartbeatDecision};
pub use qos::{Durability, EndpointQos, History, LivelinessKind, Qos, Reliability};
pub use rhc::{InstanceState, KeyedHistory, ReaderHistoryCache, ReceivedSample, Sample, SampleKind, WriterInfo};
pub use security::{HandshakeOutcome, HandshakeState, ParticipantSecurity, SecurityPlugins};
pub use seq::{FragmentNumberSet, SeqNum, SequenceNumberSet};
pub use status::{listener, ClosureListener, LivelinessChangedStatus, SharedListener, StatusEvent, StatusListener};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use transmit::{Destination, NullTransmitter, RecordingTransmitter, Sent, Submessage, Transmitter};
