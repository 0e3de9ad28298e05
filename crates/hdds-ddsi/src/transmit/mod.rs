// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable transmission engine.
//!
//! ```text
//! write() ─▶ throttle? ─▶ seq++ ─▶ WHC ─▶ DATA/DATAFRAG (+ piggybacked HEARTBEAT)
//!                                    ▲
//! ACKNACK ─▶ match record ─▶ max_drop_seq ─┘ drop acked, retransmit NACKed, GAP the rest
//! ```

pub(crate) mod ack;
mod fragment;
mod submsg;
mod whc;
pub(crate) mod write;

pub use fragment::{fragment_count, sample_submessages, Defragmenter, FragmentIn, PartialSample};
pub use submsg::{Destination, NullTransmitter, RecordingTransmitter, Sent, Submessage, Transmitter};
pub use whc::{sample_expiry, Whc, WhcEntry, WhcState};
