// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local and proxy entities, their index, matching and lifecycle.
//!
//! Lock order: an endpoint lock may be held while taking its participant
//! lock, never the reverse. A writer and a reader lock are never held at the
//! same time; matching updates one side, releases it, then the other.

mod index;
pub(crate) mod lifecycle;
pub(crate) mod matching;
mod participant;
mod proxy;
mod reader;
mod writer;

pub use index::{Entity, EntityIndex};
pub use participant::{PairAuth, Participant};
pub use proxy::{ProxyEndpointInfo, ProxyParticipant, ProxyReader, ProxyWriter};
pub use reader::Reader;
pub use writer::{Writer, WriterLifecycle, WriterStats};

pub(crate) use proxy::ProxyWriterState;
pub(crate) use reader::ReaderState;
pub(crate) use writer::{LocalReaders, WriterState};
