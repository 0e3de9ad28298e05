// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local reader.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::guid::GUID;
use crate::match_tree::{AugTree, RdWrMatch};
use crate::qos::EndpointQos;
use crate::rhc::ReaderHistoryCache;
use crate::status::{ListenerSlot, LivelinessChangedStatus, MatchCounts};

/// Reader state guarded by the reader lock.
#[derive(Debug, Default)]
pub(crate) struct ReaderState {
    /// Matched proxy writers.
    pub writers: AugTree<GUID, RdWrMatch>,
    /// Matched local writers.
    pub local_writers: AugTree<GUID, RdWrMatch>,
    pub liveliness: LivelinessChangedStatus,
    pub counts: MatchCounts,
    pub deleting: bool,
}

/// Local reader.
pub struct Reader {
    pub guid: GUID,
    pub participant: GUID,
    pub topic: String,
    pub type_name: String,
    pub qos: EndpointQos,
    pub protected: bool,
    pub(crate) rhc: Arc<dyn ReaderHistoryCache>,
    pub(crate) listener: ListenerSlot,
    pub(crate) state: Mutex<ReaderState>,
}

impl Reader {
    pub fn is_reliable(&self) -> bool {
        self.qos.is_reliable()
    }

    pub fn liveliness(&self) -> LivelinessChangedStatus {
        self.state.lock().liveliness.clone()
    }

    /// Number of matched writers, remote and local.
    pub fn num_writers(&self) -> usize {
        let st = self.state.lock();
        st.writers.len() + st.local_writers.len()
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("guid", &self.guid)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
