// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS Security orchestration.
//!
//! Drives the participant authentication handshake and the crypto-token
//! exchange that follows it. Identity, permissions and key material are the
//! plugins' business:
//!
//! ```text
//! SecurityPlugins
//! +-- Authentication  (validate identities, run handshake steps)
//! +-- AccessControl   (permissions per remote participant and topic)
//! +-- Cryptography    (register matches, create/set crypto tokens)
//! ```
//!
//! A pair of (local participant, proxy participant) that both advertise
//! security goes through the handshake before any protected endpoint
//! matches. Crypto tokens that arrive before their match are parked for
//! [`DdsiConfig::pending_crypto_match_expiry`](crate::config::DdsiConfig).

pub mod error;
mod exchange;
pub(crate) mod handshake;
mod pending;
mod plugins;
#[cfg(feature = "security")]
pub mod psk;
pub(crate) mod tokens;

use parking_lot::Mutex;

pub use error::SecurityError;
pub use exchange::{
    classify_auth, classify_crypto, handshake_kind, AuthMessage, CryptoTokenKind, DataHolder,
    HandshakeKind, ParticipantGenericMessage, AUTH_CLASS, AUTH_REQUEST_CLASS,
    DATAREADER_CRYPTO_TOKENS_CLASS, DATAWRITER_CRYPTO_TOKENS_CLASS, PARTICIPANT_CRYPTO_TOKENS_CLASS,
};
pub use handshake::{HandshakeListener, Outcome as HandshakeOutcome, State as HandshakeState};
pub use pending::{PendingCryptoMatches, PendingTokens};
pub use plugins::{
    AccessControl, Authentication, Cryptography, HandshakeHandle, HandshakeStep, IdentityHandle,
    NullCryptography, PermissionsHandle, PermissiveAccessControl, RemoteIdentity, SecurityPlugins,
    SharedSecretHandle, ValidationResult,
};

use crate::config::DdsiConfig;
use crate::xevent::EventId;
use handshake::HandshakeManager;

/// Security settings of a local participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSecurity {
    /// Unprotected endpoints may match peers whose authentication failed
    /// (or that do not support security).
    pub allow_unauthenticated: bool,
    /// Topics whose endpoints are not protected.
    pub unprotected_topics: Vec<String>,
}

impl ParticipantSecurity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_unauthenticated(mut self, allow: bool) -> Self {
        self.allow_unauthenticated = allow;
        self
    }

    pub fn unprotected_topic(mut self, topic: impl Into<String>) -> Self {
        self.unprotected_topics.push(topic.into());
        self
    }
}

/// Domain-wide security state.
pub(crate) struct SecurityContext {
    pub plugins: SecurityPlugins,
    pub handshakes: HandshakeManager,
    pub pending: PendingCryptoMatches,
    /// Sweep event of the pending table, scheduled while it is non-empty.
    pub sweep_event: Mutex<Option<EventId>>,
}

impl SecurityContext {
    pub fn new(plugins: SecurityPlugins, cfg: &DdsiConfig, listener: Option<HandshakeListener>) -> Self {
        Self {
            plugins,
            handshakes: HandshakeManager::new(cfg, listener),
            pending: PendingCryptoMatches::new(),
            sweep_event: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("handshakes", &self.handshakes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
