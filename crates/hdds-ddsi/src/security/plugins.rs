// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security plugin interfaces.
//!
//! The core only orchestrates; the cryptography lives behind these traits.
//! Plugins are invoked with the handshake table lock held but never with an
//! entity lock held, and must not call back into the domain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::exchange::DataHolder;
use super::SecurityError;
use crate::guid::GUID;
use crate::match_tree::CryptoHandle;

pub type IdentityHandle = u64;
pub type PermissionsHandle = u64;
pub type HandshakeHandle = u64;
pub type SharedSecretHandle = u64;

/// Outcome of an authentication plugin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Ok,
    Failed,
    /// Try again after the retry interval.
    PendingRetry,
    /// Local side must begin the handshake (send a request).
    PendingHandshakeRequest,
    /// A message went out (or must be awaited) and a reply is expected.
    PendingHandshakeMessage,
    /// Handshake done; the returned message still has to be sent.
    OkFinalMessage,
}

/// Result of `validate_remote_identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub result: ValidationResult,
    pub identity: Option<IdentityHandle>,
    /// Auth-request token to send while waiting for the peer's request.
    pub auth_request: Option<DataHolder>,
}

/// Result of a handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStep {
    pub result: ValidationResult,
    pub handshake: Option<HandshakeHandle>,
    /// Outbound handshake token, if any.
    pub message: Option<DataHolder>,
}

impl HandshakeStep {
    pub fn failed() -> Self {
        Self {
            result: ValidationResult::Failed,
            handshake: None,
            message: None,
        }
    }
}

/// Authentication plugin.
pub trait Authentication: Send + Sync {
    fn validate_local_identity(&self, participant: GUID) -> Result<IdentityHandle, SecurityError>;

    fn validate_remote_identity(
        &self,
        local: IdentityHandle,
        remote: GUID,
        remote_auth_request: Option<&DataHolder>,
    ) -> RemoteIdentity;

    fn begin_handshake_request(&self, local: IdentityHandle, remote: IdentityHandle) -> HandshakeStep;

    fn begin_handshake_reply(
        &self,
        local: IdentityHandle,
        remote: IdentityHandle,
        request: &DataHolder,
    ) -> HandshakeStep;

    fn process_handshake(&self, handshake: HandshakeHandle, message: &DataHolder) -> HandshakeStep;

    fn get_shared_secret(&self, handshake: HandshakeHandle) -> Result<SharedSecretHandle, SecurityError>;

    /// Release a handshake handle once the handshake is over.
    fn return_handshake_handle(&self, _handshake: HandshakeHandle) {}
}

/// Access-control plugin.
pub trait AccessControl: Send + Sync {
    fn validate_remote_permissions(
        &self,
        local: IdentityHandle,
        remote: IdentityHandle,
    ) -> Result<PermissionsHandle, SecurityError>;

    fn check_remote_datawriter(&self, permissions: PermissionsHandle, topic: &str) -> bool;

    fn check_remote_datareader(&self, permissions: PermissionsHandle, topic: &str) -> bool;
}

/// Cryptography plugin (key factory and key exchange).
pub trait Cryptography: Send + Sync {
    fn register_matched_remote_participant(
        &self,
        local: GUID,
        remote: GUID,
        secret: SharedSecretHandle,
    ) -> Result<CryptoHandle, SecurityError>;

    fn register_matched_remote_datawriter(
        &self,
        local_reader: GUID,
        remote_writer: GUID,
        participant: CryptoHandle,
    ) -> Result<CryptoHandle, SecurityError>;

    fn register_matched_remote_datareader(
        &self,
        local_writer: GUID,
        remote_reader: GUID,
        participant: CryptoHandle,
    ) -> Result<CryptoHandle, SecurityError>;

    /// Release a handle returned by one of the `register_*` calls.
    fn unregister(&self, _handle: CryptoHandle) {}

    fn create_local_participant_crypto_tokens(
        &self,
        remote: CryptoHandle,
    ) -> Result<Vec<DataHolder>, SecurityError>;

    fn create_local_datawriter_crypto_tokens(
        &self,
        remote_reader: CryptoHandle,
    ) -> Result<Vec<DataHolder>, SecurityError>;

    fn create_local_datareader_crypto_tokens(
        &self,
        remote_writer: CryptoHandle,
    ) -> Result<Vec<DataHolder>, SecurityError>;

    fn set_remote_participant_crypto_tokens(
        &self,
        remote: CryptoHandle,
        tokens: &[DataHolder],
    ) -> Result<(), SecurityError>;

    fn set_remote_datawriter_crypto_tokens(
        &self,
        remote_writer: CryptoHandle,
        tokens: &[DataHolder],
    ) -> Result<(), SecurityError>;

    fn set_remote_datareader_crypto_tokens(
        &self,
        remote_reader: CryptoHandle,
        tokens: &[DataHolder],
    ) -> Result<(), SecurityError>;
}

/// Access control that grants everything.
#[derive(Debug, Default)]
pub struct PermissiveAccessControl;

impl AccessControl for PermissiveAccessControl {
    fn validate_remote_permissions(
        &self,
        _local: IdentityHandle,
        remote: IdentityHandle,
    ) -> Result<PermissionsHandle, SecurityError> {
        Ok(remote)
    }

    fn check_remote_datawriter(&self, _permissions: PermissionsHandle, _topic: &str) -> bool {
        true
    }

    fn check_remote_datareader(&self, _permissions: PermissionsHandle, _topic: &str) -> bool {
        true
    }
}

/// Crypto plugin that hands out handles and empty tokens without
/// transforming anything.
#[derive(Debug)]
pub struct NullCryptography {
    next: AtomicU64,
}

impl NullCryptography {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn handle(&self) -> CryptoHandle {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn token(kind: &str, handle: CryptoHandle) -> Vec<DataHolder> {
        vec![DataHolder::new(format!("HDDS:Crypto:Null:{}", kind)).with_property("handle", handle.to_string())]
    }
}

impl Default for NullCryptography {
    fn default() -> Self {
        Self::new()
    }
}

impl Cryptography for NullCryptography {
    fn register_matched_remote_participant(
        &self,
        _local: GUID,
        _remote: GUID,
        _secret: SharedSecretHandle,
    ) -> Result<CryptoHandle, SecurityError> {
        Ok(self.handle())
    }

    fn register_matched_remote_datawriter(
        &self,
        _local_reader: GUID,
        _remote_writer: GUID,
        _participant: CryptoHandle,
    ) -> Result<CryptoHandle, SecurityError> {
        Ok(self.handle())
    }

    fn register_matched_remote_datareader(
        &self,
        _local_writer: GUID,
        _remote_reader: GUID,
        _participant: CryptoHandle,
    ) -> Result<CryptoHandle, SecurityError> {
        Ok(self.handle())
    }

    fn create_local_participant_crypto_tokens(&self, remote: CryptoHandle) -> Result<Vec<DataHolder>, SecurityError> {
        Ok(Self::token("Participant", remote))
    }

    fn create_local_datawriter_crypto_tokens(
        &self,
        remote_reader: CryptoHandle,
    ) -> Result<Vec<DataHolder>, SecurityError> {
        Ok(Self::token("DataWriter", remote_reader))
    }

    fn create_local_datareader_crypto_tokens(
        &self,
        remote_writer: CryptoHandle,
    ) -> Result<Vec<DataHolder>, SecurityError> {
        Ok(Self::token("DataReader", remote_writer))
    }

    fn set_remote_participant_crypto_tokens(&self, _remote: CryptoHandle, _tokens: &[DataHolder]) -> Result<(), SecurityError> {
        Ok(())
    }

    fn set_remote_datawriter_crypto_tokens(
        &self,
        _remote_writer: CryptoHandle,
        _tokens: &[DataHolder],
    ) -> Result<(), SecurityError> {
        Ok(())
    }

    fn set_remote_datareader_crypto_tokens(
        &self,
        _remote_reader: CryptoHandle,
        _tokens: &[DataHolder],
    ) -> Result<(), SecurityError> {
        Ok(())
    }
}

/// The three plugins a secure domain runs with.
#[derive(Clone)]
pub struct SecurityPlugins {
    pub authentication: Arc<dyn Authentication>,
    pub access_control: Arc<dyn AccessControl>,
    pub cryptography: Arc<dyn Cryptography>,
}

impl SecurityPlugins {
    /// Authentication plugin with permissive access control and null crypto.
    pub fn new(authentication: Arc<dyn Authentication>) -> Self {
        Self {
            authentication,
            access_control: Arc::new(PermissiveAccessControl),
            cryptography: Arc::new(NullCryptography::new()),
        }
    }

    pub fn with_access_control(mut self, access_control: Arc<dyn AccessControl>) -> Self {
        self.access_control = access_control;
        self
    }

    pub fn with_cryptography(mut self, cryptography: Arc<dyn Cryptography>) -> Self {
        self.cryptography = cryptography;
        self
    }
}

impl fmt::Debug for SecurityPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityPlugins")
    }
}
