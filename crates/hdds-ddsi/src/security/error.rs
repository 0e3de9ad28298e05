// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security plugin error types

use std::fmt;

/// Errors reported by security plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Identity or handshake validation failed
    AuthenticationFailed(String),

    /// Access control rejected a remote participant or endpoint
    AccessDenied(String),

    /// Key registration, token creation or MAC verification failed
    CryptographicError(String),

    /// Plugin misconfigured (missing key, unknown handle)
    ConfigurationError(String),

    /// Malformed handshake or crypto token
    InvalidToken(String),
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            Self::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            Self::CryptographicError(msg) => write!(f, "Cryptographic error: {}", msg),
            Self::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
        }
    }
}

impl std::error::Error for SecurityError {}
