// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types surfaced at the boundary calls of the protocol core.
//!
//! Only application-facing operations (entity creation/deletion, write,
//! wait-for-acks) return these. Receive-path, timer and GC processing log
//! and drop instead.

use crate::security::SecurityError;

/// Errors returned by the DDSI core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Caller errors
    // ========================================================================
    /// Malformed argument (unknown GUID, oversized sample, wrong entity kind).
    BadParameter(String),
    /// Entity is not in a state that permits the operation.
    PreconditionNotMet(String),
    /// Operation not permitted on this entity.
    IllegalOperation(String),
    /// Entity was already deleted.
    AlreadyDeleted,

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Entity-id space of a participant exhausted.
    ResourceExhausted(String),
    /// Resource limits prevent the operation.
    OutOfResources,
    /// Blocking operation exceeded its deadline.
    Timeout,

    // ========================================================================
    // Other errors
    // ========================================================================
    /// Requested feature or operation is not supported.
    Unsupported,
    /// Access control rejected the operation.
    NotAllowedBySecurity(String),
    /// Security plugin failure.
    Security(SecurityError),
}

impl Error {
    /// DDS return-code name for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadParameter(_) => "BAD_PARAMETER",
            Error::PreconditionNotMet(_) => "PRECONDITION_NOT_MET",
            Error::IllegalOperation(_) => "ILLEGAL_OPERATION",
            Error::AlreadyDeleted => "ALREADY_DELETED",
            Error::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Error::OutOfResources => "OUT_OF_RESOURCES",
            Error::Timeout => "TIMEOUT",
            Error::Unsupported => "UNSUPPORTED",
            Error::NotAllowedBySecurity(_) | Error::Security(_) => "NOT_ALLOWED_BY_SECURITY",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::IllegalOperation(msg) => write!(f, "Illegal operation: {}", msg),
            Error::AlreadyDeleted => write!(f, "Entity already deleted"),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::OutOfResources => write!(f, "Out of resources"),
            Error::Timeout => write!(f, "Timeout"),
            Error::Unsupported => write!(f, "Unsupported operation"),
            Error::NotAllowedBySecurity(msg) => write!(f, "Not allowed by security: {}", msg),
            Error::Security(e) => write!(f, "Security error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Security(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Error::Security(e)
    }
}

/// Result type for DDSI core operations.
pub type Result<T> = core::result::Result<T, Error>;
