// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant-to-participant security messages.
//!
//! Authentication tokens and crypto tokens travel as
//! [`ParticipantGenericMessage`]s on the builtin stateless/volatile
//! topics. This module classifies incoming ones; anything it cannot place is
//! dropped by the caller with a warning.

use crate::guid::GUID;

/// Auth-request token exchange (sent by the side waiting for a request).
pub const AUTH_REQUEST_CLASS: &str = "dds.sec.auth_request";
/// Handshake token exchange.
pub const AUTH_CLASS: &str = "dds.sec.auth";
pub const PARTICIPANT_CRYPTO_TOKENS_CLASS: &str = "dds.sec.participant_crypto_tokens";
pub const DATAWRITER_CRYPTO_TOKENS_CLASS: &str = "dds.sec.datawriter_crypto_tokens";
pub const DATAREADER_CRYPTO_TOKENS_CLASS: &str = "dds.sec.datareader_crypto_tokens";

/// Generic token: a class id plus named string and binary properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataHolder {
    pub class_id: String,
    pub properties: Vec<(String, String)>,
    pub binary_properties: Vec<(String, Vec<u8>)>,
}

impl DataHolder {
    pub fn new(class_id: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn with_binary(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.binary_properties.push((name.into(), value.into()));
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn binary(&self, name: &str) -> Option<&[u8]> {
        self.binary_properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// Message exchanged between a local and a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantGenericMessage {
    /// Sending participant.
    pub source: GUID,
    /// Per-source message sequence number.
    pub sequence: u64,
    pub destination_participant: GUID,
    /// Endpoints for endpoint-level crypto tokens.
    pub source_endpoint: Option<GUID>,
    pub destination_endpoint: Option<GUID>,
    pub message_class: String,
    pub data: Vec<DataHolder>,
}

impl ParticipantGenericMessage {
    pub fn new(
        source: GUID,
        sequence: u64,
        destination: GUID,
        message_class: &str,
        data: Vec<DataHolder>,
    ) -> Self {
        Self {
            source,
            sequence,
            destination_participant: destination,
            source_endpoint: None,
            destination_endpoint: None,
            message_class: message_class.to_string(),
            data,
        }
    }

    pub fn with_endpoints(mut self, source: GUID, destination: GUID) -> Self {
        self.source_endpoint = Some(source);
        self.destination_endpoint = Some(destination);
        self
    }
}

/// Step of the three-message handshake a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    Request,
    Reply,
    Final,
}

/// Classified authentication message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    AuthRequest(DataHolder),
    Handshake(HandshakeKind, DataHolder),
}

/// Handshake step encoded in a token class id (`...+Req`, `...+Reply`,
/// `...+Final`).
pub fn handshake_kind(token: &DataHolder) -> Option<HandshakeKind> {
    let (_, suffix) = token.class_id.rsplit_once('+')?;
    match suffix {
        "Req" => Some(HandshakeKind::Request),
        "Reply" => Some(HandshakeKind::Reply),
        "Final" => Some(HandshakeKind::Final),
        _ => None,
    }
}

/// Classify an authentication message; `None` for unknown classes or a
/// missing/unrecognized token.
pub fn classify_auth(msg: &ParticipantGenericMessage) -> Option<AuthMessage> {
    let token = msg.data.first()?.clone();
    match msg.message_class.as_str() {
        AUTH_REQUEST_CLASS => Some(AuthMessage::AuthRequest(token)),
        AUTH_CLASS => handshake_kind(&token).map(|k| AuthMessage::Handshake(k, token)),
        _ => None,
    }
}

/// Level a crypto-token message applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoTokenKind {
    Participant,
    DataWriter,
    DataReader,
}

impl CryptoTokenKind {
    pub fn message_class(self) -> &'static str {
        match self {
            CryptoTokenKind::Participant => PARTICIPANT_CRYPTO_TOKENS_CLASS,
            CryptoTokenKind::DataWriter => DATAWRITER_CRYPTO_TOKENS_CLASS,
            CryptoTokenKind::DataReader => DATAREADER_CRYPTO_TOKENS_CLASS,
        }
    }
}

/// Classify a crypto-token message.
pub fn classify_crypto(msg: &ParticipantGenericMessage) -> Option<CryptoTokenKind> {
    match msg.message_class.as_str() {
        PARTICIPANT_CRYPTO_TOKENS_CLASS => Some(CryptoTokenKind::Participant),
        DATAWRITER_CRYPTO_TOKENS_CLASS => Some(CryptoTokenKind::DataWriter),
        DATAREADER_CRYPTO_TOKENS_CLASS => Some(CryptoTokenKind::DataReader),
        _ => None,
    }
}
