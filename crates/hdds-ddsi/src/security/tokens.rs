// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crypto-token exchange.
//!
//! Participant tokens feed the handshake; endpoint tokens are handed to the
//! crypto plugin under the crypto handle stored in the match record. Tokens
//! whose match does not exist yet are parked in the pending table.

use super::exchange::{classify_crypto, CryptoTokenKind, DataHolder, ParticipantGenericMessage};
use super::handshake;
use crate::domain::{DomainContext, DomainEvent};
use crate::guid::GUID;
use crate::match_tree::CryptoHandle;
use crate::transmit::{Destination, Submessage};

/// Incoming crypto-token message.
pub(crate) fn handle_crypto_exchange_message(ctx: &DomainContext, msg: &ParticipantGenericMessage) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let Some(kind) = classify_crypto(msg) else {
        log::warn!("[crypto] unrecognized message class {}", msg.message_class);
        return;
    };
    let (remote, local) = match kind {
        CryptoTokenKind::Participant => (msg.source, msg.destination_participant),
        _ => match (msg.source_endpoint, msg.destination_endpoint) {
            (Some(r), Some(l)) => (r, l),
            _ => {
                log::warn!("[crypto] endpoint tokens without endpoints from {:?}", msg.source);
                return;
            }
        },
    };
    let delivered = match kind {
        CryptoTokenKind::Participant => handshake::participant_tokens_received(ctx, local, remote, &msg.data),
        CryptoTokenKind::DataWriter => match reader_crypto(ctx, local, remote) {
            Some(h) => {
                log_err(sec.plugins.cryptography.set_remote_datawriter_crypto_tokens(h, &msg.data));
                true
            }
            None => false,
        },
        CryptoTokenKind::DataReader => match writer_crypto(ctx, local, remote) {
            Some(h) => {
                log_err(sec.plugins.cryptography.set_remote_datareader_crypto_tokens(h, &msg.data));
                true
            }
            None => false,
        },
    };
    if !delivered {
        park(ctx, remote, local, kind, msg.data.clone());
    }
}

fn log_err(r: Result<(), super::SecurityError>) {
    if let Err(e) = r {
        log::warn!("[crypto] setting remote tokens failed: {}", e);
    }
}

/// Crypto handle of the (local reader, proxy writer) match.
fn reader_crypto(ctx: &DomainContext, reader: GUID, pwr: GUID) -> Option<CryptoHandle> {
    let rd = ctx.index.reader(&reader)?;
    let st = rd.state.lock();
    st.writers.get(&pwr).and_then(|m| m.crypto)
}

/// Crypto handle of the (local writer, proxy reader) match.
fn writer_crypto(ctx: &DomainContext, writer: GUID, prd: GUID) -> Option<CryptoHandle> {
    let wr = ctx.index.writer(&writer)?;
    let st = wr.state.lock();
    st.readers.get(&prd).and_then(|m| m.crypto)
}

/// Park tokens and make sure the sweep event runs.
pub(crate) fn park(ctx: &DomainContext, remote: GUID, local: GUID, kind: CryptoTokenKind, tokens: Vec<DataHolder>) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let expiry = ctx.now() + ctx.config.pending_crypto_match_expiry;
    sec.pending.insert(remote, local, kind, tokens, expiry);
    let mut ev = sec.sweep_event.lock();
    if ev.is_none() {
        *ev = Some(ctx.events.schedule(expiry, DomainEvent::PendingMatchSweep));
    }
}

/// Sweep event: drop expired tokens, keep sweeping while any are left.
pub(crate) fn sweep(ctx: &DomainContext) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let now = ctx.now();
    sec.pending.sweep(now);
    let mut ev = sec.sweep_event.lock();
    if let Some(id) = *ev {
        if sec.pending.is_empty() {
            ctx.events.cancel(id);
            *ev = None;
        } else {
            ctx.events.reschedule(id, now + ctx.config.pending_crypto_match_expiry);
        }
    }
}

/// Send our endpoint tokens for a freshly registered remote endpoint.
pub(crate) fn send_endpoint_tokens(
    ctx: &DomainContext,
    kind: CryptoTokenKind,
    local: GUID,
    remote: GUID,
    handle: CryptoHandle,
) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let crypto = &sec.plugins.cryptography;
    let tokens = match kind {
        CryptoTokenKind::DataWriter => crypto.create_local_datawriter_crypto_tokens(handle),
        CryptoTokenKind::DataReader => crypto.create_local_datareader_crypto_tokens(handle),
        CryptoTokenKind::Participant => crypto.create_local_participant_crypto_tokens(handle),
    };
    match tokens {
        Ok(tokens) => {
            let msg = ParticipantGenericMessage::new(
                local.participant_guid(),
                0,
                remote.participant_guid(),
                kind.message_class(),
                tokens,
            )
            .with_endpoints(local, remote);
            ctx.tx.send(
                local.participant_guid(),
                Destination::Unicast(remote.participant_guid()),
                vec![Submessage::Participant(msg)],
            );
        }
        Err(e) => log::warn!("[crypto] creating {:?} tokens for {:?} failed: {}", kind, remote, e),
    }
}

/// Hand over tokens that arrived before the (remote, local) endpoint match.
pub(crate) fn claim_endpoint_tokens(ctx: &DomainContext, remote: GUID, local: GUID, handle: CryptoHandle) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let Some(p) = sec.pending.claim(remote, local) else {
        return;
    };
    let crypto = &sec.plugins.cryptography;
    let r = match p.kind {
        CryptoTokenKind::DataWriter => crypto.set_remote_datawriter_crypto_tokens(handle, &p.tokens),
        CryptoTokenKind::DataReader => crypto.set_remote_datareader_crypto_tokens(handle, &p.tokens),
        CryptoTokenKind::Participant => crypto.set_remote_participant_crypto_tokens(handle, &p.tokens),
    };
    log_err(r);
}
