// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handshake manager.
//!
//! One handshake per (local participant, proxy participant) pair. The
//! state machine in [`fsm`] is pure; this module feeds it events, runs the
//! plugin calls it asks for and turns its results back into events.
//!
//! ```text
//! Requester                          Replier
//!    |---- HANDSHAKE_REQUEST ----------->|
//!    |<--- HANDSHAKE_REPLY --------------|
//!    |---- HANDSHAKE_FINAL ------------->|
//!    |<--- participant crypto tokens ----|
//!    |---- participant crypto tokens --->|
//! ```
//!
//! Plugins run with the handshake table locked; messages go out and
//! outcomes are applied after it is released.

pub mod fsm;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

pub use fsm::{Outcome, State};
use fsm::{Action, Event, Timing};

use super::exchange::{
    classify_auth, AuthMessage, CryptoTokenKind, DataHolder, HandshakeKind, ParticipantGenericMessage,
    AUTH_CLASS, AUTH_REQUEST_CLASS,
};
use super::plugins::{HandshakeHandle, IdentityHandle, PermissionsHandle, SharedSecretHandle, ValidationResult};
use super::SecurityContext;
use crate::config::DdsiConfig;
use crate::domain::{DomainContext, DomainEvent};
use crate::entity::matching::rematch_proxy_participant;
use crate::entity::{PairAuth, Participant, ProxyParticipant};
use crate::guid::GUID;
use crate::match_tree::CryptoHandle;
use crate::transmit::{Destination, Submessage};
use crate::xevent::EventId;

/// Shared-secret handle passed to the crypto plugin when validation
/// succeeded without a handshake.
const NO_SHARED_SECRET: SharedSecretHandle = 0;

/// Called once per handshake with its outcome.
pub type HandshakeListener = Arc<dyn Fn(GUID, GUID, Outcome) + Send + Sync>;

type PairKey = (GUID, GUID);

#[derive(Debug)]
pub(crate) struct Handshake {
    pub state: State,
    local_identity: IdentityHandle,
    remote_identity: Option<IdentityHandle>,
    handle: Option<HandshakeHandle>,
    last_message: Option<DataHolder>,
    /// Our auth-request token, sent while waiting for the peer's request.
    auth_request: Option<DataHolder>,
    /// The peer's auth-request token, passed to identity validation.
    received_auth_request: Option<DataHolder>,
    timer: Option<EventId>,
    timeout_timer: Option<EventId>,
    generation: u64,
    seq: u64,
    pair_crypto: Option<CryptoHandle>,
    permissions: Option<PermissionsHandle>,
}

/// Everything that has to happen once the table lock is gone.
#[derive(Default)]
struct Effects {
    sends: Vec<ParticipantGenericMessage>,
    outcome: Option<(Outcome, Option<CryptoHandle>, Option<PermissionsHandle>)>,
}

/// Table of running handshakes.
pub(crate) struct HandshakeManager {
    table: Mutex<HashMap<PairKey, Handshake>>,
    listener: Option<HandshakeListener>,
    timing: Timing,
}

impl HandshakeManager {
    pub fn new(cfg: &DdsiConfig, listener: Option<HandshakeListener>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            listener,
            timing: Timing {
                initial_delay: cfg.handshake_initial_delay,
                retry: cfg.handshake_retry_interval,
                resend: cfg.handshake_resend_interval,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn state(&self, local: GUID, remote: GUID) -> Option<State> {
        self.table.lock().get(&(local, remote)).map(|h| h.state.clone())
    }

    /// Handshake handle and pair crypto of a running handshake.
    pub fn pair_crypto(&self, local: GUID, remote: GUID) -> Option<Option<CryptoHandle>> {
        self.table.lock().get(&(local, remote)).map(|h| h.pair_crypto)
    }
}

/// Start a handshake for the pair unless one is running.
pub(crate) fn begin(ctx: &DomainContext, pp: &Arc<Participant>, proxypp: &Arc<ProxyParticipant>) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let local_identity = {
        let mut st = pp.state.lock();
        let Some(identity) = st.identity else {
            return;
        };
        match st.proxypp.get(&proxypp.guid) {
            Some(PairAuth::Authenticated { .. }) | Some(PairAuth::Unauthenticated) => return,
            _ => {}
        }
        st.proxypp.insert(proxypp.guid, PairAuth::Pending);
        identity
    };
    let key = (pp.guid, proxypp.guid);
    let (state, actions) = fsm::start(&sec.handshakes.timing);
    {
        let mut table = sec.handshakes.table.lock();
        if table.contains_key(&key) {
            return;
        }
        let timeout_timer = ctx.events.schedule(
            ctx.now() + ctx.config.handshake_timeout,
            DomainEvent::HandshakeTimeout {
                local: key.0,
                remote: key.1,
            },
        );
        table.insert(
            key,
            Handshake {
                state,
                local_identity,
                remote_identity: None,
                handle: None,
                last_message: None,
                auth_request: None,
                received_auth_request: None,
                timer: None,
                timeout_timer: Some(timeout_timer),
                generation: 0,
                seq: 0,
                pair_crypto: None,
                permissions: None,
            },
        );
    }
    log::debug!("[handshake] begin {:?} <-> {:?}", key.0, key.1);
    run(ctx, sec, key, VecDeque::new(), actions, None);
}

/// Feed one event to the pair's handshake. `generation` guards timer events
/// against a timer that was superseded while it fired.
pub(crate) fn dispatch(ctx: &DomainContext, local: GUID, remote: GUID, event: Event, generation: Option<u64>) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    if ctx.index.participant(&local).is_none() || ctx.index.proxy_participant(&remote).is_none() {
        return;
    }
    run(ctx, sec, (local, remote), VecDeque::from([event]), Vec::new(), generation);
}

fn run(
    ctx: &DomainContext,
    sec: &SecurityContext,
    key: PairKey,
    mut queue: VecDeque<Event>,
    initial: Vec<Action>,
    generation: Option<u64>,
) {
    let mut fx = Effects::default();
    {
        let mut table = sec.handshakes.table.lock();
        let Some(hs) = table.get_mut(&key) else {
            return;
        };
        if generation.is_some_and(|g| g != hs.generation) {
            return;
        }
        let mut late = Vec::new();
        execute_all(ctx, sec, key, hs, initial, &mut queue, &mut late, &mut fx);
        loop {
            let Some(ev) = queue.pop_front().or_else(|| late.pop()) else {
                break;
            };
            let state = std::mem::replace(&mut hs.state, State::ValidationFailed);
            let prev = state.name();
            let (next, actions) = fsm::step(state, ev, &sec.handshakes.timing);
            if prev != next.name() {
                log::trace!("[handshake] {:?} <-> {:?}: {} -> {}", key.0, key.1, prev, next.name());
            }
            hs.state = next;
            execute_all(ctx, sec, key, hs, actions, &mut queue, &mut late, &mut fx);
        }
        if fx.outcome.is_some() {
            if let Some(hs) = table.remove(&key) {
                release(ctx, sec, &hs);
            }
        }
    }
    for msg in fx.sends {
        ctx.tx.send(key.0, Destination::Unicast(key.1), vec![Submessage::Participant(msg)]);
    }
    if let Some((outcome, crypto, permissions)) = fx.outcome {
        finish(ctx, sec, key, outcome, crypto, permissions);
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_all(
    ctx: &DomainContext,
    sec: &SecurityContext,
    key: PairKey,
    hs: &mut Handshake,
    actions: Vec<Action>,
    queue: &mut VecDeque<Event>,
    late: &mut Vec<Event>,
    fx: &mut Effects,
) {
    for action in actions {
        match execute(ctx, sec, key, hs, action, late, fx) {
            Ok(Some(ev)) => queue.push_back(ev),
            Ok(None) => {}
            Err(reason) => {
                log::error!("[handshake] {:?} <-> {:?}: {}", key.0, key.1, reason);
                queue.clear();
                late.clear();
                queue.push_back(Event::ProcessingFailed);
                return;
            }
        }
    }
}

fn message(hs: &mut Handshake, key: PairKey, class: &str, token: DataHolder) -> ParticipantGenericMessage {
    hs.seq += 1;
    ParticipantGenericMessage::new(key.0, hs.seq, key.1, class, vec![token])
}

fn execute(
    ctx: &DomainContext,
    sec: &SecurityContext,
    key: PairKey,
    hs: &mut Handshake,
    action: Action,
    late: &mut Vec<Event>,
    fx: &mut Effects,
) -> Result<Option<Event>, String> {
    let auth = &sec.plugins.authentication;
    match action {
        Action::CallValidateRemoteIdentity => {
            let r = auth.validate_remote_identity(hs.local_identity, key.1, hs.received_auth_request.as_ref());
            if r.identity.is_some() {
                hs.remote_identity = r.identity;
            }
            if r.auth_request.is_some() {
                hs.auth_request = r.auth_request;
            }
            Ok(Some(Event::Validation(r.result)))
        }
        Action::CallBeginHandshakeRequest => {
            let remote = hs.remote_identity.ok_or("no remote identity")?;
            let step = auth.begin_handshake_request(hs.local_identity, remote);
            note_step(hs, step.handshake, step.message);
            Ok(Some(Event::Validation(step.result)))
        }
        Action::CallBeginHandshakeReply { request } => {
            let remote = hs.remote_identity.ok_or("no remote identity")?;
            let step = auth.begin_handshake_reply(hs.local_identity, remote, &request);
            note_step(hs, step.handshake, step.message);
            Ok(Some(Event::Validation(step.result)))
        }
        Action::CallProcessHandshake { message } => {
            let handle = hs.handle.ok_or("no handshake handle")?;
            let step = auth.process_handshake(handle, &message);
            note_step(hs, step.handshake, step.message);
            Ok(Some(Event::Validation(step.result)))
        }
        Action::SendLast => {
            if let Some(token) = hs.last_message.clone() {
                let msg = message(hs, key, AUTH_CLASS, token);
                fx.sends.push(msg);
            }
            Ok(None)
        }
        Action::SendAuthRequest => {
            if let Some(token) = hs.auth_request.clone() {
                let msg = message(hs, key, AUTH_REQUEST_CLASS, token);
                fx.sends.push(msg);
            }
            Ok(None)
        }
        Action::Processed => {
            let handle = hs.handle.ok_or("no handshake handle")?;
            let remote = hs.remote_identity.ok_or("no remote identity")?;
            let secret = auth.get_shared_secret(handle).map_err(|e| e.to_string())?;
            let permissions = sec
                .plugins
                .access_control
                .validate_remote_permissions(hs.local_identity, remote)
                .map_err(|e| e.to_string())?;
            let crypto = sec
                .plugins
                .cryptography
                .register_matched_remote_participant(key.0, key.1, secret)
                .map_err(|e| e.to_string())?;
            hs.permissions = Some(permissions);
            hs.pair_crypto = Some(crypto);
            if let Some(p) = sec.pending.claim(key.1, key.0) {
                sec.plugins
                    .cryptography
                    .set_remote_participant_crypto_tokens(crypto, &p.tokens)
                    .map_err(|e| e.to_string())?;
                late.push(Event::CryptoTokensReceived);
            }
            Ok(None)
        }
        Action::SendCryptoTokens => {
            let Some(crypto) = hs.pair_crypto else {
                return Ok(Some(Event::Validation(ValidationResult::Failed)));
            };
            match sec.plugins.cryptography.create_local_participant_crypto_tokens(crypto) {
                Ok(tokens) => {
                    hs.seq += 1;
                    fx.sends.push(ParticipantGenericMessage::new(
                        key.0,
                        hs.seq,
                        key.1,
                        CryptoTokenKind::Participant.message_class(),
                        tokens,
                    ));
                    Ok(Some(Event::Validation(ValidationResult::Ok)))
                }
                Err(e) => {
                    log::warn!("[crypto] creating participant tokens failed: {}", e);
                    Ok(Some(Event::Validation(ValidationResult::Failed)))
                }
            }
        }
        Action::ScheduleTimer(d) => {
            if let Some(t) = hs.timer.take() {
                ctx.events.cancel(t);
            }
            hs.generation += 1;
            hs.timer = Some(ctx.events.schedule(
                ctx.now() + d,
                DomainEvent::Handshake {
                    local: key.0,
                    remote: key.1,
                    generation: hs.generation,
                },
            ));
            Ok(None)
        }
        Action::Done(mut outcome) => {
            if outcome == Outcome::Ok && hs.pair_crypto.is_none() {
                // identity accepted without a handshake: no shared secret
                if let Err(reason) = register_without_handshake(sec, key, hs) {
                    log::error!("[handshake] {:?} <-> {:?}: {}", key.0, key.1, reason);
                    outcome = Outcome::Failed;
                }
            }
            fx.outcome = Some((outcome, hs.pair_crypto, hs.permissions));
            Ok(None)
        }
    }
}

fn register_without_handshake(sec: &SecurityContext, key: PairKey, hs: &mut Handshake) -> Result<(), String> {
    let remote = hs.remote_identity.ok_or("no remote identity")?;
    let permissions = sec
        .plugins
        .access_control
        .validate_remote_permissions(hs.local_identity, remote)
        .map_err(|e| e.to_string())?;
    let crypto = sec
        .plugins
        .cryptography
        .register_matched_remote_participant(key.0, key.1, NO_SHARED_SECRET)
        .map_err(|e| e.to_string())?;
    hs.permissions = Some(permissions);
    hs.pair_crypto = Some(crypto);
    Ok(())
}

fn note_step(hs: &mut Handshake, handle: Option<HandshakeHandle>, message: Option<DataHolder>) {
    if handle.is_some() {
        hs.handle = handle;
    }
    if message.is_some() {
        hs.last_message = message;
    }
}

fn release(ctx: &DomainContext, sec: &SecurityContext, hs: &Handshake) {
    for t in [hs.timer, hs.timeout_timer].into_iter().flatten() {
        ctx.events.cancel(t);
    }
    if let Some(h) = hs.handle {
        sec.plugins.authentication.return_handshake_handle(h);
    }
}

fn finish(
    ctx: &DomainContext,
    sec: &SecurityContext,
    key: PairKey,
    outcome: Outcome,
    crypto: Option<CryptoHandle>,
    permissions: Option<PermissionsHandle>,
) {
    let (Some(pp), Some(proxypp)) = (ctx.index.participant(&key.0), ctx.index.proxy_participant(&key.1)) else {
        return;
    };
    let rematch = {
        let mut st = pp.state.lock();
        match (outcome, crypto, permissions) {
            (Outcome::Ok, Some(crypto), Some(permissions)) => {
                log::info!("[handshake] {:?} <-> {:?} authenticated", key.0, key.1);
                st.proxypp.insert(key.1, PairAuth::Authenticated { crypto, permissions });
                true
            }
            _ => {
                log::error!("[handshake] {:?} <-> {:?} failed: {:?}", key.0, key.1, outcome);
                if pp.security.as_ref().is_some_and(|s| s.allow_unauthenticated) {
                    st.proxypp.insert(key.1, PairAuth::Unauthenticated);
                    true
                } else {
                    st.proxypp.remove(&key.1);
                    false
                }
            }
        }
    };
    if rematch {
        rematch_proxy_participant(ctx, &proxypp);
    }
    if let Some(l) = &sec.handshakes.listener {
        l(key.0, key.1, outcome);
    }
}

/// Timer event of a handshake.
pub(crate) fn on_timer(ctx: &DomainContext, local: GUID, remote: GUID, generation: u64) {
    dispatch(ctx, local, remote, Event::Timer, Some(generation));
}

/// Global timeout of a handshake.
pub(crate) fn on_timeout(ctx: &DomainContext, local: GUID, remote: GUID) {
    dispatch(ctx, local, remote, Event::GlobalTimeout, None);
}

/// Incoming authentication message.
pub(crate) fn handle_auth_message(ctx: &DomainContext, msg: &ParticipantGenericMessage) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let (local, remote) = (msg.destination_participant, msg.source);
    let (Some(pp), Some(proxypp)) = (ctx.index.participant(&local), ctx.index.proxy_participant(&remote)) else {
        log::debug!("[handshake] auth message for unknown pair {:?} -> {:?}", remote, local);
        return;
    };
    if !pp.is_secure() {
        return;
    }
    let Some(classified) = classify_auth(msg) else {
        log::warn!("[handshake] unrecognized auth message class {}", msg.message_class);
        return;
    };
    begin(ctx, &pp, &proxypp);
    match classified {
        AuthMessage::AuthRequest(token) => {
            if let Some(hs) = sec.handshakes.table.lock().get_mut(&(local, remote)) {
                hs.received_auth_request = Some(token);
            }
        }
        AuthMessage::Handshake(kind, token) => {
            let ev = match kind {
                HandshakeKind::Request => Event::ReceivedRequest(token),
                HandshakeKind::Reply => Event::ReceivedReply(token),
                HandshakeKind::Final => Event::ReceivedFinal(token),
            };
            dispatch(ctx, local, remote, ev, None);
        }
    }
}

/// Remote participant tokens arrived; returns false if they must be parked.
pub(crate) fn participant_tokens_received(ctx: &DomainContext, local: GUID, remote: GUID, tokens: &[DataHolder]) -> bool {
    let Some(sec) = ctx.security.as_ref() else {
        return true;
    };
    let crypto = match sec.handshakes.pair_crypto(local, remote) {
        Some(Some(c)) => c,
        Some(None) => return false,
        None => match ctx.index.participant(&local).and_then(|pp| pp.pair_auth(&remote)) {
            Some(PairAuth::Authenticated { crypto, .. }) => crypto,
            _ => return false,
        },
    };
    if let Err(e) = sec.plugins.cryptography.set_remote_participant_crypto_tokens(crypto, tokens) {
        log::warn!("[crypto] rejecting participant tokens from {:?}: {}", remote, e);
        return true;
    }
    dispatch(ctx, local, remote, Event::CryptoTokensReceived, None);
    true
}

/// Drop every handshake involving `guid` (a local or proxy participant
/// being deleted).
pub(crate) fn forget(ctx: &DomainContext, guid: GUID) {
    let Some(sec) = ctx.security.as_ref() else {
        return;
    };
    let gone: Vec<Handshake> = {
        let mut table = sec.handshakes.table.lock();
        let keys: Vec<PairKey> = table.keys().filter(|(l, r)| *l == guid || *r == guid).copied().collect();
        keys.iter().filter_map(|k| table.remove(k)).collect()
    };
    for hs in &gone {
        release(ctx, sec, hs);
    }
    sec.pending.forget(guid);
}
