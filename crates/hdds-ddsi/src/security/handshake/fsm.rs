// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handshake state machine.
//!
//! [`step`] is a pure transition function: plugin calls, sends and timers
//! are returned as [`Action`]s and the results of plugin calls come back in
//! as [`Event::Validation`]. The manager executes the actions.
//!
//! ```text
//!  requester                                replier
//!  ─────────                                ───────
//!  InitialDelay ─Timer─▶ ValidateRemoteIdentity ◀─Timer─ InitialDelay
//!        │                    │         │
//!   PendingHandshakeRequest   │    PendingHandshakeMessage
//!        ▼                    │         ▼
//!  BeginHandshakeRequest      │    WaitRequest (resend auth request)
//!        ▼ send request       │         ▼ ReceivedRequest
//!  WaitReply (resend)         │    BeginHandshakeReply
//!        ▼ ReceivedReply      │         ▼ send reply
//!  ProcessHandshake           │    WaitFinal (resend, dup request → resend)
//!        ▼ OkFinalMessage     │         ▼ ReceivedFinal
//!  WaitCryptoTokens           │    ProcessHandshake ─Ok─▶ SendCryptoTokens
//!        ▼ tokens received    │         ▼
//!  SendCryptoTokensFinal      │    WaitCryptoTokens
//!        ▼                    ▼         ▼ tokens received
//!                    ValidationOk
//! ```
//!
//! `*RetryWait` states wait the retry interval after a PendingRetry. Any
//! non-terminal state goes to `TimedOut` on the global timeout.

use std::time::Duration;

use super::super::exchange::DataHolder;
use super::super::plugins::ValidationResult;

/// Side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Requester,
    Replier,
}

/// Handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    InitialDelay,
    ValidateRemoteIdentity,
    ValidateRemoteIdentityRetryWait,
    /// Request arrived before validation; validate, then reply to it.
    ValidateRemoteAndBeginReply { request: DataHolder },
    BeginHandshakeRequest,
    BeginHandshakeRequestRetryWait,
    WaitRequest,
    BeginHandshakeReply { request: DataHolder },
    BeginHandshakeReplyRetryWait { request: DataHolder },
    WaitReply,
    WaitFinal,
    ProcessHandshake { role: Role, message: DataHolder },
    ProcessHandshakeRetryWait { role: Role, message: DataHolder },
    SendCryptoTokens,
    SendCryptoTokensWait,
    WaitCryptoTokens { role: Role },
    SendCryptoTokensFinal,
    SendCryptoTokensFinalWait,
    ValidationOk,
    ValidationFailed,
    TimedOut,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::ValidationOk | State::ValidationFailed | State::TimedOut)
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::InitialDelay => "initial-delay",
            State::ValidateRemoteIdentity => "validate-remote-identity",
            State::ValidateRemoteIdentityRetryWait => "validate-remote-identity-retry-wait",
            State::ValidateRemoteAndBeginReply { .. } => "validate-remote-and-begin-reply",
            State::BeginHandshakeRequest => "begin-handshake-request",
            State::BeginHandshakeRequestRetryWait => "begin-handshake-request-retry-wait",
            State::WaitRequest => "wait-request",
            State::BeginHandshakeReply { .. } => "begin-handshake-reply",
            State::BeginHandshakeReplyRetryWait { .. } => "begin-handshake-reply-retry-wait",
            State::WaitReply => "wait-reply",
            State::WaitFinal => "wait-final",
            State::ProcessHandshake { .. } => "process-handshake",
            State::ProcessHandshakeRetryWait { .. } => "process-handshake-retry-wait",
            State::SendCryptoTokens => "send-crypto-tokens",
            State::SendCryptoTokensWait => "send-crypto-tokens-wait",
            State::WaitCryptoTokens { .. } => "wait-crypto-tokens",
            State::SendCryptoTokensFinal => "send-crypto-tokens-final",
            State::SendCryptoTokensFinalWait => "send-crypto-tokens-final-wait",
            State::ValidationOk => "validation-ok",
            State::ValidationFailed => "validation-failed",
            State::TimedOut => "timed-out",
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Initial-delay, retry or resend timer fired.
    Timer,
    GlobalTimeout,
    ReceivedRequest(DataHolder),
    ReceivedReply(DataHolder),
    ReceivedFinal(DataHolder),
    CryptoTokensReceived,
    /// Result of the plugin call or token send requested last.
    Validation(ValidationResult),
    /// Post-handshake processing (secret, permissions) failed.
    ProcessingFailed,
}

/// Final outcome reported to the end callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed,
    TimedOut,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CallValidateRemoteIdentity,
    CallBeginHandshakeRequest,
    CallBeginHandshakeReply { request: DataHolder },
    CallProcessHandshake { message: DataHolder },
    /// Re-send the last outbound handshake token.
    SendLast,
    /// Send the auth-request token obtained from validation.
    SendAuthRequest,
    /// Create and send participant crypto tokens; result comes back as
    /// `Validation(Ok)` or `Validation(Failed)`.
    SendCryptoTokens,
    /// Handshake validated: fetch the shared secret, check permissions and
    /// register the participant pair with the crypto plugin.
    Processed,
    ScheduleTimer(Duration),
    Done(Outcome),
}

/// Timer intervals used by the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub initial_delay: Duration,
    pub retry: Duration,
    pub resend: Duration,
}

/// Initial state and actions of a new handshake.
pub fn start(timing: &Timing) -> (State, Vec<Action>) {
    (State::InitialDelay, vec![Action::ScheduleTimer(timing.initial_delay)])
}

fn failed() -> (State, Vec<Action>) {
    (State::ValidationFailed, vec![Action::Done(Outcome::Failed)])
}

fn retry(next: State, t: &Timing) -> (State, Vec<Action>) {
    (next, vec![Action::ScheduleTimer(t.retry)])
}

fn wait_and_resend(next: State, t: &Timing) -> (State, Vec<Action>) {
    (next, vec![Action::SendLast, Action::ScheduleTimer(t.resend)])
}

/// Transition function.
pub fn step(state: State, event: Event, t: &Timing) -> (State, Vec<Action>) {
    use Action as A;
    use Event as E;
    use State as S;
    use ValidationResult as V;

    if state.is_terminal() {
        return (state, Vec::new());
    }
    match (state, event) {
        (_, E::GlobalTimeout) => (S::TimedOut, vec![A::Done(Outcome::TimedOut)]),
        (_, E::ProcessingFailed) => failed(),

        (S::InitialDelay, E::Timer) | (S::ValidateRemoteIdentityRetryWait, E::Timer) => {
            (S::ValidateRemoteIdentity, vec![A::CallValidateRemoteIdentity])
        }
        (S::InitialDelay, E::ReceivedRequest(request))
        | (S::ValidateRemoteIdentityRetryWait, E::ReceivedRequest(request)) => {
            (S::ValidateRemoteAndBeginReply { request }, vec![A::CallValidateRemoteIdentity])
        }

        (S::ValidateRemoteIdentity, E::Validation(r)) => match r {
            V::Ok => (S::ValidationOk, vec![A::Done(Outcome::Ok)]),
            V::PendingRetry => retry(S::ValidateRemoteIdentityRetryWait, t),
            V::PendingHandshakeRequest => (S::BeginHandshakeRequest, vec![A::CallBeginHandshakeRequest]),
            V::PendingHandshakeMessage => {
                (S::WaitRequest, vec![A::SendAuthRequest, A::ScheduleTimer(t.resend)])
            }
            V::Failed | V::OkFinalMessage => failed(),
        },
        (S::ValidateRemoteAndBeginReply { request }, E::Validation(r)) => match r {
            V::Ok => (S::ValidationOk, vec![A::Done(Outcome::Ok)]),
            V::PendingRetry => retry(S::ValidateRemoteIdentityRetryWait, t),
            V::PendingHandshakeRequest => (S::BeginHandshakeRequest, vec![A::CallBeginHandshakeRequest]),
            V::PendingHandshakeMessage => (
                S::BeginHandshakeReply {
                    request: request.clone(),
                },
                vec![A::CallBeginHandshakeReply { request }],
            ),
            V::Failed | V::OkFinalMessage => failed(),
        },

        (S::BeginHandshakeRequest, E::Validation(r)) => match r {
            V::PendingHandshakeMessage => wait_and_resend(S::WaitReply, t),
            V::PendingRetry => retry(S::BeginHandshakeRequestRetryWait, t),
            _ => failed(),
        },
        (S::BeginHandshakeRequestRetryWait, E::Timer) => {
            (S::BeginHandshakeRequest, vec![A::CallBeginHandshakeRequest])
        }

        (S::WaitRequest, E::Timer) => (S::WaitRequest, vec![A::SendAuthRequest, A::ScheduleTimer(t.resend)]),
        (S::WaitRequest, E::ReceivedRequest(request)) => (
            S::BeginHandshakeReply {
                request: request.clone(),
            },
            vec![A::CallBeginHandshakeReply { request }],
        ),

        (S::BeginHandshakeReply { request }, E::Validation(r)) => match r {
            V::PendingHandshakeMessage => wait_and_resend(S::WaitFinal, t),
            V::PendingRetry => retry(S::BeginHandshakeReplyRetryWait { request }, t),
            _ => failed(),
        },
        (S::BeginHandshakeReplyRetryWait { request }, E::Timer) => (
            S::BeginHandshakeReply {
                request: request.clone(),
            },
            vec![A::CallBeginHandshakeReply { request }],
        ),

        (S::WaitReply, E::Timer) => wait_and_resend(S::WaitReply, t),
        (S::WaitReply, E::ReceivedReply(message)) => (
            S::ProcessHandshake {
                role: Role::Requester,
                message: message.clone(),
            },
            vec![A::CallProcessHandshake { message }],
        ),

        (S::WaitFinal, E::Timer) => wait_and_resend(S::WaitFinal, t),
        // duplicate request: our reply got lost
        (S::WaitFinal, E::ReceivedRequest(_)) => (S::WaitFinal, vec![A::SendLast]),
        (S::WaitFinal, E::ReceivedFinal(message)) => (
            S::ProcessHandshake {
                role: Role::Replier,
                message: message.clone(),
            },
            vec![A::CallProcessHandshake { message }],
        ),

        (S::ProcessHandshake { role, message }, E::Validation(r)) => match (role, r) {
            (Role::Requester, V::OkFinalMessage) => (
                S::WaitCryptoTokens { role },
                vec![A::SendLast, A::Processed],
            ),
            (Role::Replier, V::Ok) => (S::SendCryptoTokens, vec![A::Processed, A::SendCryptoTokens]),
            (Role::Requester, V::PendingHandshakeMessage) => wait_and_resend(S::WaitReply, t),
            (Role::Replier, V::PendingHandshakeMessage) => wait_and_resend(S::WaitFinal, t),
            (_, V::PendingRetry) => retry(S::ProcessHandshakeRetryWait { role, message }, t),
            _ => failed(),
        },
        (S::ProcessHandshakeRetryWait { role, message }, E::Timer) => (
            S::ProcessHandshake {
                role,
                message: message.clone(),
            },
            vec![A::CallProcessHandshake { message }],
        ),

        (S::SendCryptoTokens, E::Validation(V::Ok)) => (S::WaitCryptoTokens { role: Role::Replier }, Vec::new()),
        (S::SendCryptoTokens, E::Validation(_)) => retry(S::SendCryptoTokensWait, t),
        (S::SendCryptoTokensWait, E::Timer) => (S::SendCryptoTokens, vec![A::SendCryptoTokens]),
        // tokens can overtake our own send
        (S::SendCryptoTokens, E::CryptoTokensReceived) | (S::SendCryptoTokensWait, E::CryptoTokensReceived) => {
            (S::SendCryptoTokensFinal, vec![A::SendCryptoTokens])
        }

        (S::WaitCryptoTokens { role: Role::Requester }, E::CryptoTokensReceived) => {
            (S::SendCryptoTokensFinal, vec![A::SendCryptoTokens])
        }
        (S::WaitCryptoTokens { role: Role::Replier }, E::CryptoTokensReceived) => {
            (S::ValidationOk, vec![A::Done(Outcome::Ok)])
        }
        // replier resent its reply: our final got lost
        (S::WaitCryptoTokens { role: Role::Requester }, E::ReceivedReply(_)) => {
            (S::WaitCryptoTokens { role: Role::Requester }, vec![A::SendLast])
        }

        (S::SendCryptoTokensFinal, E::Validation(V::Ok)) => (S::ValidationOk, vec![A::Done(Outcome::Ok)]),
        (S::SendCryptoTokensFinal, E::Validation(_)) => retry(S::SendCryptoTokensFinalWait, t),
        (S::SendCryptoTokensFinalWait, E::Timer) => (S::SendCryptoTokensFinal, vec![A::SendCryptoTokens]),

        (state, event) => {
            log::trace!("[handshake] ignoring {:?} in state {}", event, state.name());
            (state, Vec::new())
        }
    }
}
