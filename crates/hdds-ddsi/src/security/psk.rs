// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pre-shared-key authentication plugin.
//!
//! Challenge-response over HMAC-SHA256 keyed by a secret every participant
//! of the deployment shares. The participant with the lower GUID initiates.
//!
//! ```text
//! Initiator (lower GUID)                     Responder
//!    |                                          |
//!    |---- Req   { guid_a, guid_b, nonce_a } -->|
//!    |                                          |
//!    |<--- Reply { nonce_a, nonce_b, mac_b } ---|  mac_b = HMAC(psk, "reply"|b|a|na|nb)
//!    | verify mac_b                             |
//!    |---- Final { nonce_a, nonce_b, mac_a } -->|  mac_a = HMAC(psk, "final"|a|b|na|nb)
//!    |                                          | verify mac_a
//! ```
//!
//! Both sides end with the same shared secret,
//! `HMAC(psk, "secret"|na|nb)`, which is zeroized when the plugin drops it.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use super::exchange::DataHolder;
use super::plugins::{
    Authentication, HandshakeHandle, HandshakeStep, IdentityHandle, RemoteIdentity, SharedSecretHandle,
    ValidationResult,
};
use super::SecurityError;
use crate::guid::GUID;

const CLASS_PREFIX: &str = "HDDS:Auth:PSK:1.0";
const NONCE_LEN: usize = 32;

/// Secret material that is wiped on drop.
struct Secret([u8; 32]);

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Initiator,
    Responder,
}

struct Session {
    side: Side,
    local: GUID,
    remote: GUID,
    nonce_a: [u8; NONCE_LEN],
    nonce_b: Option<[u8; NONCE_LEN]>,
    done: bool,
}

impl Session {
    fn initiator(&self) -> GUID {
        match self.side {
            Side::Initiator => self.local,
            Side::Responder => self.remote,
        }
    }

    fn responder(&self) -> GUID {
        match self.side {
            Side::Initiator => self.remote,
            Side::Responder => self.local,
        }
    }
}

/// [`Authentication`] backed by a pre-shared key.
pub struct PskAuthentication {
    key: hmac::Key,
    rng: SystemRandom,
    next: AtomicU64,
    identities: DashMap<IdentityHandle, GUID>,
    sessions: DashMap<HandshakeHandle, Session>,
    secrets: DashMap<SharedSecretHandle, Secret>,
}

impl PskAuthentication {
    /// Plugin keyed by `psk`. The caller's copy is not retained.
    pub fn new(psk: &[u8]) -> Result<Self, SecurityError> {
        if psk.is_empty() {
            return Err(SecurityError::ConfigurationError("empty pre-shared key".into()));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, psk),
            rng: SystemRandom::new(),
            next: AtomicU64::new(1),
            identities: DashMap::new(),
            sessions: DashMap::new(),
            secrets: DashMap::new(),
        })
    }

    fn handle(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn nonce(&self) -> Result<[u8; NONCE_LEN], SecurityError> {
        let mut n = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut n)
            .map_err(|_| SecurityError::CryptographicError("SystemRandom failed to generate nonce".into()))?;
        Ok(n)
    }

    fn mac(&self, label: &[u8], first: GUID, second: GUID, na: &[u8], nb: &[u8]) -> hmac::Tag {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(label);
        ctx.update(&first.as_bytes());
        ctx.update(&second.as_bytes());
        ctx.update(na);
        ctx.update(nb);
        ctx.sign()
    }

    fn verify(&self, label: &[u8], first: GUID, second: GUID, na: &[u8], nb: &[u8], tag: &[u8]) -> bool {
        let mut msg = Vec::with_capacity(label.len() + 32 + 2 * NONCE_LEN);
        msg.extend_from_slice(label);
        msg.extend_from_slice(&first.as_bytes());
        msg.extend_from_slice(&second.as_bytes());
        msg.extend_from_slice(na);
        msg.extend_from_slice(nb);
        hmac::verify(&self.key, &msg, tag).is_ok()
    }

    fn guid_of(&self, identity: IdentityHandle) -> Result<GUID, SecurityError> {
        self.identities
            .get(&identity)
            .map(|g| *g)
            .ok_or_else(|| SecurityError::ConfigurationError(format!("unknown identity handle {}", identity)))
    }

    /// Bytes of a shared secret, for a key factory that needs them.
    pub fn shared_secret_bytes(&self, handle: SharedSecretHandle) -> Option<[u8; 32]> {
        self.secrets.get(&handle).map(|s| s.0)
    }

    /// Forget a shared secret (wiping it).
    pub fn release_shared_secret(&self, handle: SharedSecretHandle) {
        self.secrets.remove(&handle);
    }

    fn failed(&self, handle: HandshakeHandle, why: &str) -> HandshakeStep {
        log::warn!("[handshake] psk handshake {} failed: {}", handle, why);
        self.sessions.remove(&handle);
        HandshakeStep::failed()
    }
}

impl std::fmt::Debug for PskAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskAuthentication")
            .field("identities", &self.identities.len())
            .field("sessions", &self.sessions.len())
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

fn token(kind: &str) -> DataHolder {
    DataHolder::new(format!("{}+{}", CLASS_PREFIX, kind))
}

fn nonce_from(t: &DataHolder, name: &str) -> Option<[u8; NONCE_LEN]> {
    let b = t.binary(name)?;
    <[u8; NONCE_LEN]>::try_from(b).ok()
}

fn guid_from(t: &DataHolder, name: &str) -> Option<GUID> {
    let b = t.binary(name)?;
    <[u8; 16]>::try_from(b).ok().map(GUID::from_bytes)
}

impl Authentication for PskAuthentication {
    fn validate_local_identity(&self, participant: GUID) -> Result<IdentityHandle, SecurityError> {
        let h = self.handle();
        self.identities.insert(h, participant);
        Ok(h)
    }

    fn validate_remote_identity(
        &self,
        local: IdentityHandle,
        remote: GUID,
        _remote_auth_request: Option<&DataHolder>,
    ) -> RemoteIdentity {
        let Ok(local_guid) = self.guid_of(local) else {
            return RemoteIdentity {
                result: ValidationResult::Failed,
                identity: None,
                auth_request: None,
            };
        };
        let h = self.handle();
        self.identities.insert(h, remote);
        let result = if local_guid < remote {
            ValidationResult::PendingHandshakeRequest
        } else {
            ValidationResult::PendingHandshakeMessage
        };
        RemoteIdentity {
            result,
            identity: Some(h),
            auth_request: None,
        }
    }

    fn begin_handshake_request(&self, local: IdentityHandle, remote: IdentityHandle) -> HandshakeStep {
        let (Ok(a), Ok(b)) = (self.guid_of(local), self.guid_of(remote)) else {
            return HandshakeStep::failed();
        };
        let Ok(na) = self.nonce() else {
            return HandshakeStep::failed();
        };
        let h = self.handle();
        self.sessions.insert(
            h,
            Session {
                side: Side::Initiator,
                local: a,
                remote: b,
                nonce_a: na,
                nonce_b: None,
                done: false,
            },
        );
        let msg = token("Req")
            .with_binary("guid_a", a.as_bytes().to_vec())
            .with_binary("guid_b", b.as_bytes().to_vec())
            .with_binary("nonce_a", na.to_vec());
        HandshakeStep {
            result: ValidationResult::PendingHandshakeMessage,
            handshake: Some(h),
            message: Some(msg),
        }
    }

    fn begin_handshake_reply(&self, local: IdentityHandle, remote: IdentityHandle, request: &DataHolder) -> HandshakeStep {
        let (Ok(b), Ok(a)) = (self.guid_of(local), self.guid_of(remote)) else {
            return HandshakeStep::failed();
        };
        let (Some(na), Some(ga), Some(gb)) =
            (nonce_from(request, "nonce_a"), guid_from(request, "guid_a"), guid_from(request, "guid_b"))
        else {
            log::warn!("[handshake] malformed psk request from {:?}", a);
            return HandshakeStep::failed();
        };
        if ga != a || gb != b {
            log::warn!("[handshake] psk request names {:?} -> {:?}, expected {:?} -> {:?}", ga, gb, a, b);
            return HandshakeStep::failed();
        }
        let Ok(nb) = self.nonce() else {
            return HandshakeStep::failed();
        };
        let tag = self.mac(b"reply", b, a, &na, &nb);
        let h = self.handle();
        self.sessions.insert(
            h,
            Session {
                side: Side::Responder,
                local: b,
                remote: a,
                nonce_a: na,
                nonce_b: Some(nb),
                done: false,
            },
        );
        let msg = token("Reply")
            .with_binary("nonce_a", na.to_vec())
            .with_binary("nonce_b", nb.to_vec())
            .with_binary("mac", tag.as_ref().to_vec());
        HandshakeStep {
            result: ValidationResult::PendingHandshakeMessage,
            handshake: Some(h),
            message: Some(msg),
        }
    }

    fn process_handshake(&self, handle: HandshakeHandle, message: &DataHolder) -> HandshakeStep {
        let Some(mut s) = self.sessions.get_mut(&handle) else {
            return HandshakeStep::failed();
        };
        let (Some(na), Some(nb), Some(tag)) =
            (nonce_from(message, "nonce_a"), nonce_from(message, "nonce_b"), message.binary("mac"))
        else {
            drop(s);
            return self.failed(handle, "malformed token");
        };
        if na != s.nonce_a || s.nonce_b.is_some_and(|own| own != nb) {
            drop(s);
            return self.failed(handle, "nonce mismatch");
        }
        let (a, b) = (s.initiator(), s.responder());
        match s.side {
            Side::Initiator => {
                if !self.verify(b"reply", b, a, &na, &nb, tag) {
                    drop(s);
                    return self.failed(handle, "reply MAC does not verify");
                }
                s.nonce_b = Some(nb);
                s.done = true;
                let mine = self.mac(b"final", a, b, &na, &nb);
                let msg = token("Final")
                    .with_binary("nonce_a", na.to_vec())
                    .with_binary("nonce_b", nb.to_vec())
                    .with_binary("mac", mine.as_ref().to_vec());
                HandshakeStep {
                    result: ValidationResult::OkFinalMessage,
                    handshake: Some(handle),
                    message: Some(msg),
                }
            }
            Side::Responder => {
                if !self.verify(b"final", a, b, &na, &nb, tag) {
                    drop(s);
                    return self.failed(handle, "final MAC does not verify");
                }
                s.done = true;
                HandshakeStep {
                    result: ValidationResult::Ok,
                    handshake: Some(handle),
                    message: None,
                }
            }
        }
    }

    fn get_shared_secret(&self, handshake: HandshakeHandle) -> Result<SharedSecretHandle, SecurityError> {
        let s = self
            .sessions
            .get(&handshake)
            .ok_or_else(|| SecurityError::ConfigurationError(format!("unknown handshake {}", handshake)))?;
        let nb = match (s.done, s.nonce_b) {
            (true, Some(nb)) => nb,
            _ => return Err(SecurityError::AuthenticationFailed("handshake not complete".into())),
        };
        let tag = {
            let mut ctx = hmac::Context::with_key(&self.key);
            ctx.update(b"secret");
            ctx.update(&s.nonce_a);
            ctx.update(&nb);
            ctx.sign()
        };
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(tag.as_ref());
        let h = self.handle();
        self.secrets.insert(h, Secret(bytes));
        bytes.zeroize();
        Ok(h)
    }

    fn return_handshake_handle(&self, handshake: HandshakeHandle) {
        self.sessions.remove(&handshake);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(b: u8) -> GUID {
        GUID::participant([b; 12])
    }

    struct Run {
        a_secret: Option<[u8; 32]>,
        b_secret: Option<[u8; 32]>,
        b_result: ValidationResult,
    }

    fn run(key_a: &[u8], key_b: &[u8]) -> Run {
        let pa = PskAuthentication::new(key_a).expect("psk");
        let pb = PskAuthentication::new(key_b).expect("psk");
        let (ga, gb) = (guid(1), guid(2));
        let la = pa.validate_local_identity(ga).expect("local a");
        let lb = pb.validate_local_identity(gb).expect("local b");
        let ra = pa.validate_remote_identity(la, gb, None);
        let rb = pb.validate_remote_identity(lb, ga, None);
        assert_eq!(ra.result, ValidationResult::PendingHandshakeRequest, "lower GUID initiates");
        assert_eq!(rb.result, ValidationResult::PendingHandshakeMessage, "higher GUID waits");

        let req = pa.begin_handshake_request(la, ra.identity.expect("id"));
        let reply = pb.begin_handshake_reply(lb, rb.identity.expect("id"), req.message.as_ref().expect("req"));
        assert_eq!(reply.result, ValidationResult::PendingHandshakeMessage);
        let fin = pa.process_handshake(req.handshake.expect("h"), reply.message.as_ref().expect("reply"));
        if fin.result != ValidationResult::OkFinalMessage {
            return Run {
                a_secret: None,
                b_secret: None,
                b_result: ValidationResult::Failed,
            };
        }
        let done = pb.process_handshake(reply.handshake.expect("h"), fin.message.as_ref().expect("final"));
        let a_secret = pa
            .get_shared_secret(req.handshake.expect("h"))
            .ok()
            .and_then(|h| pa.shared_secret_bytes(h));
        let b_secret = pb
            .get_shared_secret(reply.handshake.expect("h"))
            .ok()
            .and_then(|h| pb.shared_secret_bytes(h));
        Run {
            a_secret,
            b_secret,
            b_result: done.result,
        }
    }

    #[test]
    fn test_matching_keys_agree_on_secret() {
        let r = run(b"deployment-secret", b"deployment-secret");
        assert_eq!(r.b_result, ValidationResult::Ok);
        assert!(r.a_secret.is_some(), "initiator has a secret");
        assert_eq!(r.a_secret, r.b_secret, "both sides derive the same secret");
    }

    #[test]
    fn test_mismatched_keys_fail() {
        let r = run(b"one", b"two");
        assert_eq!(r.b_result, ValidationResult::Failed);
        assert!(r.a_secret.is_none());
    }

    #[test]
    fn test_tampered_final_is_rejected() {
        let pa = PskAuthentication::new(b"k").expect("psk");
        let pb = PskAuthentication::new(b"k").expect("psk");
        let la = pa.validate_local_identity(guid(1)).expect("a");
        let lb = pb.validate_local_identity(guid(2)).expect("b");
        let ra = pa.validate_remote_identity(la, guid(2), None).identity.expect("id");
        let rb = pb.validate_remote_identity(lb, guid(1), None).identity.expect("id");
        let req = pa.begin_handshake_request(la, ra);
        let reply = pb.begin_handshake_reply(lb, rb, req.message.as_ref().expect("req"));
        let fin = pa.process_handshake(req.handshake.expect("h"), reply.message.as_ref().expect("reply"));
        let mut bad = fin.message.expect("final");
        for (name, v) in &mut bad.binary_properties {
            if name == "mac" {
                v[0] ^= 0xff;
            }
        }
        let r = pb.process_handshake(reply.handshake.expect("h"), &bad);
        assert_eq!(r.result, ValidationResult::Failed, "tampered MAC must fail");
    }

    #[test]
    fn test_request_for_someone_else_is_rejected() {
        let pa = PskAuthentication::new(b"k").expect("psk");
        let pb = PskAuthentication::new(b"k").expect("psk");
        let la = pa.validate_local_identity(guid(1)).expect("a");
        let ra = pa.validate_remote_identity(la, guid(3), None).identity.expect("id");
        let req = pa.begin_handshake_request(la, ra);
        let lb = pb.validate_local_identity(guid(2)).expect("b");
        let rb = pb.validate_remote_identity(lb, guid(1), None).identity.expect("id");
        let r = pb.begin_handshake_reply(lb, rb, req.message.as_ref().expect("req"));
        assert_eq!(r.result, ValidationResult::Failed);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(PskAuthentication::new(b"").is_err());
    }
}
