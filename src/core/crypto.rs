//! HMAC signing, SHA-256 hashing, and supervisor secret management.

use std::fmt;

use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::core::canonical::canonical_json;

/// Environment variable holding the base64-encoded supervisor secret.
pub const SECRET_ENV_VAR: &str = "SUPERVISOR_SECRET";

const MIN_SECRET_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `input`, lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// HMAC-SHA-256 of the canonical form of `payload`, lowercase hex.
///
/// The payload must not contain the `supervisorSig` field.
pub fn sign_event(secret: &[u8], payload: &Value) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(canonical_json(payload).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `sig_hex` against the canonical form of `payload` in constant time.
pub fn verify_event_sig(secret: &[u8], payload: &Value, sig_hex: &str) -> bool {
    let Ok(sig) = hex::decode(sig_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(canonical_json(payload).as_bytes());
    mac.verify_slice(&sig).is_ok()
}

/// Process-wide signing key for the supervisor.
///
/// Loaded from [`SECRET_ENV_VAR`] (base64, at least 32 decoded bytes) or
/// generated ephemerally with a warning. The raw bytes never leave this
/// crate and are zeroed on drop.
pub struct SupervisorSecret {
    bytes: Vec<u8>,
}

impl SupervisorSecret {
    /// Load the secret from the environment, falling back to an ephemeral one.
    pub fn load_from_env() -> Self {
        match std::env::var(SECRET_ENV_VAR) {
            Ok(raw) => match base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
                Ok(bytes) if bytes.len() >= MIN_SECRET_BYTES => return Self { bytes },
                Ok(bytes) => warn!(
                    decoded_len = bytes.len(),
                    "{SECRET_ENV_VAR} decodes to fewer than {MIN_SECRET_BYTES} bytes; using an ephemeral secret"
                ),
                Err(err) => {
                    warn!(%err, "{SECRET_ENV_VAR} is not valid base64; using an ephemeral secret");
                }
            },
            Err(_) => warn!("{SECRET_ENV_VAR} not set; using an ephemeral secret for this process"),
        }
        Self::ephemeral()
    }

    /// Generate a fresh random 32-byte secret.
    pub fn ephemeral() -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for SupervisorSecret {
    fn drop(&mut self) {
        for byte in &mut self.bytes {
            *byte = 0;
        }
    }
}

impl fmt::Debug for SupervisorSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SupervisorSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = [7u8; 32];
        let payload = json!({"kind": "spawn", "depth": 1});
        let sig = sign_event(&secret, &payload);
        assert!(verify_event_sig(&secret, &payload, &sig));
    }

    #[test]
    fn signature_is_key_order_independent() {
        let secret = [7u8; 32];
        let left: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).expect("parse");
        let right: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).expect("parse");
        assert_eq!(sign_event(&secret, &left), sign_event(&secret, &right));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let secret = [7u8; 32];
        let payload = json!({"kind": "spawn"});
        let sig = sign_event(&secret, &payload);
        assert!(!verify_event_sig(&secret, &json!({"kind": "return"}), &sig));
    }

    #[test]
    fn malformed_hex_fails_verification() {
        let secret = [7u8; 32];
        let payload = json!({"kind": "spawn"});
        assert!(!verify_event_sig(&secret, &payload, "zz-not-hex"));
    }

    #[test]
    fn ephemeral_secrets_differ() {
        let a = SupervisorSecret::ephemeral();
        let b = SupervisorSecret::ephemeral();
        assert_ne!(a.bytes(), b.bytes());
        assert_eq!(a.bytes().len(), 32);
    }

    #[test]
    fn debug_does_not_leak_bytes() {
        let secret = SupervisorSecret::from_bytes(vec![0xAB; 32]);
        assert_eq!(format!("{secret:?}"), "SupervisorSecret(..)");
    }
}
