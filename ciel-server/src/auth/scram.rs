//! SCRAM-SHA-256 primitives (RFC 5802 / RFC 7677, server side)
//!
//! The server stores only the derived verifier:
//!
//! ```text
//! SaltedPassword = PBKDF2-HMAC-SHA256(password, salt, iterations, 32)
//! ClientKey      = HMAC(SaltedPassword, "Client Key")
//! StoredKey      = SHA-256(ClientKey)
//! ServerKey      = HMAC(SaltedPassword, "Server Key")
//! ```
//!
//! During login the client proves knowledge of the password by sending
//! `ClientProof = ClientKey XOR HMAC(StoredKey, AuthMessage)`; the server
//! recovers the client key by XOR and compares its hash against StoredKey in
//! constant time. The password itself never crosses the wire.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Default PBKDF2 iteration count for newly derived credentials
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Salt length in bytes for newly derived credentials
pub const SALT_LEN: usize = 16;

/// Server nonce random-part length in bytes
pub const SERVER_NONCE_LEN: usize = 18;

/// Session id length in bytes before encoding
pub const SESSION_ID_LEN: usize = 18;

/// Constant GS2 channel-binding marker for "no channel binding"
const CHANNEL_BINDING: &str = "biws";

/// Derived password verifier
///
/// Both keys are 32 bytes (SHA-256 width). The salted password is never
/// retained.
#[derive(Clone, PartialEq, Eq)]
pub struct Verifier {
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        f.debug_struct("Verifier").finish_non_exhaustive()
    }
}

/// Derive the stored-key / server-key pair for a password
pub fn derive_verifier(password: &str, salt: &[u8], iterations: u32) -> Verifier {
    let mut salted_password = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted_password);

    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = sha256(&client_key);
    let server_key = hmac_sha256(&salted_password, b"Server Key");

    Verifier {
        stored_key,
        server_key,
    }
}

/// Build the canonical auth message for proof verification
///
/// Layout: `client-first-bare , server-first , client-final-without-proof`,
/// i.e. `n=U,r=C` + `r=CS,s=SALT,i=N` + `c=biws,r=CS`.
pub fn build_auth_message(
    username: &str,
    client_nonce: &str,
    server_nonce: &str,
    salt_b64: &str,
    iterations: u32,
    client_final_nonce: &str,
) -> String {
    format!(
        "n={},r={},r={},s={},i={},c={},r={}",
        username, client_nonce, server_nonce, salt_b64, iterations, CHANNEL_BINDING,
        client_final_nonce
    )
}

/// Verify a client proof against the stored key
///
/// Returns `Ok(false)` on a mismatched proof; `Err(InvalidRequest)` only for
/// malformed input (bad base64, wrong length).
pub fn verify_client_proof(stored_key: &[u8; 32], auth_message: &str, proof_b64: &str) -> Result<bool> {
    let proof = BASE64_STANDARD
        .decode(proof_b64)
        .map_err(|_| Error::InvalidRequest("malformed proof encoding".to_string()))?;

    if proof.len() != 32 {
        return Err(Error::InvalidRequest("malformed proof length".to_string()));
    }

    // ClientSignature = HMAC(StoredKey, AuthMessage)
    let client_signature = hmac_sha256(stored_key, auth_message.as_bytes());

    // ClientKey = ClientProof XOR ClientSignature
    let mut client_key = [0u8; 32];
    for (out, (p, s)) in client_key
        .iter_mut()
        .zip(proof.iter().zip(client_signature.iter()))
    {
        *out = p ^ s;
    }

    let candidate = sha256(&client_key);
    Ok(constant_time_eq(&candidate, stored_key))
}

/// Constant-time equality over byte slices
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Generate a random salt for credential derivation
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate the random part of the server nonce (base64url, no padding)
pub fn generate_server_nonce_part() -> String {
    random_b64url(SERVER_NONCE_LEN)
}

/// Generate a fresh challenge-session id (base64url, no padding)
pub fn generate_session_id() -> String {
    random_b64url(SESSION_ID_LEN)
}

fn random_b64url(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(&bytes)
}

/// HMAC-SHA-256 helper
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// SHA-256 helper
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compute the proof a well-behaved client would send.
    fn client_proof(
        password: &str,
        salt: &[u8],
        iterations: u32,
        auth_message: &str,
    ) -> String {
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted_password);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        BASE64_STANDARD.encode(proof)
    }

    #[test]
    fn derive_verifier_is_deterministic() {
        let salt = b"salt1234salt1234";
        let a = derive_verifier("Password1", salt, 1000);
        let b = derive_verifier("Password1", salt, 1000);
        assert_eq!(a.stored_key, b.stored_key);
        assert_eq!(a.server_key, b.server_key);

        let c = derive_verifier("Password2", salt, 1000);
        assert_ne!(a.stored_key, c.stored_key);
    }

    #[test]
    fn auth_message_layout_is_exact() {
        let msg = build_auth_message("alice", "cnonce", "cnonceSERVER", "c2FsdA==", 1000, "cnonceSERVER");
        assert_eq!(
            msg,
            "n=alice,r=cnonce,r=cnonceSERVER,s=c2FsdA==,i=1000,c=biws,r=cnonceSERVER"
        );
    }

    #[test]
    fn proof_round_trip_verifies() {
        let salt = b"0123456789abcdef";
        let iterations = 1000;
        let verifier = derive_verifier("Password1", salt, iterations);

        let salt_b64 = BASE64_STANDARD.encode(salt);
        let server_nonce = "cnonceXYZrandom";
        let auth_message =
            build_auth_message("alice", "cnonce", server_nonce, &salt_b64, iterations, server_nonce);

        let proof = client_proof("Password1", salt, iterations, &auth_message);
        assert!(verify_client_proof(&verifier.stored_key, &auth_message, &proof).unwrap());
    }

    #[test]
    fn wrong_password_fails_verification() {
        let salt = b"0123456789abcdef";
        let iterations = 1000;
        let verifier = derive_verifier("Password1", salt, iterations);

        let salt_b64 = BASE64_STANDARD.encode(salt);
        let auth_message =
            build_auth_message("alice", "cnonce", "cnonceS", &salt_b64, iterations, "cnonceS");

        let proof = client_proof("WrongPass9", salt, iterations, &auth_message);
        assert!(!verify_client_proof(&verifier.stored_key, &auth_message, &proof).unwrap());
    }

    #[test]
    fn tampered_auth_message_fails_verification() {
        let salt = b"0123456789abcdef";
        let iterations = 1000;
        let verifier = derive_verifier("Password1", salt, iterations);
        let salt_b64 = BASE64_STANDARD.encode(salt);

        let genuine =
            build_auth_message("alice", "cnonce", "cnonceS", &salt_b64, iterations, "cnonceS");
        let proof = client_proof("Password1", salt, iterations, &genuine);

        let tampered =
            build_auth_message("mallory", "cnonce", "cnonceS", &salt_b64, iterations, "cnonceS");
        assert!(!verify_client_proof(&verifier.stored_key, &tampered, &proof).unwrap());
    }

    #[test]
    fn malformed_proof_is_invalid_input_not_false() {
        let stored_key = [0u8; 32];
        assert!(matches!(
            verify_client_proof(&stored_key, "msg", "!!not-base64!!"),
            Err(Error::InvalidRequest(_))
        ));

        // Valid base64 of the wrong decoded length
        let short = BASE64_STANDARD.encode([1u8; 16]);
        assert!(matches!(
            verify_client_proof(&stored_key, "msg", &short),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn generated_material_has_expected_shape() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LEN);
        assert_ne!(generate_salt(), salt);

        let sid = generate_session_id();
        let decoded = BASE64_URL_SAFE_NO_PAD.decode(&sid).unwrap();
        assert!(decoded.len() >= 16);

        let nonce = generate_server_nonce_part();
        assert_ne!(nonce, generate_server_nonce_part());
        // base64url alphabet never contains ',' so nonces compose safely
        // into the auth message
        assert!(!nonce.contains(','));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
