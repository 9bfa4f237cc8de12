//! Challenge/response tunnel authentication
//!
//! Both peers share a secret. The server opens every tunnel by sending
//! a challenge block; the client proves knowledge of the secret by
//! returning a token computed over it, and both sides derive the
//! stream-cipher key for the tunnel from (secret, challenge).
//!
//! Block layout:
//! ```text
//! challenge = nonce[32] ‖ HMAC-SHA256(secret, nonce)[32]
//! token     = proof[32] ‖ HMAC-SHA256(secret, proof)[32]
//!             where proof = HMAC-SHA256(secret, challenge)
//! ```
//!
//! The session key is HKDF-SHA256(ikm = secret, info = challenge), so
//! it is deterministic in (secret, challenge) and never travels on the
//! wire.

use super::{random_bytes, CryptoError, KEY_LEN};
use ring::hkdf::{self, HKDF_SHA256};
use ring::{constant_time, hmac};

/// Handshake challenge/token length in bytes
pub const CHALLENGE_LEN: usize = 64;

/// Outcome of answering a challenge
pub struct AuthResponse {
    /// Token to return to the server
    pub token: [u8; CHALLENGE_LEN],
    /// Derived stream-cipher key for the tunnel
    pub session_key: [u8; KEY_LEN],
}

/// Shared-secret authenticator for the tunnel handshake
pub struct Authenticator {
    mac_key: hmac::Key,
    secret: Vec<u8>,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            mac_key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Build a fresh challenge block (issuing side of the exchange)
    pub fn issue_challenge(&self) -> [u8; CHALLENGE_LEN] {
        let mut challenge = [0u8; CHALLENGE_LEN];
        random_bytes(&mut challenge[..32]);
        let tag = hmac::sign(&self.mac_key, &challenge[..32]);
        challenge[32..].copy_from_slice(tag.as_ref());
        challenge
    }

    /// Answer a challenge, producing the token and the session key
    ///
    /// Fails with [`CryptoError::AuthenticationFailed`] if the
    /// challenge does not verify under the shared secret.
    pub fn respond(&self, challenge: &[u8; CHALLENGE_LEN]) -> Result<AuthResponse, CryptoError> {
        hmac::verify(&self.mac_key, &challenge[..32], &challenge[32..])
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let proof = hmac::sign(&self.mac_key, challenge);
        let echo = hmac::sign(&self.mac_key, proof.as_ref());

        let mut token = [0u8; CHALLENGE_LEN];
        token[..32].copy_from_slice(proof.as_ref());
        token[32..].copy_from_slice(echo.as_ref());

        Ok(AuthResponse {
            token,
            session_key: self.session_key(challenge)?,
        })
    }

    /// Check a returned token against the challenge it answers
    pub fn verify_token(&self, challenge: &[u8; CHALLENGE_LEN], token: &[u8]) -> bool {
        if token.len() != CHALLENGE_LEN {
            return false;
        }
        let proof = hmac::sign(&self.mac_key, challenge);
        let echo = hmac::sign(&self.mac_key, proof.as_ref());

        let mut expected = [0u8; CHALLENGE_LEN];
        expected[..32].copy_from_slice(proof.as_ref());
        expected[32..].copy_from_slice(echo.as_ref());

        constant_time::verify_slices_are_equal(&expected, token).is_ok()
    }

    /// Derive the tunnel's stream-cipher key from the challenge
    pub fn session_key(&self, challenge: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
        let salt = hkdf::Salt::new(HKDF_SHA256, &[0u8; 32]);
        let prk = salt.extract(&self.secret);

        let info = [challenge];
        let okm = prk
            .expand(&info, HkdfLen(KEY_LEN))
            .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;

        let mut key = [0u8; KEY_LEN];
        okm.fill(&mut key)
            .map_err(|_| CryptoError::KeyDerivation("HKDF fill failed".to_string()))?;
        Ok(key)
    }
}

/// Helper struct for HKDF output length
struct HkdfLen(usize);

impl hkdf::KeyType for HkdfLen {
    fn len(&self) -> usize {
        self.0
    }
}
