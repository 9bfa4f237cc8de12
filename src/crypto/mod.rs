//! Cryptographic primitives for muxtun
//!
//! This module provides:
//! - The challenge/response handshake that authenticates a hub
//! - HKDF-SHA256 derivation of the per-tunnel stream-cipher key
//! - Secure random number generation

mod auth;

pub use auth::{Authenticator, AuthResponse, CHALLENGE_LEN};

use thiserror::Error;

/// Length of the session (stream-cipher) key in bytes
pub const KEY_LEN: usize = 32;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).expect("Failed to generate random bytes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        random_bytes(&mut buf1);
        random_bytes(&mut buf2);
        assert_ne!(buf1, buf2);
    }
}
