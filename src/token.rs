//! Sealing CAPTCHA solutions into opaque, authenticated, timestamped
//! tokens.
//!
//! The key lives exactly as long as the engine that generated it, so
//! restarting an engine invalidates every outstanding token.

use fernet::Fernet;

/// Why a token failed to unseal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenError {
    /// Authentic, but older than the configured lifetime.
    Expired,
    /// Forged, garbled, sealed under another key, or not UTF-8 inside.
    Invalid,
}

pub(crate) struct TokenCodec {
    fernet: Fernet,
}

impl TokenCodec {
    /// Codec around a freshly generated key.
    pub(crate) fn new() -> Self {
        let key = Fernet::generate_key();
        TokenCodec {
            fernet: Fernet::new(&key).expect("freshly generated key is well formed"),
        }
    }

    /// Seals `solution` with the creation timestamp baked in.
    pub(crate) fn seal(&self, solution: &str) -> String {
        self.fernet.encrypt(solution.as_bytes())
    }

    /// Unseals a token no older than `ttl_secs`.
    pub(crate) fn unseal(&self, token: &str, ttl_secs: u64) -> Result<String, TokenError> {
        match self.fernet.decrypt_with_ttl(token, ttl_secs) {
            Ok(plaintext) => String::from_utf8(plaintext).map_err(|_| TokenError::Invalid),
            // age is the only difference between a TTL-checked and an
            // unchecked decrypt
            Err(_) if self.fernet.decrypt(token).is_ok() => Err(TokenError::Expired),
            Err(_) => Err(TokenError::Invalid),
        }
    }

    /// Whether a previously accepted token has now outlived `ttl_secs`.
    pub(crate) fn is_expired(&self, token: &str, ttl_secs: u64) -> bool {
        self.unseal(token, ttl_secs) == Err(TokenError::Expired)
    }
}

#[cfg(test)]
mod token_test {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn seal_unseal_round_trip() {
        let codec = TokenCodec::new();
        let token = codec.seal("tr4pp3d");
        assert_eq!(codec.unseal(&token, 600).as_deref(), Ok("tr4pp3d"));
        // tokens stay opaque: the solution never appears in the token
        assert!(!token.contains("tr4pp3d"));
    }

    #[test]
    fn tampering_invalidates() {
        let codec = TokenCodec::new();
        let token = codec.seal("abc123");
        let mut garbled = token.into_bytes();
        let mid = garbled.len() / 2;
        garbled[mid] = if garbled[mid] == b'A' { b'B' } else { b'A' };
        let garbled = String::from_utf8(garbled).unwrap();
        assert_eq!(codec.unseal(&garbled, 600), Err(TokenError::Invalid));
    }

    #[test]
    fn foreign_key_invalidates() {
        let token = TokenCodec::new().seal("abc123");
        assert_eq!(TokenCodec::new().unseal(&token, 600), Err(TokenError::Invalid));
    }

    #[test]
    fn old_tokens_expire() {
        let codec = TokenCodec::new();
        let token = codec.seal("abc123");
        thread::sleep(Duration::from_millis(2100));
        assert_eq!(codec.unseal(&token, 1), Err(TokenError::Expired));
        assert!(codec.is_expired(&token, 1));
        // a roomier lifetime still accepts it
        assert_eq!(codec.unseal(&token, 600).as_deref(), Ok("abc123"));
    }
}
