//! Session cipher: AES-128-GCM under a PBKDF2-derived key.
//!
//! A sealed frame body is `nonce (12) ‖ ciphertext+tag`. The key is derived
//! from a text secret (the PSK at first, later the decimal text of a DH
//! shared secret) and replaced in place on every successful rekey.

use aes_gcm::{
    Aes128Gcm,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::TrussError;

pub const KEY_LENGTH: usize = 16;
pub const NONCE_LENGTH: usize = 12;
pub const KDF_SALT_SUFFIX: &str = "ExtraSalty";
pub const DEFAULT_KDF_ROUNDS: u32 = 10;

/// Symmetric key bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_LENGTH]);

impl KeyMaterial {
    /// PBKDF2-HMAC-SHA256 over `secret`, salted with `secret + "ExtraSalty"`.
    pub fn derive(secret: &str, rounds: u32) -> Self {
        let salt = format!("{secret}{KDF_SALT_SUFFIX}");
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), rounds.max(1), &mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Short non-reversible tag for logs.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        hash.to_hex()[..8].to_string()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial({})", self.fingerprint())
    }
}

// ── SessionCipher ────────────────────────────────────────────────

/// The cipher owned by exactly one secure channel.
pub struct SessionCipher {
    cipher: Aes128Gcm,
    key: KeyMaterial,
    rounds: u32,
    generation: u32,
}

impl SessionCipher {
    pub fn from_secret(secret: &str, rounds: u32) -> Self {
        let key = KeyMaterial::derive(secret, rounds);
        Self {
            cipher: Aes128Gcm::new(GenericArray::from_slice(key.as_bytes())),
            key,
            rounds,
            generation: 0,
        }
    }

    /// Replace the key with one derived from `secret`.
    pub fn rekey(&mut self, secret: &str) {
        let key = KeyMaterial::derive(secret, self.rounds);
        self.cipher = Aes128Gcm::new(GenericArray::from_slice(key.as_bytes()));
        self.key = key;
        self.generation += 1;
        debug!(
            generation = self.generation,
            key = %self.key.fingerprint(),
            "session key replaced"
        );
    }

    /// Number of successful rekeys since construction.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, TrussError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| TrussError::Encryption)?;

        let mut body = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);
        Ok(body)
    }

    /// Returns `None` for anything this key cannot authenticate.
    pub fn open(&self, body: &[u8]) -> Option<Vec<u8>> {
        if body.len() < NONCE_LENGTH {
            debug!(len = body.len(), "frame shorter than nonce");
            return None;
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LENGTH);
        match self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
        {
            Ok(plaintext) => Some(plaintext),
            Err(_) => {
                debug!(key = %self.key.fingerprint(), "frame failed authentication");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &self.key)
            .field("rounds", &self.rounds)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_under_fixed_key() {
        let cipher = SessionCipher::from_secret("hunter2", DEFAULT_KDF_ROUNDS);
        let body = cipher.seal(b"job:abc:Linux:0").unwrap();
        assert_eq!(body.len(), NONCE_LENGTH + 15 + 16);
        assert_eq!(cipher.open(&body).unwrap(), b"job:abc:Linux:0");
    }

    #[test]
    fn same_secret_derives_same_key() {
        let a = KeyMaterial::derive("shared", 10);
        let b = KeyMaterial::derive("shared", 10);
        let c = KeyMaterial::derive("other", 10);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn nonces_differ_per_frame() {
        let cipher = SessionCipher::from_secret("psk", DEFAULT_KDF_ROUNDS);
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_yields_sentinel() {
        let alice = SessionCipher::from_secret("psk-a", DEFAULT_KDF_ROUNDS);
        let bob = SessionCipher::from_secret("psk-b", DEFAULT_KDF_ROUNDS);
        let body = alice.seal(b"secret").unwrap();
        assert!(bob.open(&body).is_none());
    }

    #[test]
    fn tampered_or_truncated_body_yields_sentinel() {
        let cipher = SessionCipher::from_secret("psk", DEFAULT_KDF_ROUNDS);
        let mut body = cipher.seal(b"secret").unwrap();
        body[NONCE_LENGTH] ^= 0x01;
        assert!(cipher.open(&body).is_none());
        assert!(cipher.open(&[0u8; 4]).is_none());
    }

    #[test]
    fn frame_sealed_before_rekey_fails_after() {
        let mut cipher = SessionCipher::from_secret("psk", DEFAULT_KDF_ROUNDS);
        let before = cipher.seal(b"old").unwrap();
        cipher.rekey("123456789");
        assert_eq!(cipher.generation(), 1);
        assert!(cipher.open(&before).is_none());

        let after = cipher.seal(b"new").unwrap();
        assert_eq!(cipher.open(&after).unwrap(), b"new");
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let cipher = SessionCipher::from_secret("psk", DEFAULT_KDF_ROUNDS);
        let text = format!("{cipher:?}");
        assert!(text.contains(&cipher.fingerprint()));
        assert!(!text.contains("psk"));
    }
}
