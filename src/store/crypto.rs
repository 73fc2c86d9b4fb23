//! Sealing resume material at rest.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id from an operator passphrase and a
//!   per-store salt
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! Sealed blobs are `SBX1 || nonce(12) || ciphertext+tag`.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::StoreError;

/// Argon2id memory cost in KiB (19 MiB)
pub const ARGON2_MEMORY_KB: u32 = 19_456;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 2;

/// Argon2id parallelism
pub const ARGON2_PARALLELISM: u32 = 1;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Magic prefix of a sealed blob
pub const SEALED_MAGIC: &[u8; 4] = b"SBX1";

/// Symmetric key for sealing, wiped on drop
pub struct SealingKey(Zeroizing<[u8; 32]>);

impl SealingKey {
    /// Derive a key with the default Argon2id cost.
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> Result<Self, StoreError> {
        Self::derive_with(passphrase, salt, ARGON2_MEMORY_KB, ARGON2_ITERATIONS)
    }

    pub fn derive_with(
        passphrase: &[u8],
        salt: &[u8],
        memory_kb: u32,
        iterations: u32,
    ) -> Result<Self, StoreError> {
        let params = Params::new(memory_kb, iterations, ARGON2_PARALLELISM, Some(32))
            .map_err(|e| StoreError::Crypto(format!("Invalid Argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase, salt, &mut key[..])
            .map_err(|e| StoreError::Crypto(format!("Key derivation failed: {e}")))?;

        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0[..]))
    }
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Whether `blob` carries the sealed-blob prefix
pub fn is_sealed(blob: &[u8]) -> bool {
    blob.starts_with(SEALED_MAGIC)
}

/// Seal `plaintext` under a fresh random nonce.
pub fn seal(key: &SealingKey, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let nonce = generate_random_bytes::<NONCE_LEN>();
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| StoreError::Crypto(format!("Encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(SEALED_MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(SEALED_MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed blob.
///
/// # Errors
///
/// - `Corrupt` if the framing is wrong
/// - `Crypto` if authentication fails (tampered blob or wrong key)
pub fn open(key: &SealingKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, StoreError> {
    let header = SEALED_MAGIC.len() + NONCE_LEN;
    if !is_sealed(blob) || blob.len() < header + AUTH_TAG_LEN {
        return Err(StoreError::Corrupt("not a sealed credential blob".into()));
    }

    let nonce = &blob[SEALED_MAGIC.len()..header];
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), &blob[header..])
        .map_err(|_| StoreError::Crypto("Failed to open credentials (wrong key?)".into()))?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(passphrase: &[u8]) -> SealingKey {
        SealingKey::derive_with(passphrase, &[7u8; SALT_LEN], 64, 1).unwrap()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = test_key(b"correct horse");
        let sealed = seal(&key, b"{\"noiseKey\":\"...\"}").unwrap();

        assert!(is_sealed(&sealed));
        assert_eq!(
            sealed.len(),
            SEALED_MAGIC.len() + NONCE_LEN + 18 + AUTH_TAG_LEN
        );
        assert_eq!(open(&key, &sealed).unwrap().as_slice(), b"{\"noiseKey\":\"...\"}");
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = test_key(b"pw");
        assert_ne!(seal(&key, b"same").unwrap(), seal(&key, b"same").unwrap());
    }

    #[test]
    fn test_tampering_is_detected() {
        let key = test_key(b"pw");
        let mut sealed = seal(&key, b"material").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(open(&key, &sealed), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&test_key(b"one"), b"material").unwrap();
        assert!(matches!(
            open(&test_key(b"two"), &sealed),
            Err(StoreError::Crypto(_))
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let key = test_key(b"pw");
        assert!(matches!(open(&key, b"plain"), Err(StoreError::Corrupt(_))));
        assert!(matches!(open(&key, b"SBX1short"), Err(StoreError::Corrupt(_))));
    }
}
