use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Builds a key from raw bytes, failing unless exactly [`KEY_SIZE`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid master key size".to_string()))?;
        Ok(Self(key))
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureKey(***)")
    }
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext` with AES-256-GCM under a fresh nonce.
///
/// # Arguments
///
/// * `key` - The AES-256 key.
/// * `plaintext` - The data to encrypt.
///
/// # Returns
///
/// The ciphertext followed by the 12-byte nonce.
pub fn seal(key: &SecureKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(ciphertext.len() + NONCE_SIZE);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&nonce_bytes);
    Ok(sealed)
}

/// Decrypts a `ciphertext || nonce` blob produced by [`seal`].
///
/// # Arguments
///
/// * `key` - The AES-256 key.
/// * `sealed` - The ciphertext with the nonce appended.
///
/// # Returns
///
/// The decrypted plaintext.
pub fn open(key: &SecureKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(AppError::Encryption("Sealed data is truncated".to_string()));
    }

    let (ciphertext, nonce) = sealed.split_at(sealed.len() - NONCE_SIZE);
    let nonce: [u8; NONCE_SIZE] = nonce
        .try_into()
        .map_err(|_| AppError::Encryption("Invalid nonce size".to_string()))?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(&Nonce::from(nonce), ciphertext)
        .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_data_opens_with_same_key_only() {
        let key = SecureKey::new([7u8; KEY_SIZE]);
        let sealed = seal(&key, b"biometric template").unwrap();

        assert_eq!(sealed.len(), b"biometric template".len() + 16 + NONCE_SIZE);
        assert_eq!(open(&key, &sealed).unwrap(), b"biometric template");

        let other = SecureKey::new([8u8; KEY_SIZE]);
        assert!(matches!(open(&other, &sealed), Err(AppError::Encryption(_))));
    }

    #[test]
    fn truncated_and_bad_keys_are_errors() {
        let key = SecureKey::new([1u8; KEY_SIZE]);
        assert!(open(&key, &[0u8; 4]).is_err());
        assert!(SecureKey::from_slice(&[0u8; 16]).is_err());
        assert!(SecureKey::from_slice(&[0u8; KEY_SIZE]).is_ok());
    }
}
