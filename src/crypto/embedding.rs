//! Face embeddings at rest: bincode-encoded, then AES-256-GCM sealed.

use crate::crypto::aes::{self, SecureKey};
use crate::error::{AppError, Result};

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Seals an embedding for storage.
pub fn seal_embedding(key: &SecureKey, embedding: &[f32]) -> Result<Vec<u8>> {
    let encoded = bincode::serde::encode_to_vec(embedding, config())
        .map_err(|e| AppError::Internal(format!("Failed to encode embedding: {}", e)))?;
    aes::seal(key, &encoded)
}

/// Opens an embedding sealed with [`seal_embedding`].
pub fn open_embedding(key: &SecureKey, sealed: &[u8]) -> Result<Vec<f32>> {
    let plaintext = aes::open(key, sealed)?;
    let (embedding, _) = bincode::serde::decode_from_slice::<Vec<f32>, _>(&plaintext, config())
        .map_err(|e| AppError::Encryption(format!("Corrupted embedding payload: {}", e)))?;
    Ok(embedding)
}

/// Seals an optional embedding, mapping absence to `NULL`.
pub fn seal_optional(key: &SecureKey, embedding: Option<&[f32]>) -> Result<Option<Vec<u8>>> {
    embedding.map(|e| seal_embedding(key, e)).transpose()
}

/// Opens an optional sealed embedding.
pub fn open_optional(key: &SecureKey, sealed: Option<&[u8]>) -> Result<Option<Vec<f32>>> {
    sealed.map(|s| open_embedding(key, s)).transpose()
}
