//! Encryption metadata stored alongside each ciphertext
//!
//! Everything needed to decrypt given the matching key. All fields except the
//! IV and tag are bound into the AEAD associated data, so editing the name,
//! size, timestamp, algorithm, or version makes decryption fail.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use evlock_core::{DecryptionFailure, EvlockResult};

use crate::cipher::CipherAlgorithm;

/// Current metadata format version
pub const METADATA_VERSION: u32 = 1;

const AAD_DOMAIN: &[u8] = b"evlock-evidence-v1\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Metadata format version
    pub version: u32,
    pub algorithm: CipherAlgorithm,
    /// Initialization vector (base64)
    pub iv: String,
    /// Detached authentication tag (base64)
    pub auth_tag: String,
    pub original_name: String,
    /// Plaintext length in bytes; equals the ciphertext length
    pub original_size: u64,
    /// Unix seconds at encryption time
    pub created_at: u64,
}

impl EncryptionMetadata {
    /// Associated data authenticated together with the ciphertext.
    pub(crate) fn aad(&self) -> Vec<u8> {
        let alg = self.algorithm.as_str().as_bytes();
        let name = self.original_name.as_bytes();

        let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 28 + alg.len() + name.len());
        aad.extend_from_slice(AAD_DOMAIN);
        aad.extend_from_slice(&self.version.to_be_bytes());
        aad.extend_from_slice(&(alg.len() as u32).to_be_bytes());
        aad.extend_from_slice(alg);
        aad.extend_from_slice(&(name.len() as u32).to_be_bytes());
        aad.extend_from_slice(name);
        aad.extend_from_slice(&self.original_size.to_be_bytes());
        aad.extend_from_slice(&self.created_at.to_be_bytes());
        aad
    }

    pub(crate) fn iv_bytes(&self) -> EvlockResult<Vec<u8>> {
        decode_field("iv", &self.iv)
    }

    pub(crate) fn tag_bytes(&self) -> EvlockResult<Vec<u8>> {
        decode_field("auth_tag", &self.auth_tag)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("metadata serialization: {e}"))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> EvlockResult<Self> {
        serde_json::from_slice(data).map_err(|e| {
            DecryptionFailure::MalformedMetadata(format!("metadata deserialization: {e}")).into()
        })
    }
}

pub(crate) fn encode_field(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode_field(name: &str, value: &str) -> EvlockResult<Vec<u8>> {
    STANDARD.decode(value).map_err(|e| {
        DecryptionFailure::MalformedMetadata(format!("{name} is not valid base64: {e}")).into()
    })
}
