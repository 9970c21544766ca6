//! Whole-file authenticated encryption
//!
//! Ciphertext layout: exactly the plaintext length. The IV and the 16-byte
//! tag travel detached in [`EncryptionMetadata`]:
//! ```text
//! ciphertext = AEAD_k(plaintext, nonce = iv, aad = metadata.aad())
//! metadata   = { algorithm, iv, auth_tag, original_name, original_size, created_at }
//! ```
//!
//! A fresh IV is drawn from the OS CSPRNG on every call. Derived keys are
//! shared by every file in a case, so IV reuse would break both
//! confidentiality and integrity; there is no caller-supplied IV path.

use aes_gcm::aead::{self, AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use evlock_core::{now_unix, DecryptionFailure, EvlockError, EvlockResult};

use crate::keys::EncryptionKey;
use crate::metadata::{encode_field, EncryptionMetadata, METADATA_VERSION};
use crate::TAG_SIZE;

/// Supported AEAD constructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[default]
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "XCHACHA20-POLY1305")]
    XChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
            CipherAlgorithm::XChaCha20Poly1305 => "XCHACHA20-POLY1305",
        }
    }

    /// IV length in bytes (96-bit for GCM, 192-bit for XChaCha20)
    pub fn iv_size(&self) -> usize {
        match self {
            CipherAlgorithm::Aes256Gcm => 12,
            CipherAlgorithm::XChaCha20Poly1305 => 24,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = EvlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "xchacha20-poly1305" | "xchacha20poly1305" => Ok(CipherAlgorithm::XChaCha20Poly1305),
            other => Err(EvlockError::Config(format!(
                "unknown cipher '{other}' (expected aes-256-gcm or xchacha20-poly1305)"
            ))),
        }
    }
}

/// Encrypts evidence bytes with one AEAD algorithm; decrypts any supported one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricCipher {
    algorithm: CipherAlgorithm,
}

impl SymmetricCipher {
    pub fn new(algorithm: CipherAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Encrypt a whole file.
    ///
    /// Returns the ciphertext and the metadata needed to restore the file,
    /// including its original name and size.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        original_name: &str,
        key: &EncryptionKey,
    ) -> EvlockResult<(Vec<u8>, EncryptionMetadata)> {
        self.encrypt_owned(plaintext.to_vec(), original_name, key)
    }

    /// Like [`encrypt`](Self::encrypt), but seals `plaintext` in its own
    /// buffer, which comes back as the ciphertext.
    pub fn encrypt_owned(
        &self,
        mut buffer: Vec<u8>,
        original_name: &str,
        key: &EncryptionKey,
    ) -> EvlockResult<(Vec<u8>, EncryptionMetadata)> {
        let mut iv = vec![0u8; self.algorithm.iv_size()];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut metadata = EncryptionMetadata {
            version: METADATA_VERSION,
            algorithm: self.algorithm,
            iv: encode_field(&iv),
            auth_tag: String::new(),
            original_name: original_name.to_string(),
            original_size: buffer.len() as u64,
            created_at: now_unix(),
        };
        let aad = metadata.aad();

        let tag = match self.algorithm {
            CipherAlgorithm::Aes256Gcm => seal::<Aes256Gcm>(key, &iv, &aad, &mut buffer),
            CipherAlgorithm::XChaCha20Poly1305 => {
                seal::<XChaCha20Poly1305>(key, &iv, &aad, &mut buffer)
            }
        }
        .map_err(|_| EvlockError::Encryption(format!("{} encryption failed", self.algorithm)))?;

        metadata.auth_tag = encode_field(&tag);

        tracing::debug!(
            name = original_name,
            bytes = buffer.len(),
            algorithm = %self.algorithm,
            "encrypted evidence"
        );
        Ok((buffer, metadata))
    }

    /// Decrypt a ciphertext produced by [`SymmetricCipher::encrypt`].
    ///
    /// The algorithm is taken from `metadata`, not from `self`, so files
    /// encrypted under an older default still open.
    pub fn decrypt(
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
        key: &EncryptionKey,
    ) -> EvlockResult<Vec<u8>> {
        if metadata.version != METADATA_VERSION {
            return Err(malformed(format!(
                "unsupported metadata version {} (expected {METADATA_VERSION})",
                metadata.version
            )));
        }

        let iv = metadata.iv_bytes()?;
        if iv.len() != metadata.algorithm.iv_size() {
            return Err(malformed(format!(
                "iv is {} bytes, {} needs {}",
                iv.len(),
                metadata.algorithm,
                metadata.algorithm.iv_size()
            )));
        }

        let tag = metadata.tag_bytes()?;
        if tag.len() != TAG_SIZE {
            return Err(malformed(format!(
                "auth tag is {} bytes, expected {TAG_SIZE}",
                tag.len()
            )));
        }

        if ciphertext.len() as u64 != metadata.original_size {
            return Err(malformed(format!(
                "ciphertext is {} bytes but metadata records {}",
                ciphertext.len(),
                metadata.original_size
            )));
        }

        let aad = metadata.aad();
        let mut buffer = ciphertext.to_vec();
        match metadata.algorithm {
            CipherAlgorithm::Aes256Gcm => open::<Aes256Gcm>(key, &iv, &aad, &mut buffer, &tag),
            CipherAlgorithm::XChaCha20Poly1305 => {
                open::<XChaCha20Poly1305>(key, &iv, &aad, &mut buffer, &tag)
            }
        }
        .map_err(|_| EvlockError::Decryption(DecryptionFailure::AuthenticationFailed))?;

        Ok(buffer)
    }
}

fn seal<C: AeadInPlace + KeyInit>(
    key: &EncryptionKey,
    iv: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<Vec<u8>, aead::Error> {
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| aead::Error)?;
    let tag = cipher.encrypt_in_place_detached(aead::Nonce::<C>::from_slice(iv), aad, buffer)?;
    Ok(tag.to_vec())
}

fn open<C: AeadInPlace + KeyInit>(
    key: &EncryptionKey,
    iv: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<(), aead::Error> {
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| aead::Error)?;
    cipher.decrypt_in_place_detached(
        aead::Nonce::<C>::from_slice(iv),
        aad,
        buffer,
        aead::Tag::<C>::from_slice(tag),
    )
}

fn malformed(msg: String) -> EvlockError {
    EvlockError::Decryption(DecryptionFailure::MalformedMetadata(msg))
}
