use thiserror::Error;

use crate::types::FileId;

pub type EvlockResult<T> = Result<T, EvlockError>;

#[derive(Debug, Error)]
pub enum EvlockError {
    /// Input could not be read to the end; the file's pipeline stops here.
    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptionFailure),

    /// Best-effort stage. Callers log it and continue without a proof.
    #[error("proof issuance failed: {0}")]
    ProofIssuance(String),

    /// The ledger holds no anchor to check against, so no verdict can be given.
    #[error("not anchored: {0}")]
    Unanchored(String),

    #[error("merkle tree construction failed: {0}")]
    TreeConstruction(String),

    #[error("upload error: {0}")]
    Upload(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("key store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EvlockError {
    /// True when a download/verify failed only because no local key record
    /// exists for the file (the legacy plaintext path).
    pub fn is_missing_key_record(&self) -> bool {
        matches!(
            self,
            EvlockError::Decryption(DecryptionFailure::MissingKeyRecord { .. })
        )
    }
}

/// Why a decrypt attempt did not produce plaintext.
///
/// `MissingKeyRecord` means nothing was found for the file id and the payload
/// may predate client-side encryption. The other two mean metadata was found
/// and the payload is corrupt, tampered, or paired with the wrong key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptionFailure {
    #[error("no local key record for file {file_id}")]
    MissingKeyRecord { file_id: FileId },

    #[error("malformed encryption metadata: {0}")]
    MalformedMetadata(String),

    #[error("authentication failed: wrong key, corrupted ciphertext, or tampered metadata")]
    AuthenticationFailed,
}
