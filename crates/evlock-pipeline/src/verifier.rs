//! Re-checking evidence bytes against an issued proof.
//!
//! Only the hash half of the pipeline is involved: no key, no cipher. A
//! mismatch is a [`Verdict`], not an error; errors are reserved for input
//! that could not be read at all.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use evlock_core::EvlockResult;
use evlock_hash::{recompute_root, ContentHash, ContentHasher, DEFAULT_BUFFER_SIZE};

use crate::records::{BatchMembership, IntegrityProof};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperReason {
    /// Recomputed content hash differs from the bound hash
    ContentMismatch,
    /// Content matches but its inclusion path does not reach the anchored root
    RootMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperEvidence {
    pub reason: TamperReason,
    pub expected: ContentHash,
    pub actual: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Tampered(TamperEvidence),
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntegrityVerifier {
    pub(crate) buffer_size: usize,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read buffer for streaming verification.
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    /// Hasher matching the algorithm the proof was issued with.
    fn hasher_for(&self, bound: &ContentHash) -> ContentHasher {
        ContentHasher::new(bound.algorithm()).with_buffer_size(self.buffer_size)
    }

    pub fn verify(&self, bytes: &[u8], proof: &IntegrityProof) -> Verdict {
        let actual = self.hasher_for(&proof.bound_hash).hash_bytes(bytes);
        self.judge(actual, &proof.bound_hash, proof.batch.as_ref(), None)
    }

    pub fn verify_reader<R: Read>(&self, reader: R, proof: &IntegrityProof) -> EvlockResult<Verdict> {
        let actual = self.hasher_for(&proof.bound_hash).hash_reader(reader)?;
        Ok(self.judge(actual, &proof.bound_hash, proof.batch.as_ref(), None))
    }

    pub async fn verify_file(&self, path: &Path, proof: &IntegrityProof) -> EvlockResult<Verdict> {
        let actual = self
            .hasher_for(&proof.bound_hash)
            .hash_file_async(path)
            .await?;
        Ok(self.judge(actual, &proof.bound_hash, proof.batch.as_ref(), None))
    }

    /// Like [`verify`](Self::verify), but the root is supplied by the caller
    /// (read back from the ledger) instead of trusted from the proof.
    ///
    /// For a single-file proof the anchored value is the content hash itself.
    pub fn verify_against_root(
        &self,
        bytes: &[u8],
        proof: &IntegrityProof,
        anchored_root: &ContentHash,
    ) -> Verdict {
        let actual = self.hasher_for(&proof.bound_hash).hash_bytes(bytes);
        self.judge(
            actual,
            &proof.bound_hash,
            proof.batch.as_ref(),
            Some(anchored_root),
        )
    }

    /// Streaming form of [`verify_against_root`](Self::verify_against_root).
    pub async fn verify_file_against_root(
        &self,
        path: &Path,
        proof: &IntegrityProof,
        anchored_root: &ContentHash,
    ) -> EvlockResult<Verdict> {
        let actual = self
            .hasher_for(&proof.bound_hash)
            .hash_file_async(path)
            .await?;
        Ok(self.judge(
            actual,
            &proof.bound_hash,
            proof.batch.as_ref(),
            Some(anchored_root),
        ))
    }

    fn judge(
        &self,
        actual: ContentHash,
        bound: &ContentHash,
        batch: Option<&BatchMembership>,
        anchored_root: Option<&ContentHash>,
    ) -> Verdict {
        if actual != *bound {
            tracing::debug!(expected = %bound, actual = %actual, "content hash mismatch");
            return Verdict::Tampered(TamperEvidence {
                reason: TamperReason::ContentMismatch,
                expected: *bound,
                actual,
            });
        }

        let (expected_root, climbed) = match (batch, anchored_root) {
            (Some(m), Some(root)) => (*root, recompute_root(&actual, &m.path)),
            (Some(m), None) => (m.root, recompute_root(&actual, &m.path)),
            (None, Some(root)) => (*root, actual),
            (None, None) => return Verdict::Verified,
        };

        if climbed != expected_root {
            tracing::debug!(expected = %expected_root, actual = %climbed, "batch root mismatch");
            return Verdict::Tampered(TamperEvidence {
                reason: TamperReason::RootMismatch,
                expected: expected_root,
                actual: climbed,
            });
        }
        Verdict::Verified
    }
}
