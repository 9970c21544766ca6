//! Collaborator interfaces: storage backend, proof ledger, audit trail.

use async_trait::async_trait;

use evlock_core::{CaseContext, EvlockResult, FileId, ProofId};
use evlock_crypto::EncryptionMetadata;
use evlock_hash::ContentHash;

use crate::records::{Anchor, AuditEvent, BatchMembership, EvidenceRecord, IntegrityProof, LedgerReceipt};
use crate::verifier::Verdict;

/// One encrypted file handed to the upload collaborator.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub ciphertext: Vec<u8>,
    pub metadata: EncryptionMetadata,
    pub content_hash: ContentHash,
    pub proof: Option<IntegrityProof>,
    pub batch: Option<BatchMembership>,
    pub context: CaseContext,
}

#[derive(Debug, Clone)]
pub struct BatchUploadRequest {
    pub batch_id: String,
    pub root: ContentHash,
    /// In input order
    pub files: Vec<UploadRequest>,
}

#[async_trait]
pub trait UploadService: Send + Sync {
    /// Store one file and assign its id.
    async fn upload(&self, request: UploadRequest) -> EvlockResult<FileId>;

    /// Store a batch. Ids come back in the same order as `request.files`.
    async fn upload_batch(&self, request: BatchUploadRequest) -> EvlockResult<Vec<FileId>>;
}

#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Stored payload bytes: ciphertext, or plaintext for legacy uploads.
    async fn download(&self, file_id: &FileId) -> EvlockResult<Vec<u8>>;

    /// The record stored with the payload, if any.
    async fn record(&self, file_id: &FileId) -> EvlockResult<Option<EvidenceRecord>>;
}

/// External anchoring of hashes.
#[async_trait]
pub trait ProofLedger: Send + Sync {
    async fn commit(&self, anchor: &Anchor, context: &CaseContext) -> EvlockResult<LedgerReceipt>;

    /// What was committed under `proof_id`, read back from the ledger.
    /// `None` if the ledger has no such commit.
    async fn anchor(&self, proof_id: &ProofId) -> EvlockResult<Option<Anchor>>;

    /// Report the outcome of a later re-check.
    async fn acknowledge(&self, proof_id: &ProofId, verdict: &Verdict) -> EvlockResult<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> EvlockResult<()>;
}
