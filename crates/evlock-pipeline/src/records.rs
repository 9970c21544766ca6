//! Records exchanged with the collaborators and persisted next to ciphertexts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use evlock_core::{now_unix, CaseContext, FileId, ProofId};
use evlock_crypto::EncryptionMetadata;
use evlock_hash::{ContentHash, InclusionPath};

/// What a ledger commit is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anchor {
    /// One file's content hash
    Content { hash: ContentHash },
    /// The Merkle root over a batch of `size` files
    BatchRoot { root: ContentHash, size: usize },
}

impl Anchor {
    /// The hash that was committed, whichever kind it is.
    pub fn hash(&self) -> ContentHash {
        match self {
            Anchor::Content { hash } => *hash,
            Anchor::BatchRoot { root, .. } => *root,
        }
    }
}

/// Opaque identifiers returned by the ledger for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub proof_id: ProofId,
    /// Ledger transaction reference
    pub tx_ref: String,
}

/// Where a file sits inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMembership {
    pub batch_id: String,
    pub root: ContentHash,
    pub index: usize,
    pub size: usize,
    pub path: InclusionPath,
}

/// Proof that a content hash (or the batch root containing it) was anchored.
/// Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityProof {
    pub proof_id: ProofId,
    pub tx_ref: String,
    /// Hash of the original, pre-encryption bytes
    pub bound_hash: ContentHash,
    pub issued_at: u64,
    pub context: CaseContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchMembership>,
}

impl IntegrityProof {
    pub fn is_batch_member(&self) -> bool {
        self.batch.is_some()
    }
}

/// What the upload collaborator keeps next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub file_id: FileId,
    pub context: CaseContext,
    pub metadata: EncryptionMetadata,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub proof: Option<IntegrityProof>,
    #[serde(default)]
    pub batch: Option<BatchMembership>,
    pub uploaded_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Upload,
    BatchUpload,
    Download,
    Verify,
}

/// One entry in the case audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    pub case_id: String,
    pub performed_by: String,
    /// Ledger transaction or proof id, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    pub at: u64,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, case_id: impl Into<String>, performed_by: impl Into<String>) -> Self {
        Self {
            id: format!("audit_{}", Uuid::new_v4().simple()),
            kind,
            file_id: None,
            case_id: case_id.into(),
            performed_by: performed_by.into(),
            reference: None,
            merkle_root: None,
            file_count: None,
            verified: None,
            at: now_unix(),
        }
    }

    pub fn for_context(kind: AuditKind, ctx: &CaseContext) -> Self {
        Self::new(kind, ctx.case_id.clone(), ctx.identity.clone())
    }

    pub fn file(mut self, file_id: &FileId) -> Self {
        self.file_id = Some(file_id.clone());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn merkle_root(mut self, root: ContentHash, file_count: usize) -> Self {
        self.merkle_root = Some(root);
        self.file_count = Some(file_count);
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }
}
