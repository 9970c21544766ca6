//! evlock-pipeline: integrity proofs for evidence files
//!
//! ```text
//! upload:   bytes ─► ContentHasher ─► H ─► SymmetricCipher ─► (C, M)
//!                                      └─► ProofLedger.commit(H) ─► receipt
//!           UploadService({C, M, H, receipt}) ─► FileId ─► KeyMetadataStore
//!
//! batch:    [H1..Hn] ─► MerkleTree ─► root R ─► ProofLedger.commit(R)
//!
//! verify:   bytes ─► ContentHasher ─► H' == bound H
//!           path(H') (or H' alone) == ProofLedger.anchor(proof_id)
//! ```
//!
//! Storage, ledger, and audit are collaborator traits. `OperatorEvidenceStore`
//! (OpenDAL) and `LocalLedger` are the bundled implementations.

pub mod collaborators;
pub mod issuer;
pub mod ledger;
pub mod pipeline;
pub mod records;
pub mod store;
pub mod verifier;

pub use collaborators::{
    AuditSink, BatchUploadRequest, DownloadService, ProofLedger, UploadRequest, UploadService,
};
pub use issuer::{
    EvidenceFile, IntegrityProofIssuer, IssuedBatch, IssuedFile, ProgressEvent, ProgressFn,
    Stage, StageTracker,
};
pub use ledger::{LedgerEntry, LocalLedger};
pub use pipeline::{
    BatchReceipt, DownloadSource, DownloadedEvidence, EvidencePipeline, EvidencePipelineBuilder,
    UploadReceipt,
};
pub use records::{
    Anchor, AuditEvent, AuditKind, BatchMembership, EvidenceRecord, IntegrityProof, LedgerReceipt,
};
pub use store::OperatorEvidenceStore;
pub use verifier::{IntegrityVerifier, TamperEvidence, TamperReason, Verdict};
