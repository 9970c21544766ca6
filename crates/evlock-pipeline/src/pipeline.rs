//! Upload / download / verify orchestration over the collaborators.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use evlock_core::config::EvlockConfig;
use evlock_core::{CaseContext, DecryptionFailure, EvlockError, EvlockResult, FileId};
use evlock_crypto::{CipherAlgorithm, EncryptionMetadata, KeyPolicy, SymmetricCipher};
use evlock_hash::{ContentHash, ContentHasher, HashAlgorithm};
use evlock_keystore::{KeyMetadataStore, LocalKeyRecord};

use crate::collaborators::{
    AuditSink, BatchUploadRequest, DownloadService, ProofLedger, UploadRequest, UploadService,
};
use crate::issuer::{EvidenceFile, IntegrityProofIssuer, IssuedFile, ProgressFn};
use crate::records::{Anchor, AuditEvent, AuditKind, IntegrityProof};
use crate::verifier::{IntegrityVerifier, Verdict};

/// Result of a single upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub file_id: FileId,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub metadata: EncryptionMetadata,
    pub proof: Option<IntegrityProof>,
    /// Why `proof` is missing, if it is
    pub proof_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchReceipt {
    pub batch_id: String,
    pub root: ContentHash,
    /// In input order
    pub files: Vec<UploadReceipt>,
    pub tx_ref: Option<String>,
    pub proof_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    /// Decrypted with a local key record
    Decrypted,
    /// No key record; payload returned as stored
    LegacyPlaintext,
}

#[derive(Debug, Clone)]
pub struct DownloadedEvidence {
    pub file_id: FileId,
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub source: DownloadSource,
}

pub struct EvidencePipeline {
    issuer: IntegrityProofIssuer,
    verifier: IntegrityVerifier,
    uploads: Arc<dyn UploadService>,
    downloads: Arc<dyn DownloadService>,
    ledger: Arc<dyn ProofLedger>,
    audit: Arc<dyn AuditSink>,
    keys: KeyMetadataStore,
    key_policy: KeyPolicy,
}

enum Evidence<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Wires an [`EvidencePipeline`]. Every collaborator is required.
#[derive(Default)]
pub struct EvidencePipelineBuilder {
    hasher: ContentHasher,
    cipher: SymmetricCipher,
    concurrency: Option<usize>,
    key_policy: KeyPolicy,
    uploads: Option<Arc<dyn UploadService>>,
    downloads: Option<Arc<dyn DownloadService>>,
    ledger: Option<Arc<dyn ProofLedger>>,
    audit: Option<Arc<dyn AuditSink>>,
    keys: Option<KeyMetadataStore>,
}

impl EvidencePipelineBuilder {
    /// Take hashing, cipher, key policy, and concurrency from config.
    pub fn config(mut self, config: &EvlockConfig) -> EvlockResult<Self> {
        let algorithm: HashAlgorithm = config.hashing.algorithm.parse()?;
        self.hasher = ContentHasher::new(algorithm)
            .with_buffer_size(config.hashing.read_buffer_kib.max(1) * 1024);
        self.concurrency = Some(config.hashing.concurrency);
        self.cipher = SymmetricCipher::new(config.crypto.cipher.parse::<CipherAlgorithm>()?);
        self.key_policy = config.crypto.key_policy.parse()?;
        Ok(self)
    }

    pub fn hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn cipher(mut self, cipher: SymmetricCipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    pub fn uploads(mut self, uploads: Arc<dyn UploadService>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn downloads(mut self, downloads: Arc<dyn DownloadService>) -> Self {
        self.downloads = Some(downloads);
        self
    }

    /// Use one object for both storage directions.
    pub fn storage<S>(self, store: Arc<S>) -> Self
    where
        S: UploadService + DownloadService + 'static,
    {
        self.uploads(store.clone()).downloads(store)
    }

    pub fn ledger(mut self, ledger: Arc<dyn ProofLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn keys(mut self, keys: KeyMetadataStore) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn build(self) -> EvlockResult<EvidencePipeline> {
        fn required<T>(value: Option<T>, name: &str) -> EvlockResult<T> {
            value.ok_or_else(|| EvlockError::Config(format!("pipeline is missing {name}")))
        }

        let ledger = required(self.ledger, "a proof ledger")?;
        let verifier = IntegrityVerifier::new().with_buffer_size(self.hasher.buffer_size());
        let mut issuer = IntegrityProofIssuer::new(Arc::clone(&ledger))
            .with_hasher(self.hasher)
            .with_cipher(self.cipher);
        if let Some(concurrency) = self.concurrency {
            issuer = issuer.with_concurrency(concurrency);
        }

        Ok(EvidencePipeline {
            issuer,
            verifier,
            uploads: required(self.uploads, "an upload service")?,
            downloads: required(self.downloads, "a download service")?,
            ledger,
            audit: required(self.audit, "an audit sink")?,
            keys: required(self.keys, "a key store")?,
            key_policy: self.key_policy,
        })
    }
}

impl EvidencePipeline {
    pub fn builder() -> EvidencePipelineBuilder {
        EvidencePipelineBuilder::default()
    }

    pub fn keys(&self) -> &KeyMetadataStore {
        &self.keys
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    /// Hash, encrypt, anchor, upload, and keep the key locally.
    pub async fn upload(
        &self,
        file: EvidenceFile,
        context: &CaseContext,
        progress: Option<&ProgressFn>,
    ) -> EvlockResult<UploadReceipt> {
        let key = self.key_policy.key_for(&context.identity, &context.case_id)?;
        let mut issued = self.issuer.issue(file, context, key, progress).await?;

        let file_id = self
            .uploads
            .upload(upload_request(&mut issued, context))
            .await?;
        self.remember_key(&file_id, &issued)?;

        let mut event = AuditEvent::for_context(AuditKind::Upload, context).file(&file_id);
        if let Some(proof) = &issued.proof {
            event = event.reference(proof.tx_ref.clone());
        }
        self.audit(event).await;

        info!(
            file_id = %file_id,
            file = %issued.file_name,
            hash = %issued.content_hash,
            proof = issued.proof.is_some(),
            "evidence uploaded"
        );
        Ok(receipt(file_id, issued))
    }

    /// Upload several files under one Merkle commitment.
    pub async fn upload_batch(
        &self,
        files: Vec<EvidenceFile>,
        context: &CaseContext,
        progress: Option<&ProgressFn>,
    ) -> EvlockResult<BatchReceipt> {
        let count = files.len();
        let policy = self.key_policy;
        let mut batch = self
            .issuer
            .issue_batch(
                files,
                context,
                |_| policy.key_for(&context.identity, &context.case_id),
                progress,
            )
            .await?;

        let request = BatchUploadRequest {
            batch_id: batch.batch_id.clone(),
            root: batch.root,
            files: batch
                .files
                .iter_mut()
                .map(|f| upload_request(f, context))
                .collect(),
        };
        let ids = self.uploads.upload_batch(request).await?;
        if ids.len() != count {
            return Err(EvlockError::Upload(format!(
                "upload service returned {} ids for {count} files",
                ids.len()
            )));
        }

        for (file_id, issued) in ids.iter().zip(&batch.files) {
            self.remember_key(file_id, issued)?;
        }

        let mut event =
            AuditEvent::for_context(AuditKind::BatchUpload, context).merkle_root(batch.root, count);
        if let Some(receipt) = &batch.receipt {
            event = event.reference(receipt.tx_ref.clone());
        }
        self.audit(event).await;

        info!(
            batch_id = %batch.batch_id,
            files = count,
            root = %batch.root,
            "evidence batch uploaded"
        );
        Ok(BatchReceipt {
            batch_id: batch.batch_id,
            root: batch.root,
            tx_ref: batch.receipt.map(|r| r.tx_ref),
            proof_error: batch.proof_error,
            files: ids
                .into_iter()
                .zip(batch.files)
                .map(|(id, issued)| receipt(id, issued))
                .collect(),
        })
    }

    /// Decrypt a stored payload with its local key record.
    ///
    /// Fails with `DecryptionFailure::MissingKeyRecord` when there is no
    /// record, which callers can tell apart from a failed decryption.
    pub fn decrypt(&self, file_id: &FileId, payload: &[u8]) -> EvlockResult<(Vec<u8>, String)> {
        let record = self
            .keys
            .get(file_id)?
            .ok_or_else(|| DecryptionFailure::MissingKeyRecord {
                file_id: file_id.clone(),
            })?;
        let plaintext = SymmetricCipher::decrypt(payload, &record.metadata, &record.key)?;
        Ok((plaintext, record.metadata.original_name))
    }

    /// Fetch and decrypt. Files without a key record come back as stored.
    pub async fn download(&self, file_id: &FileId) -> EvlockResult<DownloadedEvidence> {
        let payload = self.downloads.download(file_id).await?;

        let (bytes, file_name, source) = match self.decrypt(file_id, &payload) {
            Ok((plaintext, name)) => (plaintext, name, DownloadSource::Decrypted),
            Err(e) if e.is_missing_key_record() => {
                warn!(file_id = %file_id, "no local key record; returning payload as stored");
                (payload, file_id.to_string(), DownloadSource::LegacyPlaintext)
            }
            Err(e) => return Err(e),
        };

        let (case_id, identity) = match self.downloads.record(file_id).await {
            Ok(Some(record)) => (record.context.case_id, record.context.identity),
            Ok(None) => (String::new(), String::new()),
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "upload record unreadable; auditing download without case");
                (String::new(), String::new())
            }
        };
        self.audit(AuditEvent::new(AuditKind::Download, case_id, identity).file(file_id))
            .await;

        Ok(DownloadedEvidence {
            file_id: file_id.clone(),
            bytes,
            file_name,
            source,
        })
    }

    /// Re-check bytes against a proof, using the root the ledger holds for
    /// it, and report the verdict back.
    ///
    /// Fails with `Unanchored` when the ledger has no commit for the proof.
    pub async fn verify(&self, bytes: &[u8], proof: &IntegrityProof) -> EvlockResult<Verdict> {
        self.check(Evidence::Bytes(bytes), proof, None).await
    }

    /// Streaming form of [`verify`](Self::verify).
    pub async fn verify_file(&self, path: &Path, proof: &IntegrityProof) -> EvlockResult<Verdict> {
        self.check(Evidence::File(path), proof, None).await
    }

    /// Re-check bytes against the proof recorded at upload for `file_id`.
    ///
    /// The stored record only says which proof to look up; the root itself
    /// comes from the ledger. A record without a proof cannot be verified.
    pub async fn verify_stored(&self, file_id: &FileId, bytes: &[u8]) -> EvlockResult<Verdict> {
        let proof = self.stored_proof(file_id).await?;
        self.check(Evidence::Bytes(bytes), &proof, Some(file_id)).await
    }

    /// Streaming form of [`verify_stored`](Self::verify_stored).
    pub async fn verify_stored_file(&self, file_id: &FileId, path: &Path) -> EvlockResult<Verdict> {
        let proof = self.stored_proof(file_id).await?;
        self.check(Evidence::File(path), &proof, Some(file_id)).await
    }

    async fn stored_proof(&self, file_id: &FileId) -> EvlockResult<IntegrityProof> {
        let record = self
            .downloads
            .record(file_id)
            .await?
            .ok_or_else(|| EvlockError::Download(format!("no upload record for {file_id}")))?;
        record.proof.ok_or_else(|| {
            EvlockError::Unanchored(format!(
                "{file_id} was stored without a ledger proof; its recorded hash is not evidence of integrity"
            ))
        })
    }

    async fn check(
        &self,
        evidence: Evidence<'_>,
        proof: &IntegrityProof,
        file_id: Option<&FileId>,
    ) -> EvlockResult<Verdict> {
        let anchor = self.ledger.anchor(&proof.proof_id).await?.ok_or_else(|| {
            EvlockError::Unanchored(format!("ledger has no commit for proof {}", proof.proof_id))
        })?;
        let anchored_batch = matches!(anchor, Anchor::BatchRoot { .. });
        if anchored_batch != proof.is_batch_member() {
            warn!(
                proof_id = %proof.proof_id,
                anchored_batch,
                "proof shape does not match its ledger anchor"
            );
        }

        let root = anchor.hash();
        let verdict = match evidence {
            Evidence::Bytes(bytes) => self.verifier.verify_against_root(bytes, proof, &root),
            Evidence::File(path) => {
                self.verifier
                    .verify_file_against_root(path, proof, &root)
                    .await?
            }
        };
        self.report(proof, &verdict, file_id).await;
        Ok(verdict)
    }

    /// Drop the local key record. The stored payload becomes undecryptable
    /// unless the key can be derived again.
    pub fn forget_key(&self, file_id: &FileId) -> EvlockResult<()> {
        self.keys.delete(file_id)?;
        info!(file_id = %file_id, "forgot key record");
        Ok(())
    }

    fn remember_key(&self, file_id: &FileId, issued: &IssuedFile) -> EvlockResult<()> {
        let record = LocalKeyRecord::new(file_id.clone(), issued.metadata.clone(), issued.key.clone());
        self.keys.put(&record).map_err(|e| {
            tracing::error!(file_id = %file_id, error = %e, "uploaded but key record not saved");
            e
        })
    }

    async fn report(&self, proof: &IntegrityProof, verdict: &Verdict, file_id: Option<&FileId>) {
        if let Err(e) = self.ledger.acknowledge(&proof.proof_id, verdict).await {
            warn!(proof_id = %proof.proof_id, error = %e, "ledger acknowledgement failed");
        }
        let mut event = AuditEvent::for_context(AuditKind::Verify, &proof.context)
            .reference(proof.proof_id.to_string())
            .verified(verdict.is_verified());
        if let Some(id) = file_id {
            event = event.file(id);
        }
        self.audit(event).await;
    }

    async fn audit(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(e) = self.audit.record(event).await {
            warn!(kind = ?kind, error = %e, "audit event not recorded");
        }
    }
}

impl std::fmt::Debug for EvidencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidencePipeline")
            .field("issuer", &self.issuer)
            .field("key_policy", &self.key_policy)
            .finish_non_exhaustive()
    }
}

/// Moves the ciphertext out of `issued`; the rest is copied.
fn upload_request(issued: &mut IssuedFile, context: &CaseContext) -> UploadRequest {
    UploadRequest {
        ciphertext: std::mem::take(&mut issued.ciphertext),
        metadata: issued.metadata.clone(),
        content_hash: issued.content_hash,
        proof: issued.proof.clone(),
        batch: issued.batch.clone(),
        context: context.clone(),
    }
}

fn receipt(file_id: FileId, issued: IssuedFile) -> UploadReceipt {
    UploadReceipt {
        file_id,
        file_name: issued.file_name,
        content_hash: issued.content_hash,
        metadata: issued.metadata,
        proof: issued.proof,
        proof_error: issued.proof_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LocalLedger;
    use crate::store::OperatorEvidenceStore;
    use evlock_keystore::MemoryStore;

    #[test]
    fn verifier_reads_with_the_configured_buffer() {
        let mut config = EvlockConfig::default();
        config.hashing.read_buffer_kib = 4;
        let ledger = Arc::new(LocalLedger::new());
        let pipeline = EvidencePipeline::builder()
            .config(&config)
            .unwrap()
            .storage(Arc::new(OperatorEvidenceStore::memory("evidence").unwrap()))
            .ledger(ledger.clone())
            .audit(ledger)
            .keys(KeyMetadataStore::new(Arc::new(MemoryStore::new())))
            .build()
            .unwrap();
        assert_eq!(pipeline.verifier.buffer_size, 4096);
    }
}
