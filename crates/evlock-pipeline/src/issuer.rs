//! Integrity proof issuance: hash, encrypt, anchor.
//!
//! Each file moves through
//! `Idle → Hashing → Encrypting → Committing → Complete | Failed`
//! exactly once. Progress is reported through an optional callback; every
//! file gets exactly one terminal event, even when a batch aborts halfway.
//!
//! Hash, encryption, and tree failures abort with `Err`. A ledger failure
//! does not: the file comes back without a proof and with `proof_error` set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use evlock_core::{now_unix, CaseContext, EvlockError, EvlockResult};
use evlock_crypto::{EncryptionKey, EncryptionMetadata, SymmetricCipher};
use evlock_hash::{ContentHash, ContentHasher, MerkleTree};

use crate::collaborators::ProofLedger;
use crate::records::{Anchor, BatchMembership, IntegrityProof, LedgerReceipt};

/// Per-file pipeline stage, in the order files move through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Hashing,
    Encrypting,
    Committing,
    Complete,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Hashing => "hashing",
            Stage::Encrypting => "encrypting",
            Stage::Committing => "committing",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Position of the file in the submitted batch (0 for single uploads)
    pub index: usize,
    pub file_name: String,
    pub stage: Stage,
    /// Set on `Failed`, and on `Failed` only
    pub error: Option<String>,
}

/// Progress callback, invoked once per stage transition
pub type ProgressFn = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Drives one file's stage transitions and reports them.
///
/// `complete` and `fail` consume the tracker, so a second terminal event
/// cannot be emitted. A tracker dropped before either reports `Failed`.
pub struct StageTracker<'a> {
    index: usize,
    file_name: String,
    stage: Stage,
    progress: Option<&'a ProgressFn>,
}

impl<'a> StageTracker<'a> {
    pub fn new(index: usize, file_name: impl Into<String>, progress: Option<&'a ProgressFn>) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            stage: Stage::Idle,
            progress,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Move forward to a non-terminal stage.
    pub fn advance(&mut self, next: Stage) {
        debug_assert!(
            !next.is_terminal() && next > self.stage,
            "invalid transition {} -> {}",
            self.stage,
            next
        );
        self.transition(next, None);
    }

    pub fn complete(mut self) {
        self.transition(Stage::Complete, None);
    }

    pub fn fail(mut self, err: &EvlockError) {
        self.transition(Stage::Failed, Some(err.to_string()));
    }

    fn transition(&mut self, next: Stage, error: Option<String>) {
        debug!(
            index = self.index,
            file = %self.file_name,
            from = %self.stage,
            to = %next,
            "stage transition"
        );
        self.stage = next;
        if let Some(progress) = self.progress {
            progress(&ProgressEvent {
                index: self.index,
                file_name: self.file_name.clone(),
                stage: next,
                error,
            });
        }
    }
}

impl Drop for StageTracker<'_> {
    fn drop(&mut self) {
        if !self.stage.is_terminal() {
            self.transition(
                Stage::Failed,
                Some("processing stopped before this file completed".into()),
            );
        }
    }
}

#[derive(Debug, Clone)]
enum EvidenceSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One file submitted for issuance.
///
/// A path-backed file is read into memory during the hashing stage; that
/// same buffer is then encrypted, so the hash always describes exactly the
/// bytes that were sealed.
#[derive(Debug, Clone)]
pub struct EvidenceFile {
    name: String,
    source: EvidenceSource,
}

impl EvidenceFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: EvidenceSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: EvidenceSource::Path(path.to_path_buf()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn load(self) -> EvlockResult<Vec<u8>> {
        match self.source {
            EvidenceSource::Bytes(bytes) => Ok(bytes),
            EvidenceSource::Path(path) => tokio::fs::read(&path).await.map_err(|e| {
                EvlockError::Hashing(format!("reading {}: {e}", path.display()))
            }),
        }
    }
}

/// Output of issuance for one file.
#[derive(Debug, Clone)]
pub struct IssuedFile {
    pub index: usize,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub ciphertext: Vec<u8>,
    pub metadata: EncryptionMetadata,
    pub key: EncryptionKey,
    /// Present for batch members even when the ledger commit failed
    pub batch: Option<BatchMembership>,
    pub proof: Option<IntegrityProof>,
    pub proof_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedBatch {
    pub batch_id: String,
    pub root: ContentHash,
    /// In input order
    pub files: Vec<IssuedFile>,
    pub receipt: Option<LedgerReceipt>,
    pub proof_error: Option<String>,
}

struct Sealed<'a> {
    index: usize,
    tracker: StageTracker<'a>,
    hash: ContentHash,
    ciphertext: Vec<u8>,
    metadata: EncryptionMetadata,
    key: EncryptionKey,
}

pub struct IntegrityProofIssuer {
    hasher: ContentHasher,
    cipher: SymmetricCipher,
    ledger: Arc<dyn ProofLedger>,
    /// Files hashed concurrently in a batch; 0 means all at once
    concurrency: usize,
}

impl IntegrityProofIssuer {
    pub fn new(ledger: Arc<dyn ProofLedger>) -> Self {
        Self {
            hasher: ContentHasher::default(),
            cipher: SymmetricCipher::default(),
            ledger,
            concurrency: 4,
        }
    }

    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_cipher(mut self, cipher: SymmetricCipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Hash, encrypt, and anchor a single file.
    pub async fn issue(
        &self,
        file: EvidenceFile,
        context: &CaseContext,
        key: EncryptionKey,
        progress: Option<&ProgressFn>,
    ) -> EvlockResult<IssuedFile> {
        let mut tracker = StageTracker::new(0, file.name(), progress);

        tracker.advance(Stage::Hashing);
        let bytes = match file.load().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };
        let content_hash = self.hasher.hash_bytes(&bytes);

        tracker.advance(Stage::Encrypting);
        let (ciphertext, metadata) =
            match self.cipher.encrypt_owned(bytes, tracker.file_name(), &key) {
                Ok(sealed) => sealed,
                Err(e) => {
                    tracker.fail(&e);
                    return Err(e);
                }
            };

        tracker.advance(Stage::Committing);
        let anchor = Anchor::Content { hash: content_hash };
        let (proof, proof_error) = match self.commit(&anchor, context).await {
            Ok(receipt) => {
                info!(
                    file = %tracker.file_name(),
                    hash = %content_hash,
                    proof_id = %receipt.proof_id,
                    "issued integrity proof"
                );
                let proof = IntegrityProof {
                    proof_id: receipt.proof_id,
                    tx_ref: receipt.tx_ref,
                    bound_hash: content_hash,
                    issued_at: now_unix(),
                    context: context.clone(),
                    batch: None,
                };
                (Some(proof), None)
            }
            Err(e) => (None, Some(e)),
        };

        let file_name = tracker.file_name().to_string();
        let proof_error = match proof_error {
            None => {
                tracker.complete();
                None
            }
            Some(e) => {
                warn!(file = %file_name, error = %e, "ledger commit failed; continuing without proof");
                let msg = e.to_string();
                tracker.fail(&e);
                Some(msg)
            }
        };

        Ok(IssuedFile {
            index: 0,
            file_name,
            content_hash,
            ciphertext,
            metadata,
            key,
            batch: None,
            proof,
            proof_error,
        })
    }

    /// Hash and encrypt files concurrently, then commit one Merkle root.
    ///
    /// Each file's plaintext is sealed in place as soon as it is hashed, so
    /// at most `concurrency` plaintexts are held at once. `key_for` is called
    /// with each file's input index.
    pub async fn issue_batch<F>(
        &self,
        files: Vec<EvidenceFile>,
        context: &CaseContext,
        key_for: F,
        progress: Option<&ProgressFn>,
    ) -> EvlockResult<IssuedBatch>
    where
        F: Fn(usize) -> EvlockResult<EncryptionKey> + Sync,
    {
        if files.is_empty() {
            return Err(EvlockError::TreeConstruction(
                "batch contains no files".into(),
            ));
        }
        let size = files.len();
        let concurrency = if self.concurrency == 0 {
            size
        } else {
            self.concurrency
        };

        // Trackers exist up front so files that are never reached still get
        // their terminal event when the batch aborts.
        let pending: Vec<_> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| (StageTracker::new(index, file.name(), progress), index, file))
            .collect();

        let hasher = self.hasher;
        let cipher = self.cipher;
        let key_for = &key_for;
        let mut sealing = stream::iter(pending)
            .map(move |(mut tracker, index, file)| async move {
                tracker.advance(Stage::Hashing);
                let bytes = match file.load().await {
                    Ok(bytes) => bytes,
                    Err(e) => return Err((tracker, e)),
                };
                let hash = hasher.hash_bytes(&bytes);

                tracker.advance(Stage::Encrypting);
                let key = match key_for(index) {
                    Ok(key) => key,
                    Err(e) => return Err((tracker, e)),
                };
                match cipher.encrypt_owned(bytes, tracker.file_name(), &key) {
                    Ok((ciphertext, metadata)) => Ok(Sealed {
                        index,
                        tracker,
                        hash,
                        ciphertext,
                        metadata,
                        key,
                    }),
                    Err(e) => Err((tracker, e)),
                }
            })
            .buffer_unordered(concurrency);

        let mut sealed = Vec::with_capacity(size);
        while let Some(result) = sealing.next().await {
            match result {
                Ok(item) => sealed.push(item),
                Err((tracker, e)) => {
                    tracker.fail(&e);
                    return Err(e);
                }
            }
        }
        drop(sealing);

        // Completion order is arbitrary; the tree must follow input order
        sealed.sort_by_key(|s| s.index);
        debug!(files = size, "batch hashing and encryption complete");

        let leaves: Vec<ContentHash> = sealed.iter().map(|s| s.hash).collect();
        let tree = match MerkleTree::build(&leaves) {
            Ok(tree) => tree,
            Err(e) => {
                for s in sealed {
                    s.tracker.fail(&e);
                }
                return Err(e);
            }
        };
        let root = tree.root();
        let batch_id = format!("batch_{}", Uuid::new_v4().simple());

        for s in &mut sealed {
            s.tracker.advance(Stage::Committing);
        }
        let anchor = Anchor::BatchRoot { root, size };
        let commit = self.commit(&anchor, context).await;
        let issued_at = now_unix();

        let (receipt, ledger_error) = match commit {
            Ok(receipt) => {
                info!(
                    batch_id = %batch_id,
                    files = size,
                    root = %root,
                    proof_id = %receipt.proof_id,
                    "issued batch integrity proof"
                );
                (Some(receipt), None)
            }
            Err(e) => {
                warn!(
                    batch_id = %batch_id,
                    files = size,
                    error = %e,
                    "ledger commit of batch root failed; continuing without proofs"
                );
                (None, Some(e))
            }
        };

        let mut files = Vec::with_capacity(size);
        for s in sealed {
            let membership = BatchMembership {
                batch_id: batch_id.clone(),
                root,
                index: s.index,
                size,
                path: tree.path(s.index).unwrap_or_default(),
            };
            let proof = receipt.as_ref().map(|r| IntegrityProof {
                proof_id: r.proof_id.clone(),
                tx_ref: r.tx_ref.clone(),
                bound_hash: s.hash,
                issued_at,
                context: context.clone(),
                batch: Some(membership.clone()),
            });
            let file_name = s.tracker.file_name().to_string();
            match &ledger_error {
                None => s.tracker.complete(),
                Some(e) => s.tracker.fail(e),
            }
            files.push(IssuedFile {
                index: s.index,
                file_name,
                content_hash: s.hash,
                ciphertext: s.ciphertext,
                metadata: s.metadata,
                key: s.key,
                batch: Some(membership),
                proof,
                proof_error: ledger_error.as_ref().map(|e| e.to_string()),
            });
        }

        Ok(IssuedBatch {
            batch_id,
            root,
            files,
            receipt,
            proof_error: ledger_error.map(|e| e.to_string()),
        })
    }

    async fn commit(&self, anchor: &Anchor, context: &CaseContext) -> EvlockResult<LedgerReceipt> {
        self.ledger
            .commit(anchor, context)
            .await
            .map_err(|e| match e {
                EvlockError::ProofIssuance(_) => e,
                other => EvlockError::ProofIssuance(other.to_string()),
            })
    }
}

impl std::fmt::Debug for IntegrityProofIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityProofIssuer")
            .field("hasher", &self.hasher)
            .field("cipher", &self.cipher)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evlock_core::ProofId;
    use evlock_crypto::{derive_key, generate_key};
    use evlock_hash::verify_inclusion;
    use std::sync::Mutex;

    use crate::verifier::Verdict;

    #[derive(Default)]
    struct RecordingLedger {
        anchors: Mutex<Vec<Anchor>>,
        fail: bool,
    }

    #[async_trait]
    impl ProofLedger for RecordingLedger {
        async fn commit(&self, anchor: &Anchor, _ctx: &CaseContext) -> EvlockResult<LedgerReceipt> {
            if self.fail {
                return Err(EvlockError::Other(anyhow::anyhow!("ledger unreachable")));
            }
            let mut anchors = self.anchors.lock().unwrap();
            anchors.push(anchor.clone());
            Ok(LedgerReceipt {
                proof_id: ProofId::new(format!("ZKP-{}", anchors.len())),
                tx_ref: format!("0x{:02x}", anchors.len()),
            })
        }

        async fn anchor(&self, proof_id: &ProofId) -> EvlockResult<Option<Anchor>> {
            let anchors = self.anchors.lock().unwrap();
            Ok(proof_id
                .as_str()
                .strip_prefix("ZKP-")
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|n| anchors.get(n.wrapping_sub(1)).cloned()))
        }

        async fn acknowledge(&self, _: &ProofId, _: &Verdict) -> EvlockResult<()> {
            Ok(())
        }
    }

    fn ctx() -> CaseContext {
        CaseContext::new("CASE-1", "a@x.gov")
    }

    fn collector() -> (Arc<Mutex<Vec<ProgressEvent>>>, ProgressFn) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let progress: ProgressFn = Box::new(move |e| sink.lock().unwrap().push(e.clone()));
        (events, progress)
    }

    fn stages_for(events: &[ProgressEvent], index: usize) -> Vec<Stage> {
        events
            .iter()
            .filter(|e| e.index == index)
            .map(|e| e.stage)
            .collect()
    }

    #[test]
    fn tracker_drop_reports_failure_once() {
        let (events, progress) = collector();
        {
            let mut t = StageTracker::new(3, "a.bin", Some(&progress));
            t.advance(Stage::Hashing);
        }
        let events = events.lock().unwrap();
        assert_eq!(stages_for(&events, 3), vec![Stage::Hashing, Stage::Failed]);
        assert!(events[1].error.is_some());
    }

    #[test]
    fn tracker_complete_suppresses_drop_event() {
        let (events, progress) = collector();
        let mut t = StageTracker::new(0, "a.bin", Some(&progress));
        t.advance(Stage::Hashing);
        t.advance(Stage::Encrypting);
        t.advance(Stage::Committing);
        t.complete();
        let events = events.lock().unwrap();
        assert_eq!(
            stages_for(&events, 0),
            vec![Stage::Hashing, Stage::Encrypting, Stage::Committing, Stage::Complete]
        );
        assert!(events.iter().all(|e| e.error.is_none()));
    }

    #[tokio::test]
    async fn issue_single_file() {
        let ledger = Arc::new(RecordingLedger::default());
        let issuer = IntegrityProofIssuer::new(ledger.clone());
        let (events, progress) = collector();
        let data = b"%PDF-1.7 report".to_vec();
        let key = derive_key("a@x.gov", "CASE-1").unwrap();

        let issued = issuer
            .issue(
                EvidenceFile::from_bytes("report.pdf", data.clone()),
                &ctx(),
                key.clone(),
                Some(&progress),
            )
            .await
            .unwrap();

        let expected = ContentHasher::default().hash_bytes(&data);
        assert_eq!(issued.content_hash, expected);
        let proof = issued.proof.as_ref().unwrap();
        assert_eq!(proof.bound_hash, expected);
        assert_eq!(proof.proof_id.as_str(), "ZKP-1");
        assert!(proof.batch.is_none());
        assert_eq!(
            ledger.anchors.lock().unwrap()[0],
            Anchor::Content { hash: expected }
        );

        // The committed hash describes exactly the sealed bytes
        let opened = SymmetricCipher::decrypt(&issued.ciphertext, &issued.metadata, &key).unwrap();
        assert_eq!(ContentHasher::default().hash_bytes(&opened), expected);

        assert_eq!(
            stages_for(&events.lock().unwrap(), 0),
            vec![Stage::Hashing, Stage::Encrypting, Stage::Committing, Stage::Complete]
        );
    }

    #[tokio::test]
    async fn ledger_failure_keeps_file_without_proof() {
        let ledger = Arc::new(RecordingLedger {
            fail: true,
            ..Default::default()
        });
        let issuer = IntegrityProofIssuer::new(ledger);
        let (events, progress) = collector();

        let issued = issuer
            .issue(
                EvidenceFile::from_bytes("photo.jpg", b"jpeg".to_vec()),
                &ctx(),
                generate_key(),
                Some(&progress),
            )
            .await
            .unwrap();

        assert!(issued.proof.is_none());
        assert!(issued.proof_error.as_deref().unwrap().contains("ledger unreachable"));
        assert!(!issued.ciphertext.is_empty());

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, Stage::Failed);
        assert!(last.error.as_deref().unwrap().contains("proof issuance failed"));
        assert_eq!(events.iter().filter(|e| e.stage.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn unreadable_file_aborts_with_hashing_error() {
        let issuer = IntegrityProofIssuer::new(Arc::new(RecordingLedger::default()));
        let (events, progress) = collector();
        let err = issuer
            .issue(
                EvidenceFile::from_path(Path::new("/nonexistent/evidence.bin")),
                &ctx(),
                generate_key(),
                Some(&progress),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EvlockError::Hashing(_)));
        assert_eq!(
            stages_for(&events.lock().unwrap(), 0),
            vec![Stage::Hashing, Stage::Failed]
        );
    }

    #[tokio::test]
    async fn batch_commits_root_once_in_input_order() {
        let ledger = Arc::new(RecordingLedger::default());
        let issuer = IntegrityProofIssuer::new(ledger.clone()).with_concurrency(2);
        let (events, progress) = collector();
        let contents: Vec<Vec<u8>> = (0..5).map(|i| format!("exhibit {i}").into_bytes()).collect();
        let files = contents
            .iter()
            .enumerate()
            .map(|(i, c)| EvidenceFile::from_bytes(format!("e{i}.txt"), c.clone()))
            .collect();

        let batch = issuer
            .issue_batch(files, &ctx(), |_| derive_key("a@x.gov", "CASE-1"), Some(&progress))
            .await
            .unwrap();

        let hasher = ContentHasher::default();
        let leaves: Vec<_> = contents.iter().map(|c| hasher.hash_bytes(c)).collect();
        assert_eq!(batch.root, MerkleTree::build(&leaves).unwrap().root());

        let anchors = ledger.anchors.lock().unwrap();
        assert_eq!(anchors.len(), 1, "one commit for the whole batch");
        assert_eq!(anchors[0], Anchor::BatchRoot { root: batch.root, size: 5 });

        for (i, f) in batch.files.iter().enumerate() {
            assert_eq!(f.index, i);
            assert_eq!(f.file_name, format!("e{i}.txt"));
            assert_eq!(f.content_hash, leaves[i]);
            let m = f.batch.as_ref().unwrap();
            assert!(verify_inclusion(&f.content_hash, &m.path, &batch.root));
            assert_eq!(f.proof.as_ref().unwrap().batch.as_ref(), Some(m));
        }

        let events = events.lock().unwrap();
        for i in 0..5 {
            assert_eq!(
                stages_for(&events, i),
                vec![Stage::Hashing, Stage::Encrypting, Stage::Committing, Stage::Complete]
            );
        }
    }

    #[tokio::test]
    async fn slow_first_file_still_lands_at_leaf_zero() {
        // The path-backed file waits on a blocking read; the in-memory ones
        // finish on their first poll, so index 0 completes last.
        let tmp = tempfile::tempdir().unwrap();
        let slow_path = tmp.path().join("disk-image.raw");
        let slow = vec![0xA5u8; 4 * 1024 * 1024];
        std::fs::write(&slow_path, &slow).unwrap();
        let contents = [slow, b"exhibit 1".to_vec(), b"exhibit 2".to_vec()];

        let ledger = Arc::new(RecordingLedger::default());
        let issuer = IntegrityProofIssuer::new(ledger.clone()).with_concurrency(3);
        let (events, progress) = collector();
        let files = vec![
            EvidenceFile::from_path(&slow_path),
            EvidenceFile::from_bytes("e1.txt", contents[1].clone()),
            EvidenceFile::from_bytes("e2.txt", contents[2].clone()),
        ];

        let batch = issuer
            .issue_batch(files, &ctx(), |_| derive_key("a@x.gov", "CASE-1"), Some(&progress))
            .await
            .unwrap();

        let encrypting_order: Vec<usize> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.stage == Stage::Encrypting)
            .map(|e| e.index)
            .collect();
        assert_eq!(encrypting_order.len(), 3);
        assert_eq!(encrypting_order.last(), Some(&0), "index 0 should finish hashing last");

        let hasher = ContentHasher::default();
        let leaves: Vec<_> = contents.iter().map(|c| hasher.hash_bytes(c)).collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        assert_eq!(batch.root, tree.root());
        assert_eq!(
            ledger.anchors.lock().unwrap()[0],
            Anchor::BatchRoot { root: tree.root(), size: 3 }
        );

        let names = ["disk-image.raw", "e1.txt", "e2.txt"];
        for (i, f) in batch.files.iter().enumerate() {
            assert_eq!(f.index, i);
            assert_eq!(f.file_name, names[i]);
            assert_eq!(f.content_hash, leaves[i]);
            let m = f.batch.as_ref().unwrap();
            assert_eq!(m.index, i);
            assert_eq!(Some(m.path.clone()), tree.path(i));
        }
    }

    #[tokio::test]
    async fn batch_failure_gives_every_file_one_terminal_event() {
        let issuer = IntegrityProofIssuer::new(Arc::new(RecordingLedger::default()))
            .with_concurrency(1);
        let (events, progress) = collector();
        let files = vec![
            EvidenceFile::from_bytes("ok.txt", b"fine".to_vec()),
            EvidenceFile::from_path(Path::new("/nonexistent/missing.bin")),
            EvidenceFile::from_bytes("never.txt", b"unreached".to_vec()),
        ];

        let err = issuer
            .issue_batch(files, &ctx(), |_| Ok(generate_key()), Some(&progress))
            .await
            .unwrap_err();
        assert!(matches!(err, EvlockError::Hashing(_)));

        let events = events.lock().unwrap();
        for i in 0..3 {
            let stages = stages_for(&events, i);
            assert_eq!(
                stages.iter().filter(|s| s.is_terminal()).count(),
                1,
                "file {i} got {stages:?}"
            );
            assert_eq!(stages.last(), Some(&Stage::Failed));
        }
    }

    #[tokio::test]
    async fn batch_ledger_failure_keeps_membership() {
        let ledger = Arc::new(RecordingLedger {
            fail: true,
            ..Default::default()
        });
        let issuer = IntegrityProofIssuer::new(ledger);
        let files = vec![
            EvidenceFile::from_bytes("a", b"a".to_vec()),
            EvidenceFile::from_bytes("b", b"b".to_vec()),
        ];
        let batch = issuer
            .issue_batch(files, &ctx(), |_| Ok(generate_key()), None)
            .await
            .unwrap();

        assert!(batch.receipt.is_none());
        assert!(batch.proof_error.is_some());
        for f in &batch.files {
            assert!(f.proof.is_none());
            assert_eq!(f.batch.as_ref().unwrap().root, batch.root);
        }
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let issuer = IntegrityProofIssuer::new(Arc::new(RecordingLedger::default()));
        let err = issuer
            .issue_batch(Vec::new(), &ctx(), |_| Ok(generate_key()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EvlockError::TreeConstruction(_)));
    }
}
