//! Local stand-in for the external proof ledger and audit trail.
//!
//! Commits are kept in memory and, when a journal path is configured,
//! appended as JSON lines and replayed on the next open. Identifiers are fabricated (`ZKP-<uuid>`,
//! `0x<hex>`); nothing here is a real ledger or proof system.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use evlock_core::{now_unix, CaseContext, EvlockError, EvlockResult, ProofId};

use crate::collaborators::{AuditSink, ProofLedger};
use crate::records::{Anchor, AuditEvent, LedgerReceipt};
use crate::verifier::Verdict;

/// One anchored commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub proof_id: ProofId,
    pub tx_ref: String,
    pub anchor: Anchor,
    pub case_id: String,
    pub committed_by: String,
    pub committed_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalLine {
    Commit(LedgerEntry),
    Acknowledge {
        proof_id: ProofId,
        verdict: Verdict,
        at: u64,
    },
    Audit(AuditEvent),
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    acknowledgements: Vec<(ProofId, Verdict)>,
    events: Vec<AuditEvent>,
}

#[derive(Debug, Default)]
pub struct LocalLedger {
    state: Mutex<LedgerState>,
    journal: Option<PathBuf>,
    /// Serializes journal appends
    journal_lock: tokio::sync::Mutex<()>,
}

impl LocalLedger {
    /// In-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journal-backed ledger, replaying every line already in `path`.
    ///
    /// A missing file is an empty ledger. A torn final line (an append cut
    /// short) is skipped with a warning; any other unreadable line is an error.
    pub fn with_journal(path: &Path) -> EvlockResult<Self> {
        let mut state = LedgerState::default();
        match std::fs::read_to_string(path) {
            Ok(content) => replay(&content, path, &mut state)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EvlockError::Other(anyhow::anyhow!(
                    "reading ledger journal {}: {e}",
                    path.display()
                )))
            }
        }
        info!(
            journal = %path.display(),
            commits = state.entries.len(),
            "opened local ledger"
        );
        Ok(Self {
            state: Mutex::new(state),
            journal: Some(path.to_path_buf()),
            journal_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn entries(&self) -> EvlockResult<Vec<LedgerEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    pub fn events(&self) -> EvlockResult<Vec<AuditEvent>> {
        Ok(self.lock()?.events.clone())
    }

    pub fn acknowledgements(&self) -> EvlockResult<Vec<(ProofId, Verdict)>> {
        Ok(self.lock()?.acknowledgements.clone())
    }

    /// The anchor committed under `proof_id`, if any.
    pub fn lookup(&self, proof_id: &ProofId) -> EvlockResult<Option<LedgerEntry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .find(|e| e.proof_id == *proof_id)
            .cloned())
    }

    fn lock(&self) -> EvlockResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| EvlockError::ProofIssuance("ledger state lock poisoned".into()))
    }

    async fn append(&self, line: &JournalLine) -> EvlockResult<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let mut json = serde_json::to_vec(line)
            .map_err(|e| EvlockError::ProofIssuance(format!("serializing journal line: {e}")))?;
        json.push(b'\n');

        let _guard = self.journal_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&json).await?;
        file.flush().await?;
        Ok(())
    }
}

fn replay(content: &str, path: &Path, state: &mut LedgerState) -> EvlockResult<()> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    for (n, line) in lines.iter().enumerate() {
        let parsed = match serde_json::from_str::<JournalLine>(line) {
            Ok(parsed) => parsed,
            Err(e) if n + 1 == lines.len() && !content.ends_with('\n') => {
                warn!(journal = %path.display(), error = %e, "skipping torn final journal line");
                break;
            }
            Err(e) => {
                return Err(EvlockError::Other(anyhow::anyhow!(
                    "ledger journal {} line {}: {e}",
                    path.display(),
                    n + 1
                )))
            }
        };
        match parsed {
            JournalLine::Commit(entry) => state.entries.push(entry),
            JournalLine::Acknowledge { proof_id, verdict, .. } => {
                state.acknowledgements.push((proof_id, verdict))
            }
            JournalLine::Audit(event) => state.events.push(event),
        }
    }
    Ok(())
}

#[async_trait]
impl ProofLedger for LocalLedger {
    async fn commit(&self, anchor: &Anchor, context: &CaseContext) -> EvlockResult<LedgerReceipt> {
        let entry = LedgerEntry {
            proof_id: ProofId::new(format!("ZKP-{}", Uuid::new_v4())),
            tx_ref: format!("0x{}", Uuid::new_v4().simple()),
            anchor: anchor.clone(),
            case_id: context.case_id.clone(),
            committed_by: context.identity.clone(),
            committed_at: now_unix(),
        };

        self.append(&JournalLine::Commit(entry.clone()))
            .await
            .map_err(|e| EvlockError::ProofIssuance(format!("journal append failed: {e}")))?;

        debug!(
            proof_id = %entry.proof_id,
            tx_ref = %entry.tx_ref,
            anchor = %anchor.hash(),
            "ledger commit"
        );
        let receipt = LedgerReceipt {
            proof_id: entry.proof_id.clone(),
            tx_ref: entry.tx_ref.clone(),
        };
        self.lock()?.entries.push(entry);
        Ok(receipt)
    }

    async fn anchor(&self, proof_id: &ProofId) -> EvlockResult<Option<Anchor>> {
        Ok(self.lookup(proof_id)?.map(|entry| entry.anchor))
    }

    async fn acknowledge(&self, proof_id: &ProofId, verdict: &Verdict) -> EvlockResult<()> {
        self.append(&JournalLine::Acknowledge {
            proof_id: proof_id.clone(),
            verdict: verdict.clone(),
            at: now_unix(),
        })
        .await?;
        self.lock()?
            .acknowledgements
            .push((proof_id.clone(), verdict.clone()));
        Ok(())
    }
}

#[async_trait]
impl AuditSink for LocalLedger {
    async fn record(&self, event: AuditEvent) -> EvlockResult<()> {
        self.append(&JournalLine::Audit(event.clone())).await?;
        debug!(kind = ?event.kind, case_id = %event.case_id, "audit event");
        self.lock()?.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::AuditKind;
    use evlock_hash::ContentHasher;

    fn ctx() -> CaseContext {
        CaseContext::new("CASE-1", "a@x.gov")
    }

    #[tokio::test]
    async fn commit_fabricates_identifiers() {
        let ledger = LocalLedger::new();
        let hash = ContentHasher::default().hash_bytes(b"x");
        let receipt = ledger
            .commit(&Anchor::Content { hash }, &ctx())
            .await
            .unwrap();

        assert!(receipt.proof_id.as_str().starts_with("ZKP-"));
        assert!(receipt.tx_ref.starts_with("0x"));
        let entry = ledger.lookup(&receipt.proof_id).unwrap().unwrap();
        assert_eq!(entry.anchor.hash(), hash);
        assert_eq!(entry.case_id, "CASE-1");
    }

    #[tokio::test]
    async fn journal_receives_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger").join("journal.jsonl");
        let ledger = LocalLedger::with_journal(&path).unwrap();
        let hash = ContentHasher::default().hash_bytes(b"y");

        let receipt = ledger
            .commit(&Anchor::BatchRoot { root: hash, size: 2 }, &ctx())
            .await
            .unwrap();
        ledger.acknowledge(&receipt.proof_id, &Verdict::Verified).await.unwrap();
        ledger
            .record(AuditEvent::for_context(AuditKind::Verify, &ctx()).verified(true))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["entry"], "commit");
        assert_eq!(lines[1]["entry"], "acknowledge");
        assert_eq!(lines[2]["entry"], "audit");

        assert_eq!(ledger.acknowledgements().unwrap().len(), 1);
        assert_eq!(ledger.events().unwrap()[0].verified, Some(true));
    }

    #[tokio::test]
    async fn unwritable_journal_is_proof_issuance_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.jsonl");
        let ledger = LocalLedger::with_journal(&path).unwrap();
        // A directory where the journal file should be
        std::fs::create_dir(&path).unwrap();

        let hash = ContentHasher::default().hash_bytes(b"z");
        let err = ledger
            .commit(&Anchor::Content { hash }, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, EvlockError::ProofIssuance(_)));
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopened_journal_still_knows_its_anchors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.jsonl");
        let root = ContentHasher::default().hash_bytes(b"root");
        let single = ContentHasher::default().hash_bytes(b"single");

        let (batch_receipt, single_receipt) = {
            let ledger = LocalLedger::with_journal(&path).unwrap();
            let b = ledger
                .commit(&Anchor::BatchRoot { root, size: 3 }, &ctx())
                .await
                .unwrap();
            let s = ledger
                .commit(&Anchor::Content { hash: single }, &ctx())
                .await
                .unwrap();
            ledger.acknowledge(&b.proof_id, &Verdict::Verified).await.unwrap();
            (b, s)
        };

        let reopened = LocalLedger::with_journal(&path).unwrap();
        assert_eq!(
            reopened.anchor(&batch_receipt.proof_id).await.unwrap(),
            Some(Anchor::BatchRoot { root, size: 3 })
        );
        assert_eq!(
            reopened.anchor(&single_receipt.proof_id).await.unwrap(),
            Some(Anchor::Content { hash: single })
        );
        assert_eq!(reopened.entries().unwrap().len(), 2);
        assert_eq!(reopened.acknowledgements().unwrap().len(), 1);
        assert!(reopened
            .anchor(&ProofId::new("ZKP-unknown"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn torn_last_line_is_skipped_but_corrupt_middle_line_is_not() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.jsonl");
        let receipt = {
            let ledger = LocalLedger::with_journal(&path).unwrap();
            ledger
                .commit(&Anchor::Content { hash: ContentHasher::default().hash_bytes(b"a") }, &ctx())
                .await
                .unwrap()
        };

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(r#"{"entry":"commit","proof_id":"ZKP-"#);
        std::fs::write(&path, &content).unwrap();
        let ledger = LocalLedger::with_journal(&path).unwrap();
        assert!(ledger.lookup(&receipt.proof_id).unwrap().is_some());

        std::fs::write(&path, format!("not json\n{content}\n")).unwrap();
        assert!(LocalLedger::with_journal(&path).is_err());
    }
}
