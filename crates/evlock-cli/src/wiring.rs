//! Builds the pipeline and its local collaborators from config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use evlock_core::config::EvlockConfig;
use evlock_keystore::{JsonFileStore, KeyMetadataStore, KeyValueStore, KeychainStore, MemoryStore};
use evlock_pipeline::{EvidencePipeline, LocalLedger, OperatorEvidenceStore};

pub fn build(config: &EvlockConfig) -> Result<EvidencePipeline> {
    let store = Arc::new(build_store(config)?);
    let ledger = Arc::new(match &config.ledger.journal {
        Some(journal) => {
            let path = expand_tilde(journal);
            LocalLedger::with_journal(&path)
                .with_context(|| format!("opening ledger journal: {}", path.display()))?
        }
        None => {
            tracing::warn!("no ledger journal: proofs cannot be verified after this process exits");
            LocalLedger::new()
        }
    });

    EvidencePipeline::builder()
        .config(config)
        .context("applying config")?
        .storage(store.clone())
        .ledger(ledger.clone())
        .audit(ledger)
        .keys(build_keys(config)?)
        .build()
        .context("building pipeline")
}

pub fn build_keys(config: &EvlockConfig) -> Result<KeyMetadataStore> {
    let ks = &config.keystore;
    let backend: Arc<dyn KeyValueStore> = match ks.backend.as_str() {
        "json" => {
            let path = expand_tilde(&ks.path);
            Arc::new(
                JsonFileStore::open(&path)
                    .with_context(|| format!("opening key store: {}", path.display()))?,
            )
        }
        "keychain" => {
            let store = KeychainStore::new(ks.keychain_service.clone());
            if !store.is_available() {
                anyhow::bail!("platform keychain is not available; set keystore.backend = \"json\"");
            }
            Arc::new(store)
        }
        "memory" => {
            tracing::warn!("memory key store: keys are lost when the process exits");
            Arc::new(MemoryStore::new())
        }
        other => anyhow::bail!("unknown keystore.backend '{other}' (expected json, keychain, or memory)"),
    };
    Ok(KeyMetadataStore::new(backend))
}

fn build_store(config: &EvlockConfig) -> Result<OperatorEvidenceStore> {
    let storage = &config.storage;
    match storage.backend.as_str() {
        "fs" => {
            let root = expand_tilde(&storage.root);
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating storage root: {}", root.display()))?;
            OperatorEvidenceStore::filesystem(&root, storage.prefix.clone())
                .context("building fs storage operator")
        }
        "memory" => {
            tracing::warn!("memory storage: uploads are lost when the process exits");
            OperatorEvidenceStore::memory(storage.prefix.clone())
                .context("building memory storage operator")
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected fs or memory)"),
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    expand_tilde_in(path, Path::new(&home))
}

fn expand_tilde_in(path: &Path, home: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => path.to_path_buf(),
    }
}
