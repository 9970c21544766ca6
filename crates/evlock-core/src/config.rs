use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from evlock.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvlockConfig {
    pub logging: LoggingConfig,
    pub hashing: HashingConfig,
    pub crypto: CryptoConfig,
    pub storage: StorageConfig,
    pub keystore: KeystoreConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Content hash algorithm: "sha256" or "blake3"
    pub algorithm: String,
    /// Streaming read buffer in KiB
    pub read_buffer_kib: usize,
    /// Files hashed concurrently within one batch (0 = one per file)
    pub concurrency: usize,
}

/// Client-side encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// AEAD cipher: "aes-256-gcm" or "xchacha20-poly1305"
    pub cipher: String,
    /// "derived" (key from identity + case id) or "random" (fresh key per file)
    pub key_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "fs" or "memory"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Object prefix inside the backend
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// "json", "keychain", or "memory"
    pub backend: String,
    /// JSON key store path (json backend only)
    pub path: PathBuf,
    /// Service name used for platform keychain entries
    pub keychain_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Append-only JSON lines journal for the local ledger, replayed on start
    /// (in memory only if unset)
    pub journal: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: "sha256".into(),
            read_buffer_kib: 64,
            concurrency: 4,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            cipher: "aes-256-gcm".into(),
            key_policy: "derived".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/evlock/store"),
            prefix: "evidence".into(),
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            backend: "json".into(),
            path: PathBuf::from("~/.local/share/evlock/keys.json"),
            keychain_service: "evlock".into(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            journal: Some(PathBuf::from("~/.local/share/evlock/ledger.jsonl")),
        }
    }
}
