//! String key-value backends.
//!
//! Writes are atomic per key. There is no cross-key coordination: callers
//! never update two keys as one unit.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use zeroize::Zeroize;

use evlock_core::{EvlockError, EvlockResult};

/// Minimal persistent map the key store is built on.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> EvlockResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> EvlockResult<()>;
    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> EvlockResult<()>;
    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> EvlockResult<Vec<String>>;
}

fn lock<T>(mutex: &Mutex<T>) -> EvlockResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EvlockError::Store("key store lock poisoned".into()))
}

fn sorted_with_prefix<'a>(keys: impl Iterator<Item = &'a String>, prefix: &str) -> Vec<String> {
    let mut out: Vec<String> = keys.filter(|k| k.starts_with(prefix)).cloned().collect();
    out.sort();
    out
}

/// In-memory map; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> EvlockResult<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> EvlockResult<()> {
        if let Some(mut old) = lock(&self.entries)?.insert(key.to_string(), value.to_string()) {
            old.zeroize();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> EvlockResult<()> {
        if let Some(mut old) = lock(&self.entries)?.remove(key) {
            old.zeroize();
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> EvlockResult<Vec<String>> {
        Ok(sorted_with_prefix(lock(&self.entries)?.keys(), prefix))
    }
}

/// A JSON object on disk, mirrored in memory.
///
/// Every mutation rewrites the whole file through a temp file and rename, so
/// a crash leaves either the old or the new map, never a partial one.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Load the store at `path`, or start empty if the file does not exist.
    pub fn open(path: &Path) -> EvlockResult<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading key store: {}", path.display()))?;
            serde_json::from_str(&content).map_err(|e| {
                EvlockError::Store(format!("parsing key store {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), "opened json key store");
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> EvlockResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating key store dir: {}", parent.display()))?;
        }

        let mut json = serde_json::to_string_pretty(entries).context("serializing key store")?;

        let tmp_path = self.path.with_extension("tmp");
        let written = std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing key store temp: {}", tmp_path.display()));
        json.zeroize();
        written?;

        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming key store: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> EvlockResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod 600: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> EvlockResult<()> {
    Ok(())
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> EvlockResult<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> EvlockResult<()> {
        let mut entries = lock(&self.entries)?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory consistent with what is on disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        if let Some(mut old) = previous {
            old.zeroize();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> EvlockResult<()> {
        let mut entries = lock(&self.entries)?;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        let mut previous = previous;
        previous.zeroize();
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> EvlockResult<Vec<String>> {
        Ok(sorted_with_prefix(lock(&self.entries)?.keys(), prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("a.1").unwrap(), None);
        store.put("a.1", "one").unwrap();
        store.put("a.2", "two").unwrap();
        store.put("b.1", "other").unwrap();
        assert_eq!(store.get("a.1").unwrap().as_deref(), Some("one"));

        store.put("a.1", "uno").unwrap();
        assert_eq!(store.get("a.1").unwrap().as_deref(), Some("uno"));

        assert_eq!(store.keys_with_prefix("a.").unwrap(), vec!["a.1", "a.2"]);

        store.delete("a.1").unwrap();
        store.delete("a.1").unwrap();
        assert_eq!(store.get("a.1").unwrap(), None);
        assert_eq!(store.keys_with_prefix("a.").unwrap(), vec!["a.2"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_json_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(&tmp.path().join("keys.json")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_json_store_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("keys.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.put("evlock.key.f1", "{\"k\":1}").unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("evlock.key.f1").unwrap().as_deref(),
            Some("{\"k\":1}")
        );
        assert!(!path.with_extension("tmp").exists(), "temp file must be renamed away");
    }

    #[cfg(unix)]
    #[test]
    fn test_json_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keys.json");
        JsonFileStore::open(&path).unwrap().put("k", "v").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keys.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, EvlockError::Store(_)));
    }
}
