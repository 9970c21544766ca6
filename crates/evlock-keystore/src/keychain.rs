//! Platform keychain backend via the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: Secret Service (D-Bus)
//! - Windows: Credential Manager
//!
//! Keychains cannot enumerate entries, so the store keeps its own key index
//! as a JSON array under [`INDEX_ENTRY`].

use std::sync::Mutex;

use zeroize::Zeroize;

use evlock_core::{EvlockError, EvlockResult};

use crate::backend::KeyValueStore;

/// Default keychain service name
pub const DEFAULT_SERVICE: &str = "evlock";

/// Entry holding the sorted list of stored keys
pub const INDEX_ENTRY: &str = "__evlock_index__";

pub struct KeychainStore {
    service: String,
    /// Serializes index read-modify-write cycles within this process
    index_lock: Mutex<()>,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check whether a keychain entry can be created for this service.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__evlock_availability__").is_ok()
    }

    fn entry(&self, key: &str) -> EvlockResult<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| EvlockError::Store(format!("keychain entry creation: {e}")))
    }

    fn read(&self, key: &str) -> EvlockResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(EvlockError::Store(format!("keychain get for '{key}': {e}"))),
        }
    }

    fn write(&self, key: &str, value: &str) -> EvlockResult<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| EvlockError::Store(format!("keychain store for '{key}': {e}")))
    }

    fn remove(&self, key: &str) -> EvlockResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(EvlockError::Store(format!("keychain delete for '{key}': {e}"))),
        }
    }

    fn load_index(&self) -> EvlockResult<Vec<String>> {
        match self.read(INDEX_ENTRY)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| EvlockError::Store(format!("keychain index is corrupt: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    fn save_index(&self, index: &[String]) -> EvlockResult<()> {
        let json = serde_json::to_string(index)
            .map_err(|e| EvlockError::Store(format!("serializing keychain index: {e}")))?;
        self.write(INDEX_ENTRY, &json)
    }

    fn lock_index(&self) -> EvlockResult<std::sync::MutexGuard<'_, ()>> {
        self.index_lock
            .lock()
            .map_err(|_| EvlockError::Store("keychain index lock poisoned".into()))
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl std::fmt::Debug for KeychainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainStore")
            .field("service", &self.service)
            .finish()
    }
}

impl KeyValueStore for KeychainStore {
    fn get(&self, key: &str) -> EvlockResult<Option<String>> {
        self.read(key)
    }

    fn put(&self, key: &str, value: &str) -> EvlockResult<()> {
        if key == INDEX_ENTRY {
            return Err(EvlockError::Store(format!("'{INDEX_ENTRY}' is reserved")));
        }
        self.write(key, value)?;

        let _guard = self.lock_index()?;
        let mut index = self.load_index()?;
        if let Err(pos) = index.binary_search_by(|k| k.as_str().cmp(key)) {
            index.insert(pos, key.to_string());
            self.save_index(&index)?;
        }
        tracing::debug!(service = %self.service, key, "stored entry in platform keychain");
        Ok(())
    }

    fn delete(&self, key: &str) -> EvlockResult<()> {
        self.remove(key)?;

        let _guard = self.lock_index()?;
        let mut index = self.load_index()?;
        if let Ok(pos) = index.binary_search_by(|k| k.as_str().cmp(key)) {
            let mut removed = index.remove(pos);
            removed.zeroize();
            self.save_index(&index)?;
        }
        tracing::debug!(service = %self.service, key, "deleted entry from platform keychain");
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> EvlockResult<Vec<String>> {
        let _guard = self.lock_index()?;
        Ok(self
            .load_index()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
