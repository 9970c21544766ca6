//! Local key records keyed by file id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use evlock_core::{EvlockError, EvlockResult, FileId};
use evlock_crypto::{EncryptionKey, EncryptionMetadata};

use crate::backend::KeyValueStore;

/// Key namespace inside the backing store
pub const RECORD_PREFIX: &str = "evlock.key.";

/// Everything needed to decrypt one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalKeyRecord {
    pub file_id: FileId,
    pub metadata: EncryptionMetadata,
    pub key: EncryptionKey,
}

impl LocalKeyRecord {
    pub fn new(file_id: FileId, metadata: EncryptionMetadata, key: EncryptionKey) -> Self {
        Self {
            file_id,
            metadata,
            key,
        }
    }
}

fn storage_key(file_id: &FileId) -> String {
    format!("{RECORD_PREFIX}{file_id}")
}

/// Maps file ids to their local key records.
#[derive(Clone)]
pub struct KeyMetadataStore {
    backend: Arc<dyn KeyValueStore>,
}

impl KeyMetadataStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Insert or replace the record for `record.file_id`.
    pub fn put(&self, record: &LocalKeyRecord) -> EvlockResult<()> {
        let mut json = serde_json::to_string(record)
            .map_err(|e| EvlockError::Store(format!("serializing key record: {e}")))?;
        let result = self.backend.put(&storage_key(&record.file_id), &json);
        json.zeroize();
        result?;
        tracing::debug!(file_id = %record.file_id, "stored key record");
        Ok(())
    }

    /// `Ok(None)` means no record: the file predates client-side encryption
    /// or was uploaded elsewhere. A record that exists but cannot be parsed
    /// is an error.
    pub fn get(&self, file_id: &FileId) -> EvlockResult<Option<LocalKeyRecord>> {
        let Some(mut json) = self.backend.get(&storage_key(file_id))? else {
            return Ok(None);
        };
        let parsed = serde_json::from_str::<LocalKeyRecord>(&json);
        json.zeroize();
        let record = parsed.map_err(|e| {
            EvlockError::Store(format!("key record for {file_id} is unreadable: {e}"))
        })?;
        if record.file_id != *file_id {
            return Err(EvlockError::Store(format!(
                "key record under {file_id} belongs to {}",
                record.file_id
            )));
        }
        Ok(Some(record))
    }

    pub fn delete(&self, file_id: &FileId) -> EvlockResult<()> {
        self.backend.delete(&storage_key(file_id))?;
        tracing::debug!(file_id = %file_id, "deleted key record");
        Ok(())
    }

    /// File ids with a stored record, sorted.
    pub fn list(&self) -> EvlockResult<Vec<FileId>> {
        Ok(self
            .backend
            .keys_with_prefix(RECORD_PREFIX)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(RECORD_PREFIX).map(FileId::from))
            .collect())
    }
}

impl std::fmt::Debug for KeyMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMetadataStore").finish_non_exhaustive()
    }
}
