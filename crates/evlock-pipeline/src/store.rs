//! Evidence storage on an OpenDAL operator.
//!
//! Layout under `prefix`:
//!   `{prefix}/blobs/{file_id}`          stored payload (ciphertext)
//!   `{prefix}/records/{file_id}.json`   EvidenceRecord
//!
//! The blob is written before the record, so a record never points at a
//! missing blob.

use std::path::Path;

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use tracing::{debug, info};
use uuid::Uuid;

use evlock_core::{now_unix, EvlockError, EvlockResult, FileId};

use crate::collaborators::{BatchUploadRequest, DownloadService, UploadRequest, UploadService};
use crate::records::EvidenceRecord;

#[derive(Debug, Clone)]
pub struct OperatorEvidenceStore {
    op: Operator,
    prefix: String,
}

impl OperatorEvidenceStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { op, prefix }
    }

    /// Volatile store, mostly for tests and dry runs.
    pub fn memory(prefix: impl Into<String>) -> EvlockResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| EvlockError::Upload(format!("creating memory operator: {e}")))?
            .finish();
        Ok(Self::new(op, prefix))
    }

    /// Store rooted at a local directory.
    pub fn filesystem(root: &Path, prefix: impl Into<String>) -> EvlockResult<Self> {
        let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
        let op = Operator::new(builder)
            .map_err(|e| {
                EvlockError::Upload(format!("creating fs operator at {}: {e}", root.display()))
            })?
            .layer(opendal::layers::LoggingLayer::default())
            .finish();
        Ok(Self::new(op, prefix))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn blob_path(&self, file_id: &FileId) -> String {
        format!("{}/blobs/{}", self.prefix, file_id)
    }

    pub fn record_path(&self, file_id: &FileId) -> String {
        format!("{}/records/{}.json", self.prefix, file_id)
    }

    /// Write a payload exactly as given, with no record. Stands in for
    /// uploads made before client-side encryption existed.
    pub async fn put_raw(&self, file_id: &FileId, bytes: Vec<u8>) -> EvlockResult<()> {
        self.op
            .write(&self.blob_path(file_id), bytes)
            .await
            .map_err(|e| EvlockError::Upload(format!("writing blob {file_id}: {e}")))?;
        Ok(())
    }

    async fn store(&self, request: UploadRequest) -> EvlockResult<FileId> {
        let file_id = FileId::new(format!("file_{}", Uuid::new_v4().simple()));
        let bytes = request.ciphertext.len();

        let record = EvidenceRecord {
            file_id: file_id.clone(),
            context: request.context,
            metadata: request.metadata,
            content_hash: request.content_hash,
            proof: request.proof,
            batch: request.batch,
            uploaded_at: now_unix(),
        };
        let record_json = serde_json::to_vec_pretty(&record)
            .map_err(|e| EvlockError::Upload(format!("serializing record: {e}")))?;

        self.put_raw(&file_id, request.ciphertext).await?;
        self.op
            .write(&self.record_path(&file_id), record_json)
            .await
            .map_err(|e| EvlockError::Upload(format!("writing record {file_id}: {e}")))?;

        debug!(file_id = %file_id, bytes, hash = %record.content_hash.short(), "stored evidence");
        Ok(file_id)
    }
}

#[async_trait]
impl UploadService for OperatorEvidenceStore {
    async fn upload(&self, request: UploadRequest) -> EvlockResult<FileId> {
        let file_id = self.store(request).await?;
        info!(file_id = %file_id, "uploaded evidence");
        Ok(file_id)
    }

    async fn upload_batch(&self, request: BatchUploadRequest) -> EvlockResult<Vec<FileId>> {
        let mut ids = Vec::with_capacity(request.files.len());
        for file in request.files {
            ids.push(self.store(file).await?);
        }
        info!(
            batch_id = %request.batch_id,
            files = ids.len(),
            root = %request.root,
            "uploaded evidence batch"
        );
        Ok(ids)
    }
}

#[async_trait]
impl DownloadService for OperatorEvidenceStore {
    async fn download(&self, file_id: &FileId) -> EvlockResult<Vec<u8>> {
        match self.op.read(&self.blob_path(file_id)).await {
            Ok(buf) => Ok(buf.to_vec()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EvlockError::Download(format!("no stored evidence for {file_id}")))
            }
            Err(e) => Err(EvlockError::Download(format!("reading blob {file_id}: {e}"))),
        }
    }

    async fn record(&self, file_id: &FileId) -> EvlockResult<Option<EvidenceRecord>> {
        let buf = match self.op.read(&self.record_path(file_id)).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EvlockError::Download(format!(
                    "reading record {file_id}: {e}"
                )))
            }
        };
        let record = serde_json::from_slice(&buf.to_vec())
            .map_err(|e| EvlockError::Download(format!("parsing record {file_id}: {e}")))?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evlock_core::CaseContext;
    use evlock_crypto::{generate_key, SymmetricCipher};
    use evlock_hash::ContentHasher;

    fn request(data: &[u8]) -> UploadRequest {
        let (ciphertext, metadata) = SymmetricCipher::default()
            .encrypt(data, "e.bin", &generate_key())
            .unwrap();
        UploadRequest {
            ciphertext,
            metadata,
            content_hash: ContentHasher::default().hash_bytes(data),
            proof: None,
            batch: None,
            context: CaseContext::new("CASE-1", "a@x.gov"),
        }
    }

    #[tokio::test]
    async fn upload_then_download_and_record() {
        let store = OperatorEvidenceStore::memory("evidence").unwrap();
        let req = request(b"exhibit");
        let ciphertext = req.ciphertext.clone();

        let id = store.upload(req).await.unwrap();
        assert!(id.as_str().starts_with("file_"));
        assert_eq!(store.download(&id).await.unwrap(), ciphertext);

        let record = store.record(&id).await.unwrap().unwrap();
        assert_eq!(record.file_id, id);
        assert_eq!(record.metadata.original_name, "e.bin");
        assert!(store.operator().exists(&store.record_path(&id)).await.unwrap());
    }

    #[tokio::test]
    async fn batch_ids_follow_input_order() {
        let store = OperatorEvidenceStore::memory("/evidence/").unwrap();
        let files: Vec<_> = (0..4).map(|i| request(format!("f{i}").as_bytes())).collect();
        let hashes: Vec<_> = files.iter().map(|f| f.content_hash).collect();

        let ids = store
            .upload_batch(BatchUploadRequest {
                batch_id: "batch_x".into(),
                root: hashes[0],
                files,
            })
            .await
            .unwrap();

        assert_eq!(ids.len(), 4);
        for (id, hash) in ids.iter().zip(&hashes) {
            assert_eq!(store.record(id).await.unwrap().unwrap().content_hash, *hash);
        }
        assert!(store.blob_path(&ids[0]).starts_with("evidence/blobs/"));
    }

    #[tokio::test]
    async fn unknown_id() {
        let store = OperatorEvidenceStore::memory("evidence").unwrap();
        let id = FileId::from("file_missing");
        assert!(matches!(
            store.download(&id).await.unwrap_err(),
            EvlockError::Download(_)
        ));
        assert!(store.record(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filesystem_backend_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let id = {
            let store = OperatorEvidenceStore::filesystem(tmp.path(), "evidence").unwrap();
            store.upload(request(b"on disk")).await.unwrap()
        };
        let reopened = OperatorEvidenceStore::filesystem(tmp.path(), "evidence").unwrap();
        assert!(reopened.record(&id).await.unwrap().is_some());
        assert!(tmp
            .path()
            .join("evidence/records")
            .join(format!("{id}.json"))
            .exists());
    }
}
