//! evlock-keystore: where per-file decryption material lives
//!
//! A `LocalKeyRecord` (file id, encryption metadata, key) is written once
//! after the upload collaborator returns the file id. It never leaves the
//! machine. Backends are plain string key-value stores:
//!   - `MemoryStore`: tests and throwaway sessions
//!   - `JsonFileStore`: one JSON map on disk, rewritten atomically per change
//!   - `KeychainStore`: platform keychain via `keyring`

pub mod backend;
pub mod keychain;
pub mod record;

pub use backend::{JsonFileStore, KeyValueStore, MemoryStore};
pub use keychain::KeychainStore;
pub use record::{KeyMetadataStore, LocalKeyRecord, RECORD_PREFIX};
