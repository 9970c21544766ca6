//! evlock-core: shared types, configuration schema, and the error taxonomy
//! used by every stage of the evidence pipeline.

pub mod config;
pub mod error;
pub mod types;

pub use error::{DecryptionFailure, EvlockError, EvlockResult};
pub use types::{now_unix, CaseContext, FileId, ProofId};
