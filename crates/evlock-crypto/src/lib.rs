//! evlock-crypto: client-side encryption of evidence files
//!
//! Pipeline position: original bytes are hashed first (evlock-hash), then
//! encrypted here. Nothing in this crate sees or alters the hash input.
//!
//! ```text
//! EncryptionKey (256-bit)
//!   ├── KeyPolicy::Derived: HKDF-SHA256(identity, case id)  (deterministic)
//!   └── KeyPolicy::Random:  OS CSPRNG, one per file
//!
//! encrypt: AEAD(key, iv = fresh random per call, aad = metadata fields)
//!          → ciphertext (same length as plaintext) + EncryptionMetadata
//!            { algorithm, iv, detached tag, original name/size, created_at }
//! ```

pub mod cipher;
pub mod keys;
pub mod metadata;

pub use cipher::{CipherAlgorithm, SymmetricCipher};
pub use keys::{derive_key, generate_key, EncryptionKey, KeyPolicy};
pub use metadata::EncryptionMetadata;

/// Size of an encryption key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the detached authentication tag (GCM and Poly1305)
pub const TAG_SIZE: usize = 16;
