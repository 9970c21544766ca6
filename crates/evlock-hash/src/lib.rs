//! evlock-hash: content identity for evidence files and Merkle batch commitments
//!
//! # Overview
//! - `hasher`: streaming SHA-256 / BLAKE3 content hashes over original bytes
//! - `merkle`: ordered binary hash tree with per-leaf inclusion paths

pub mod hasher;
pub mod merkle;

pub use hasher::{
    ContentHash, ContentHasher, HashAlgorithm, IncrementalHasher, DEFAULT_BUFFER_SIZE, DIGEST_SIZE,
};
pub use merkle::{
    build_tree, combine, recompute_root, verify_inclusion, InclusionPath, MerkleTree, PathStep,
    Side,
};
