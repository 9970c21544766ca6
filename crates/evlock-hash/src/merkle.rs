//! Merkle batch commitments over ordered content hashes
//!
//! Leaves are paired left to right in the order given. An internal node is
//! `H(left || right)` using the leaves' algorithm. When a level has an odd
//! node count the last node is promoted to the next level unchanged: no
//! duplication and no padding hash. Changing that policy changes every root,
//! so it is fixed here.
//!
//! ```text
//!          root = H(P12 || H3)
//!          /              \
//!    P12 = H(H1 || H2)     H3 (promoted)
//!     /        \           |
//!   H1          H2         H3
//! ```

use serde::{Deserialize, Serialize};

use evlock_core::{EvlockError, EvlockResult};

use crate::hasher::{ContentHash, HashAlgorithm, IncrementalHasher};

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step while climbing from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub sibling: ContentHash,
    pub side: Side,
}

/// Sibling hashes needed to recompute the root from a single leaf.
pub type InclusionPath = Vec<PathStep>;

/// A fully materialized tree; `levels[0]` are the leaves, the last level holds
/// only the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<ContentHash>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes in their declared order.
    ///
    /// An empty leaf set is an error: a batch commitment needs at least one
    /// member. Every leaf must use the same hash algorithm.
    pub fn build(leaves: &[ContentHash]) -> EvlockResult<Self> {
        let first = leaves.first().ok_or_else(|| {
            EvlockError::TreeConstruction("cannot build a tree from zero leaves".into())
        })?;
        let algorithm = first.algorithm();
        if let Some(odd) = leaves.iter().find(|l| l.algorithm() != algorithm) {
            return Err(EvlockError::TreeConstruction(format!(
                "mixed hash algorithms in batch: {} and {}",
                algorithm,
                odd.algorithm()
            )));
        }

        let mut levels = vec![leaves.to_vec()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        tracing::debug!(
            leaves = leaves.len(),
            depth = levels.len() - 1,
            algorithm = %algorithm,
            "built merkle tree"
        );
        Ok(Self { levels })
    }

    pub fn root(&self) -> ContentHash {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaves(&self) -> &[ContentHash] {
        &self.levels[0]
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.root().algorithm()
    }

    /// Inclusion path for the leaf at `index`, or `None` if out of range.
    ///
    /// A node promoted past a level has no sibling there and contributes no
    /// step.
    pub fn path(&self, index: usize) -> Option<InclusionPath> {
        if index >= self.len() {
            return None;
        }

        let mut path = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            if let Some(sibling) = level.get(sibling_idx) {
                let side = if idx % 2 == 0 { Side::Right } else { Side::Left };
                path.push(PathStep {
                    sibling: *sibling,
                    side,
                });
            }
            idx /= 2;
        }
        Some(path)
    }

    /// Paths for every leaf, in leaf order.
    pub fn paths(&self) -> Vec<InclusionPath> {
        (0..self.len()).filter_map(|i| self.path(i)).collect()
    }
}

/// Build a tree and return its root together with every leaf's path.
pub fn build_tree(leaves: &[ContentHash]) -> EvlockResult<(ContentHash, Vec<InclusionPath>)> {
    let tree = MerkleTree::build(leaves)?;
    Ok((tree.root(), tree.paths()))
}

/// Recompute the root from one leaf and its path, without the other leaves.
pub fn recompute_root(leaf: &ContentHash, path: &[PathStep]) -> ContentHash {
    path.iter().fold(*leaf, |acc, step| match step.side {
        Side::Right => combine(&acc, &step.sibling),
        Side::Left => combine(&step.sibling, &acc),
    })
}

/// True if `leaf` with `path` climbs to exactly `root`.
pub fn verify_inclusion(leaf: &ContentHash, path: &[PathStep], root: &ContentHash) -> bool {
    recompute_root(leaf, path) == *root
}

/// Ordered node combination: `H(left || right)`.
pub fn combine(left: &ContentHash, right: &ContentHash) -> ContentHash {
    let mut hasher = IncrementalHasher::new(left.algorithm());
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize()
}
