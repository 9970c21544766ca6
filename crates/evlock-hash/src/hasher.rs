//! Content hashing for evidence files
//!
//! The hash is the file's identity: it is computed over the exact original
//! bytes before any encryption, and it is what integrity proofs bind to.
//! Inputs are consumed through a fixed-size buffer so arbitrarily large files
//! never need to be resident in memory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

use evlock_core::{EvlockError, EvlockResult};

/// Size of every supported digest (SHA-256 and BLAKE3 are both 256-bit)
pub const DIGEST_SIZE: usize = 32;

/// Default streaming read buffer (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Digest function used for content identity and Merkle nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = EvlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(EvlockError::Config(format!(
                "unknown hash algorithm '{other}' (expected sha256 or blake3)"
            ))),
        }
    }
}

/// Digest of a byte sequence, tagged with the algorithm that produced it.
///
/// Text form is `<algorithm>:<64 hex chars>`, e.g. `sha256:e3b0c442…`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_SIZE],
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, digest: [u8; DIGEST_SIZE]) -> Self {
        Self { algorithm, digest }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }

    /// Lowercase hex of the digest only (64 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Parse a bare 64-char hex digest for the given algorithm.
    pub fn from_hex(algorithm: HashAlgorithm, hex_str: &str) -> EvlockResult<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| EvlockError::Hashing(format!("invalid hex digest '{hex_str}': {e}")))?;
        let digest: [u8; DIGEST_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            EvlockError::Hashing(format!(
                "digest has {} bytes, expected {DIGEST_SIZE}",
                b.len()
            ))
        })?;
        Ok(Self::new(algorithm, digest))
    }

    /// Short prefix for log lines
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}:{}", self.algorithm, &hex[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl FromStr for ContentHash {
    type Err = EvlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, hex_str) = s.split_once(':').ok_or_else(|| {
            EvlockError::Hashing(format!("content hash '{s}' is missing the algorithm prefix"))
        })?;
        let algorithm = alg
            .parse::<HashAlgorithm>()
            .map_err(|e| EvlockError::Hashing(e.to_string()))?;
        Self::from_hex(algorithm, hex_str)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = EvlockError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.to_string()
    }
}

/// Incremental digest state for one algorithm.
#[derive(Clone)]
pub struct IncrementalHasher {
    inner: DigestState,
}

#[derive(Clone)]
enum DigestState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl IncrementalHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            DigestState::Sha256(h) => h.update(data),
            DigestState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> ContentHash {
        match self.inner {
            DigestState::Sha256(h) => ContentHash::new(HashAlgorithm::Sha256, h.finalize().into()),
            DigestState::Blake3(h) => {
                ContentHash::new(HashAlgorithm::Blake3, *h.finalize().as_bytes())
            }
        }
    }
}

/// Computes content hashes of byte slices, readers, and files.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    buffer_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the streaming buffer size (clamped to at least 1 byte).
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash an in-memory byte slice.
    pub fn hash_bytes(&self, data: &[u8]) -> ContentHash {
        let mut hasher = IncrementalHasher::new(self.algorithm);
        for block in data.chunks(self.buffer_size) {
            hasher.update(block);
        }
        hasher.finalize()
    }

    /// Hash everything a blocking reader yields, one buffer at a time.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> EvlockResult<ContentHash> {
        let (hash, _) = self.stream_reader(&mut reader)?;
        Ok(hash)
    }

    /// Hash everything an async reader yields, one buffer at a time.
    pub async fn hash_async_reader<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
    ) -> EvlockResult<ContentHash> {
        let mut hasher = IncrementalHasher::new(self.algorithm);
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EvlockError::Hashing(format!("reading input: {e}"))),
            };
            hasher.update(&buf[..n]);
        }

        Ok(hasher.finalize())
    }

    /// Stream-hash a file from disk.
    ///
    /// Fails if fewer bytes are read than the file's size at open time, so a
    /// file truncated mid-read never yields a hash.
    pub fn hash_file(&self, path: &Path) -> EvlockResult<ContentHash> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            EvlockError::Hashing(format!("opening {} for hashing: {e}", path.display()))
        })?;
        let expected = file
            .metadata()
            .map_err(|e| EvlockError::Hashing(format!("stat {}: {e}", path.display())))?
            .len();

        let (hash, read) = self.stream_reader(&mut file)?;
        if read < expected {
            return Err(EvlockError::Hashing(format!(
                "{} truncated while hashing: read {read} of {expected} bytes",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), bytes = read, hash = %hash.short(), "hashed file");
        Ok(hash)
    }

    /// Async variant of [`ContentHasher::hash_file`].
    pub async fn hash_file_async(&self, path: &Path) -> EvlockResult<ContentHash> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            EvlockError::Hashing(format!("opening {} for hashing: {e}", path.display()))
        })?;
        self.hash_async_reader(file).await
    }

    fn stream_reader<R: Read>(&self, reader: &mut R) -> EvlockResult<(ContentHash, u64)> {
        let mut hasher = IncrementalHasher::new(self.algorithm);
        let mut buf = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EvlockError::Hashing(format!("reading input: {e}"))),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        Ok((hasher.finalize(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    const SHA256_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_known_vector() {
        let h = ContentHasher::new(HashAlgorithm::Sha256).hash_bytes(b"");
        assert_eq!(h.to_hex(), SHA256_EMPTY);
        assert_eq!(h.to_string(), format!("sha256:{SHA256_EMPTY}"));
    }

    #[test]
    fn blake3_matches_reference() {
        let h = ContentHasher::new(HashAlgorithm::Blake3).hash_bytes(b"hello evlock");
        assert_eq!(h.as_bytes(), blake3::hash(b"hello evlock").as_bytes());
    }

    #[test]
    fn algorithms_disagree() {
        let a = ContentHasher::new(HashAlgorithm::Sha256).hash_bytes(b"same");
        let b = ContentHasher::new(HashAlgorithm::Blake3).hash_bytes(b"same");
        assert_ne!(a, b);
    }

    #[test]
    fn parse_display_roundtrip() {
        let h = ContentHasher::default().hash_bytes(b"report.pdf contents");
        let parsed: ContentHash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("deadbeef".parse::<ContentHash>().is_err());
        assert!("md5:deadbeef".parse::<ContentHash>().is_err());
        assert!("sha256:zz".parse::<ContentHash>().is_err());
        assert!("sha256:abcd".parse::<ContentHash>().is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let h = ContentHasher::default().hash_bytes(b"x");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{h}\""));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn distinct_fixtures_distinct_hashes() {
        let hasher = ContentHasher::default();
        let fixtures: [&[u8]; 5] = [b"", b"a", b"b", b"ab", b"report.pdf"];
        let hashes: std::collections::HashSet<_> =
            fixtures.iter().map(|f| hasher.hash_bytes(f)).collect();
        assert_eq!(hashes.len(), fixtures.len());
    }

    #[test]
    fn file_hash_matches_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x5Au8; 200_000];
        tmp.write_all(&data).unwrap();

        let hasher = ContentHasher::default().with_buffer_size(4096);
        assert_eq!(hasher.hash_file(tmp.path()).unwrap(), hasher.hash_bytes(&data));
    }

    #[test]
    fn missing_file_is_hashing_error() {
        let err = ContentHasher::default()
            .hash_file(Path::new("/nonexistent/evidence.bin"))
            .unwrap_err();
        assert!(matches!(err, EvlockError::Hashing(_)));
    }

    #[test]
    fn reader_error_is_hashing_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::UnexpectedEof, "device gone"))
            }
        }
        let err = ContentHasher::default().hash_reader(Broken).unwrap_err();
        assert!(matches!(err, EvlockError::Hashing(_)));
    }

    #[tokio::test]
    async fn async_reader_matches_sync() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let hasher = ContentHasher::new(HashAlgorithm::Blake3).with_buffer_size(1000);
        let async_hash = hasher.hash_async_reader(&data[..]).await.unwrap();
        assert_eq!(async_hash, hasher.hash_bytes(&data));
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let hasher = ContentHasher::default();
            prop_assert_eq!(hasher.hash_bytes(&data), hasher.hash_bytes(&data));
        }

        #[test]
        fn buffer_size_does_not_change_hash(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            buf in 1usize..512,
        ) {
            let whole = ContentHasher::default().hash_bytes(&data);
            let streamed = ContentHasher::default()
                .with_buffer_size(buf)
                .hash_reader(&data[..])
                .unwrap();
            prop_assert_eq!(whole, streamed);
        }
    }
}
