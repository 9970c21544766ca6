//! Evidence encryption keys: derivation, generation, and encoding
//!
//! `derive_key` reproduces the key from (uploader identity, case id) alone.
//! Anyone who knows both values can rebuild it, and every file in a case
//! shares it. That is a known weakness kept for compatibility with existing
//! uploads; `KeyPolicy::Random` avoids it at the cost of depending entirely on
//! the local key store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use evlock_core::{EvlockError, EvlockResult};

use crate::KEY_SIZE;

const DERIVATION_SALT: &[u8] = b"evlock-evidence-key-v1";
const DERIVATION_INFO: &[u8] = b"evlock-file-key";

/// A 256-bit symmetric key. Zeroized on drop.
///
/// Serializes as base64 so it can live inside a local key record; it must
/// never be sent to the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    pub fn from_base64(s: &str) -> EvlockResult<Self> {
        let mut decoded = STANDARD
            .decode(s)
            .map_err(|e| EvlockError::Encryption(format!("key is not valid base64: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(EvlockError::Encryption(format!(
                "key has {len} bytes, expected {KEY_SIZE}"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Serialize for EncryptionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for EncryptionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut encoded = String::deserialize(deserializer)?;
        let key = EncryptionKey::from_base64(&encoded).map_err(serde::de::Error::custom);
        encoded.zeroize();
        key
    }
}

/// How a file's key is obtained at upload time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Deterministic from (identity, case id); see the module docs.
    #[default]
    Derived,
    /// Fresh random key per file.
    Random,
}

impl KeyPolicy {
    /// Produce the key for one file under this policy.
    pub fn key_for(&self, identity: &str, case_id: &str) -> EvlockResult<EncryptionKey> {
        match self {
            KeyPolicy::Derived => derive_key(identity, case_id),
            KeyPolicy::Random => Ok(generate_key()),
        }
    }
}

impl FromStr for KeyPolicy {
    type Err = EvlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "derived" => Ok(KeyPolicy::Derived),
            "random" => Ok(KeyPolicy::Random),
            other => Err(EvlockError::Config(format!(
                "unknown key policy '{other}' (expected derived or random)"
            ))),
        }
    }
}

/// Derive the case key for an uploader via HKDF-SHA256.
///
/// The identity is trimmed and lowercased (it is an email address); the case
/// id is only trimmed. Both are length-prefixed in the IKM so that
/// ("ab", "c") and ("a", "bc") cannot collide.
pub fn derive_key(identity: &str, case_id: &str) -> EvlockResult<EncryptionKey> {
    let identity = identity.trim().to_lowercase();
    let case_id = case_id.trim();
    if identity.is_empty() {
        return Err(EvlockError::Encryption(
            "key derivation requires a non-empty identity".into(),
        ));
    }
    if case_id.is_empty() {
        return Err(EvlockError::Encryption(
            "key derivation requires a non-empty case id".into(),
        ));
    }

    let mut ikm = Vec::with_capacity(8 + identity.len() + case_id.len());
    for part in [identity.as_bytes(), case_id.as_bytes()] {
        ikm.extend_from_slice(&(part.len() as u32).to_be_bytes());
        ikm.extend_from_slice(part);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(DERIVATION_SALT), &ikm);
    let mut okm = [0u8; KEY_SIZE];
    let expanded = hkdf.expand(DERIVATION_INFO, &mut okm);
    ikm.zeroize();
    expanded.map_err(|e| EvlockError::Encryption(format!("HKDF expand failed: {e}")))?;

    Ok(EncryptionKey::from_bytes(okm))
}

/// Generate a random 256-bit key.
pub fn generate_key() -> EncryptionKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    EncryptionKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let k1 = derive_key("a@x.gov", "CASE-1").unwrap();
        let k2 = derive_key("a@x.gov", "CASE-1").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes(), "derivation must be deterministic");
    }

    #[test]
    fn test_derive_normalizes_identity() {
        let k1 = derive_key("a@x.gov", "CASE-1").unwrap();
        let k2 = derive_key("  A@X.gov ", "CASE-1").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_separates_inputs() {
        let base = derive_key("a@x.gov", "CASE-1").unwrap();
        assert_ne!(base.as_bytes(), derive_key("b@x.gov", "CASE-1").unwrap().as_bytes());
        assert_ne!(base.as_bytes(), derive_key("a@x.gov", "CASE-2").unwrap().as_bytes());
        assert_ne!(base.as_bytes(), derive_key("a@x.gov", "case-1").unwrap().as_bytes());
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collision() {
        let k1 = derive_key("ab", "c").unwrap();
        let k2 = derive_key("a", "bc").unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_rejects_empty_inputs() {
        assert!(matches!(derive_key("", "CASE-1"), Err(EvlockError::Encryption(_))));
        assert!(matches!(derive_key("a@x.gov", "  "), Err(EvlockError::Encryption(_))));
    }

    #[test]
    fn test_generated_keys_differ() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_base64_roundtrip_and_serde() {
        let key = generate_key();
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, restored);

        let json = serde_json::to_string(&key).unwrap();
        let back: EncryptionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn test_from_base64_rejects_wrong_length() {
        assert!(EncryptionKey::from_base64("AAAA").is_err());
        assert!(EncryptionKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('7'));
    }

    #[test]
    fn test_key_policy() {
        assert_eq!("derived".parse::<KeyPolicy>().unwrap(), KeyPolicy::Derived);
        assert_eq!("Random".parse::<KeyPolicy>().unwrap(), KeyPolicy::Random);
        assert!("hsm".parse::<KeyPolicy>().is_err());

        let d1 = KeyPolicy::Derived.key_for("a@x.gov", "CASE-1").unwrap();
        let d2 = KeyPolicy::Derived.key_for("a@x.gov", "CASE-1").unwrap();
        assert_eq!(d1, d2);
        let r1 = KeyPolicy::Random.key_for("a@x.gov", "CASE-1").unwrap();
        let r2 = KeyPolicy::Random.key_for("a@x.gov", "CASE-1").unwrap();
        assert_ne!(r1, r2);
    }
}
