//! Storage trait definitions for Warden
//!
//! The engine persists one opaque, versioned snapshot blob per slot. Backends
//! only move bytes; schema versioning lives with the engine.
//!
//! - `SnapshotStore`: async save/load of snapshot blobs keyed by slot name
//! - `ContentDigest`: SHA-256 digest recorded alongside every blob so that a
//!   torn or tampered write is detected on load
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let s = s.trim().to_string();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot blob as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// Slot the blob was saved under.
    pub slot: String,
    /// Digest recorded at save time.
    pub digest: ContentDigest,
    /// Raw snapshot bytes.
    pub bytes: Vec<u8>,
    /// When the blob was saved.
    pub saved_at: DateTime<Utc>,
}

impl StoredSnapshot {
    /// Check the bytes against the digest recorded at save time.
    ///
    /// Returns `StorageError::Corrupt` on mismatch.
    pub fn verify(self) -> StorageResult<Self> {
        let actual = ContentDigest::from_bytes(&self.bytes);
        if actual != self.digest {
            return Err(StorageError::Corrupt {
                slot: self.slot,
                reason: format!(
                    "digest mismatch: expected {}, got {}",
                    self.digest.short(),
                    actual.short()
                ),
            });
        }
        Ok(self)
    }
}

/// Snapshot blob store.
///
/// Guarantees:
/// - `save(slot, data)` replaces any previous blob in `slot` and returns the
///   SHA-256 digest of `data`.
/// - `load(slot)` returns `None` when nothing was ever saved, and otherwise the
///   bytes of the latest successful save, verified against their digest.
/// - A failed `save` leaves the previous blob readable.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store bytes under `slot`, replacing the previous snapshot.
    async fn save(&self, slot: &str, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Load the latest snapshot in `slot`, if any.
    async fn load(&self, slot: &str) -> StorageResult<Option<StoredSnapshot>>;

    /// Human-readable backend name for logs.
    fn backend(&self) -> &'static str;
}
