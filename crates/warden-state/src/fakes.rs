//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySnapshotStore`, which satisfies the `SnapshotStore`
//! contract without any external dependencies, and `FailingSnapshotStore`,
//! which fails a configurable number of saves before delegating.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{validate_slot, StorageError};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySnapshotStore
// ---------------------------------------------------------------------------

/// In-memory snapshot store backed by a `HashMap<slot, StoredSnapshot>`.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slots: Mutex<HashMap<String, StoredSnapshot>>,
    saves: AtomicU32,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Overwrite the stored bytes without updating the digest.
    ///
    /// Simulates a torn write so load-path corruption handling can be tested.
    pub fn corrupt(&self, slot: &str, bytes: &[u8]) {
        if let Ok(mut slots) = self.slots.lock() {
            if let Some(snap) = slots.get_mut(slot) {
                snap.bytes = bytes.to_vec();
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, slot: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        validate_slot(slot)?;
        let digest = ContentDigest::from_bytes(data);
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        slots.insert(
            slot.to_string(),
            StoredSnapshot {
                slot: slot.to_string(),
                digest: digest.clone(),
                bytes: data.to_vec(),
                saved_at: Utc::now(),
            },
        );
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(digest)
    }

    async fn load(&self, slot: &str) -> StorageResult<Option<StoredSnapshot>> {
        validate_slot(slot)?;
        let slots = self
            .slots
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        slots.get(slot).cloned().map(StoredSnapshot::verify).transpose()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// FailingSnapshotStore
// ---------------------------------------------------------------------------

/// Store whose first `failures` saves return `StorageError::Backend`.
#[derive(Debug)]
pub struct FailingSnapshotStore {
    inner: MemorySnapshotStore,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

impl FailingSnapshotStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemorySnapshotStore::new(),
            remaining_failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Total save attempts, failed or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful saves.
    pub fn save_count(&self) -> u32 {
        self.inner.save_count()
    }
}

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save(&self, slot: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StorageError::Backend("injected save failure".into()));
        }
        self.inner.save(slot, data).await
    }

    async fn load(&self, slot: &str) -> StorageResult<Option<StoredSnapshot>> {
        self.inner.load(slot).await
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}
