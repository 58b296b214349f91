//! Moves engine snapshots through a [`SnapshotStore`].
//!
//! Saves are retried once; a second failure is logged and counted but is
//! never fatal to the engine, which keeps serving from memory until the next
//! flush succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_state::{ContentDigest, SnapshotStore, StorageError};

use crate::domain::{Result, WardenError};
use crate::engine::Engine;
use crate::metrics::METRICS;
use crate::obs;
use crate::snapshot::EngineSnapshot;

const MAX_SAVE_ATTEMPTS: u32 = 2;

pub struct SnapshotPersister {
    store: Arc<dyn SnapshotStore>,
    slot: String,
}

impl std::fmt::Debug for SnapshotPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPersister")
            .field("backend", &self.store.backend())
            .field("slot", &self.slot)
            .finish()
    }
}

impl SnapshotPersister {
    pub fn new(store: Arc<dyn SnapshotStore>, slot: impl Into<String>) -> Self {
        Self {
            store,
            slot: slot.into(),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Encode and save, retrying once on failure.
    pub async fn save(&self, snapshot: &EngineSnapshot) -> Result<ContentDigest> {
        let bytes = snapshot.encode()?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.save(&self.slot, &bytes).await {
                Ok(digest) => {
                    obs::emit_snapshot_flushed(
                        &self.slot,
                        digest.short(),
                        bytes.len(),
                        snapshot.agents.len(),
                    );
                    return Ok(digest);
                }
                Err(e) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::debug!(slot = %self.slot, attempt, error = %e, "snapshot save failed, retrying");
                }
                Err(e) => {
                    obs::emit_snapshot_flush_failed(&self.slot, attempt, &e);
                    METRICS.inc_flush_failures();
                    return Err(e.into());
                }
            }
        }
    }

    /// Load and decode the slot. `Ok(None)` when nothing has been saved.
    ///
    /// Digest mismatches and undecodable payloads surface as
    /// [`WardenError::CorruptSnapshot`].
    pub async fn load(&self) -> Result<Option<EngineSnapshot>> {
        let stored = match self.store.load(&self.slot).await {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupt { reason, .. }) => {
                return Err(WardenError::CorruptSnapshot(reason))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = EngineSnapshot::decode(&stored.bytes)?;
        obs::emit_snapshot_loaded(&self.slot, snapshot.patterns.len(), snapshot.agents.len());
        Ok(Some(snapshot))
    }
}

// ---------------------------------------------------------------------------
// Background flushing
// ---------------------------------------------------------------------------

/// Flush `engine` once on a background task.
pub fn spawn_flush(
    engine: Arc<Engine>,
    persister: Arc<SnapshotPersister>,
) -> JoinHandle<Result<ContentDigest>> {
    tokio::spawn(async move { engine.flush(&persister).await })
}

/// Flush every `interval` while the engine has unsaved changes, until
/// `shutdown` flips to `true`. The caller owns the final flush.
pub fn spawn_flush_loop(
    engine: Arc<Engine>,
    persister: Arc<SnapshotPersister>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if engine.is_dirty() {
                        // Failures are already logged and counted.
                        let _ = engine.flush(&persister).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("flush loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_state::fakes::{FailingSnapshotStore, MemorySnapshotStore};

    fn snapshot() -> EngineSnapshot {
        EngineSnapshot::new(1, Vec::new(), Vec::new())
    }

    #[tokio::test]
    async fn save_retries_once() {
        let store = Arc::new(FailingSnapshotStore::new(1));
        let p = SnapshotPersister::new(store.clone(), "default");
        p.save(&snapshot()).await.unwrap();
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn save_gives_up_after_two_attempts() {
        let store = Arc::new(FailingSnapshotStore::new(5));
        let p = SnapshotPersister::new(store.clone(), "default");
        let err = p.save(&snapshot()).await.unwrap_err();
        assert!(matches!(err, WardenError::Storage(_)));
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn load_roundtrip_and_empty() {
        let store = Arc::new(MemorySnapshotStore::new());
        let p = SnapshotPersister::new(store, "default");
        assert!(p.load().await.unwrap().is_none());
        let snap = snapshot();
        p.save(&snap).await.unwrap();
        assert_eq!(p.load().await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn corrupt_bytes_surface_as_corrupt_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let p = SnapshotPersister::new(store.clone(), "default");
        p.save(&snapshot()).await.unwrap();
        store.corrupt("default", b"{}");
        let err = p.load().await.unwrap_err();
        assert!(matches!(err, WardenError::CorruptSnapshot(_)));
    }
}
