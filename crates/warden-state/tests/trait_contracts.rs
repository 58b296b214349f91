//! Trait contract tests for SnapshotStore.
//!
//! Every backend must satisfy the same behavioral contract. The filesystem
//! store runs against a temp dir and the SurrealDB store against `mem://`.

use warden_state::fakes::{FailingSnapshotStore, MemorySnapshotStore};
use warden_state::storage_traits::*;
use warden_state::{FsSnapshotStore, StorageError, SurrealSnapshotStore};

async fn assert_contract(store: &dyn SnapshotStore) {
    // Empty slot
    assert!(store.load("default").await.unwrap().is_none());

    // Save returns digest of data
    let data = br#"{"schema_version":1}"#;
    let digest = store.save("default", data).await.unwrap();
    assert_eq!(digest, ContentDigest::from_bytes(data));

    // Load returns exactly what was saved
    let loaded = store.load("default").await.unwrap().unwrap();
    assert_eq!(loaded.bytes, data);
    assert_eq!(loaded.digest, digest);
    assert_eq!(loaded.slot, "default");

    // Latest save wins
    store.save("default", b"second").await.unwrap();
    let loaded = store.load("default").await.unwrap().unwrap();
    assert_eq!(loaded.bytes, b"second");

    // Slots are independent
    store.save("other", b"other-bytes").await.unwrap();
    assert_eq!(
        store.load("default").await.unwrap().unwrap().bytes,
        b"second"
    );

    // Invalid slot names rejected
    let err = store.save("bad slot", b"x").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidSlot(_)));
}

#[tokio::test]
async fn memory_store_satisfies_contract() {
    let store = MemorySnapshotStore::new();
    assert_contract(&store).await;
    assert_eq!(store.save_count(), 3);
}

#[tokio::test]
async fn fs_store_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsSnapshotStore::new(dir.path()).unwrap();
    assert_contract(&store).await;
}

#[tokio::test]
async fn surreal_store_satisfies_contract() {
    let store = SurrealSnapshotStore::in_memory().await.unwrap();
    assert_contract(&store).await;
}

#[tokio::test]
async fn fs_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsSnapshotStore::new(dir.path()).unwrap();
        store.save("default", b"persisted").await.unwrap();
    }
    let reopened = FsSnapshotStore::new(dir.path()).unwrap();
    let loaded = reopened.load("default").await.unwrap().unwrap();
    assert_eq!(loaded.bytes, b"persisted");
}

#[tokio::test]
async fn memory_store_detects_corruption() {
    let store = MemorySnapshotStore::new();
    store.save("default", b"good").await.unwrap();
    store.corrupt("default", b"evil");
    let err = store.load("default").await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt { .. }));
}

#[tokio::test]
async fn failing_store_fails_then_recovers() {
    let store = FailingSnapshotStore::new(1);
    assert!(store.save("default", b"a").await.is_err());
    assert!(store.save("default", b"a").await.is_ok());
    assert_eq!(store.attempts(), 2);
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.load("default").await.unwrap().unwrap().bytes, b"a");
}
