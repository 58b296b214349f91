//! Filesystem-backed snapshot store.
//!
//! Layout: `<root>/snapshots/<slot>.snap`. Each file is a one-line header
//! (`<sha256 hex> <rfc3339 saved_at>`) followed by the raw snapshot bytes.
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a reader sees either the previous snapshot or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{validate_slot, StorageError};
use crate::storage_traits::{ContentDigest, SnapshotStore, StorageResult, StoredSnapshot};

/// Filesystem snapshot store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    snapshots_dir: PathBuf,
}

impl FsSnapshotStore {
    /// Create a store rooted at `root`. Creates `root/snapshots/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let snapshots_dir = root.as_ref().join("snapshots");
        fs::create_dir_all(&snapshots_dir)?;
        Ok(Self { snapshots_dir })
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{slot}.snap"))
    }
}

fn write_atomic(dir: &Path, path: &Path, header: &str, data: &[u8]) -> StorageResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(header.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn parse_file(slot: &str, raw: Vec<u8>) -> StorageResult<StoredSnapshot> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        slot: slot.to_string(),
        reason: reason.to_string(),
    };

    let newline = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt("missing header line"))?;
    let header =
        std::str::from_utf8(&raw[..newline]).map_err(|_| corrupt("header is not utf-8"))?;
    let mut parts = header.split_whitespace();
    let digest = parts
        .next()
        .ok_or_else(|| corrupt("missing digest"))
        .and_then(|d| ContentDigest::try_from(d.to_string()).map_err(|_| corrupt("bad digest")))?;
    let saved_at = parts
        .next()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| corrupt("bad timestamp"))?;

    StoredSnapshot {
        slot: slot.to_string(),
        digest,
        bytes: raw[newline + 1..].to_vec(),
        saved_at,
    }
    .verify()
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn save(&self, slot: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        validate_slot(slot)?;
        let digest = ContentDigest::from_bytes(data);
        let header = format!("{} {}", digest, Utc::now().to_rfc3339());
        let dir = self.snapshots_dir.clone();
        let path = self.slot_path(slot);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &header, &data))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;

        debug!(slot = %slot, digest = %digest.short(), "snapshot written");
        Ok(digest)
    }

    async fn load(&self, slot: &str) -> StorageResult<Option<StoredSnapshot>> {
        validate_slot(slot)?;
        let path = self.slot_path(slot);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        parse_file(slot, raw).map(Some)
    }

    fn backend(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsSnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let (_dir, store) = make_store();
        let digest = store.save("default", b"{\"v\":1}").await.unwrap();
        let loaded = store.load("default").await.unwrap().unwrap();
        assert_eq!(loaded.bytes, b"{\"v\":1}");
        assert_eq!(loaded.digest, digest);
    }

    #[tokio::test]
    async fn missing_slot_is_none() {
        let (_dir, store) = make_store();
        assert!(store.load("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_previous() {
        let (_dir, store) = make_store();
        store.save("default", b"first").await.unwrap();
        store.save("default", b"second").await.unwrap();
        let loaded = store.load("default").await.unwrap().unwrap();
        assert_eq!(loaded.bytes, b"second");
    }

    #[tokio::test]
    async fn truncated_file_is_corrupt() {
        let (dir, store) = make_store();
        store.save("default", b"payload").await.unwrap();
        let path = dir.path().join("snapshots").join("default.snap");
        let mut raw = std::fs::read(&path).unwrap();
        raw.truncate(raw.len() - 3);
        std::fs::write(&path, raw).unwrap();

        let err = store.load("default").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn rejects_path_like_slot() {
        let (_dir, store) = make_store();
        let err = store.save("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSlot(_)));
    }
}
