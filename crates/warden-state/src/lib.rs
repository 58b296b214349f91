//! Warden-State: snapshot persistence for the Warden engine
//!
//! This crate moves versioned engine snapshots to and from durable storage.
//! It knows nothing about patterns or agents; the engine hands it opaque
//! bytes and gets back digest-verified bytes.
//!
//! ## Key Components
//!
//! - `SnapshotStore`: async save/load trait keyed by slot name
//! - `FsSnapshotStore`: atomic-rename files under a state directory
//! - `SurrealSnapshotStore`: SurrealDB table (`mem://`, `surrealkv://`, remote)
//! - `fakes`: in-memory and failure-injecting stores for tests

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;
mod surreal_store;

pub use error::StorageError;
pub use fs_store::FsSnapshotStore;
pub use storage_traits::{ContentDigest, SnapshotStore, StorageResult, StoredSnapshot};
pub use surreal_store::SurrealSnapshotStore;
