//! SurrealDB-backed snapshot store
//!
//! One row per slot in `engine_snapshots`; a save replaces the row inside a
//! single transaction. Supports in-memory (`mem://`), embedded
//! (`surrealkv://<path>`) and remote (`SURREALDB_URL`) connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{validate_slot, StorageError};
use crate::storage_traits::{ContentDigest, SnapshotStore, StorageResult, StoredSnapshot};

const NAMESPACE: &str = "warden";
const DATABASE: &str = "main";

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row layout of `engine_snapshots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<surrealdb::sql::Thing>,
    slot: String,
    digest: String,
    /// Hex-encoded snapshot bytes.
    payload: String,
    size_bytes: u64,
    #[serde(with = "surreal_datetime")]
    saved_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_stored(self) -> StorageResult<StoredSnapshot> {
        let slot = self.slot;
        let bytes = hex::decode(&self.payload).map_err(|e| StorageError::Corrupt {
            slot: slot.clone(),
            reason: format!("payload is not hex: {e}"),
        })?;
        let digest = ContentDigest::try_from(self.digest).map_err(|e| StorageError::Corrupt {
            slot: slot.clone(),
            reason: e.to_string(),
        })?;
        StoredSnapshot {
            slot,
            digest,
            bytes,
            saved_at: self.saved_at,
        }
        .verify()
    }
}

/// SurrealDB-backed implementation of [`SnapshotStore`].
#[derive(Clone)]
pub struct SurrealSnapshotStore {
    db: Surreal<Any>,
}

impl SurrealSnapshotStore {
    /// Connect to an arbitrary SurrealDB endpoint and initialise the schema.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {endpoint}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!("SurrealSnapshotStore connected");
        Ok(store)
    }

    /// Create an in-memory instance (tests and ephemeral daemons).
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Open an embedded on-disk database under `path`.
    pub async fn open_local(path: &std::path::Path) -> StorageResult<Self> {
        std::fs::create_dir_all(path)?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Connect using `SURREALDB_URL` if set, otherwise an embedded database in
    /// `fallback_dir`.
    pub async fn from_env(fallback_dir: &std::path::Path) -> StorageResult<Self> {
        match std::env::var("SURREALDB_URL") {
            Ok(url) => {
                info!("SURREALDB_URL found, connecting to {}", url);
                Self::connect(&url).await
            }
            Err(_) => Self::open_local(fallback_dir).await,
        }
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing engine_snapshots schema");
        let schema = r#"
            DEFINE TABLE engine_snapshots SCHEMAFULL;
            DEFINE FIELD slot ON engine_snapshots TYPE string;
            DEFINE FIELD digest ON engine_snapshots TYPE string;
            DEFINE FIELD payload ON engine_snapshots TYPE string;
            DEFINE FIELD size_bytes ON engine_snapshots TYPE int;
            DEFINE FIELD saved_at ON engine_snapshots TYPE datetime;
            DEFINE INDEX idx_snapshot_slot ON engine_snapshots FIELDS slot UNIQUE;
        "#;
        self.db
            .query(schema)
            .await
            .and_then(|r| r.check())
            .map_err(|e| StorageError::Connection(format!("Schema setup failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SurrealSnapshotStore {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn save(&self, slot: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        validate_slot(slot)?;
        let digest = ContentDigest::from_bytes(data);
        let row = SnapshotRow {
            id: None,
            slot: slot.to_string(),
            digest: digest.to_string(),
            payload: hex::encode(data),
            size_bytes: data.len() as u64,
            saved_at: Utc::now(),
        };

        self.db
            .query(
                "BEGIN TRANSACTION;
                 DELETE engine_snapshots WHERE slot = $slot;
                 CREATE engine_snapshots CONTENT $row;
                 COMMIT TRANSACTION;",
            )
            .bind(("slot", slot.to_string()))
            .bind(("row", row))
            .await?
            .check()?;

        debug!(digest = %digest.short(), "snapshot row replaced");
        Ok(digest)
    }

    #[instrument(skip(self))]
    async fn load(&self, slot: &str) -> StorageResult<Option<StoredSnapshot>> {
        validate_slot(slot)?;
        let mut res = self
            .db
            .query("SELECT * FROM engine_snapshots WHERE slot = $slot")
            .bind(("slot", slot.to_string()))
            .await?;

        let rows: Vec<SnapshotRow> = res.take(0).map_err(|e| StorageError::Corrupt {
            slot: slot.to_string(),
            reason: e.to_string(),
        })?;
        rows.into_iter().next().map(SnapshotRow::into_stored).transpose()
    }

    fn backend(&self) -> &'static str {
        "surrealdb"
    }
}
