//! Versioned engine snapshot: every pattern and every agent record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AgentRecord, Result, ViolationPattern, WardenError};

/// Schema version written by this build.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    /// Version of the pattern store captured.
    pub pattern_version: u64,
    pub patterns: Vec<ViolationPattern>,
    pub agents: Vec<AgentRecord>,
}

impl EngineSnapshot {
    pub fn new(
        pattern_version: u64,
        patterns: Vec<ViolationPattern>,
        agents: Vec<AgentRecord>,
    ) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            pattern_version,
            patterns,
            agents,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and upgrade a stored snapshot.
    ///
    /// A missing or malformed version tag is corruption. A version newer
    /// than [`SNAPSHOT_SCHEMA_VERSION`] is rejected rather than guessed at.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| WardenError::CorruptSnapshot(e.to_string()))?;
        let version = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| WardenError::CorruptSnapshot("missing schema_version".into()))?;
        if version > SNAPSHOT_SCHEMA_VERSION {
            return Err(WardenError::UnsupportedSnapshotVersion {
                found: version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        let value = upgrade(value, version)?;
        serde_json::from_value(value).map_err(|e| WardenError::CorruptSnapshot(e.to_string()))
    }
}

/// Step a snapshot from `from` up to the current schema.
fn upgrade(value: Value, from: u32) -> Result<Value> {
    match from {
        SNAPSHOT_SCHEMA_VERSION => Ok(value),
        // v1 is the oldest schema.
        other => Err(WardenError::CorruptSnapshot(format!(
            "no upgrade path from schema version {other}"
        ))),
    }
}
