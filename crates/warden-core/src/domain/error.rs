//! Core error taxonomy for Warden.

use warden_state::StorageError;

/// Warden engine errors.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unsupported snapshot version {found} (supported up to {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("agent lock poisoned: {0}")]
    AgentLockPoisoned(String),

    #[error("non-finite risk score for agent {agent_id}")]
    NonFiniteScore { agent_id: String },

    #[error("pattern refresh cancelled")]
    RefreshCancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Warden engine operations.
pub type Result<T> = std::result::Result<T, WardenError>;
