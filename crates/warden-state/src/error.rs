//! Error types for warden-state

use thiserror::Error;

/// Errors that can occur in the snapshot persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or write error
    #[error("Storage backend failed: {0}")]
    Backend(String),

    /// Stored bytes do not match their recorded digest, or the record is unreadable
    #[error("Snapshot in slot '{slot}' is corrupt: {reason}")]
    Corrupt { slot: String, reason: String },

    /// A digest string that is not 64 hex chars
    #[error("Invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Slot names are used as file names and record keys
    #[error("Invalid slot name: {0}")]
    InvalidSlot(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Reject slot names that could escape a store root or break a query.
pub(crate) fn validate_slot(slot: &str) -> Result<(), StorageError> {
    let ok = !slot.is_empty()
        && slot.len() <= 64
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidSlot(slot.to_string()))
    }
}
