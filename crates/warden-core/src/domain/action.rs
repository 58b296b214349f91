//! Action events submitted for evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of operation an agent is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Modify,
    Delete,
    /// Free-text query; not yet a filesystem action.
    Query,
}

impl ActionType {
    /// Whether the target is a filesystem path rather than free text.
    pub fn targets_path(self) -> bool {
        !matches!(self, Self::Query)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
            Self::Query => write!(f, "query"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "modify" | "edit" | "update" => Ok(Self::Modify),
            "delete" | "remove" => Ok(Self::Delete),
            "query" => Ok(Self::Query),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// A single observed or proposed operation by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub agent_id: String,
    pub action_type: ActionType,
    /// File path for filesystem actions, free text for queries.
    pub target: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    pub fn new(
        agent_id: impl Into<String>,
        action_type: ActionType,
        target: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            action_type,
            target: target.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor for a free-text query.
    pub fn query(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(agent_id, ActionType::Query, text)
    }
}
