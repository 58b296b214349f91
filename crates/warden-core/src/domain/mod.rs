//! Domain models for Warden.
//!
//! Canonical definitions for the core entities:
//! - `ActionEvent`: an operation an agent attempts
//! - `ViolationPattern`: a learned or built-in prohibited pattern
//! - `InterventionResult`: the gate's answer for one event
//! - `AgentRecord`: per-agent compliance score and history

pub mod action;
pub mod agent;
pub mod error;
pub mod intervention;
pub mod pattern;

pub use action::{ActionEvent, ActionType};
pub use agent::{AgentRecord, AgentState};
pub use error::{Result, WardenError};
pub use intervention::{Decision, InterventionResult, PatternMatch, RiskLevel};
pub use pattern::{pattern_id, MatchKind, Provenance, TargetRule, ViolationPattern};
