//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_core::prelude::*;` to import all essential types.

pub use crate::{
    Decision, DecisionLayer, RiskLevel, RuleId, SessionId, Timestamp, ToolCallId, WardenHome,
    WorkspaceId,
};
