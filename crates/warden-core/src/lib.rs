//! Warden Core - Foundation types for the Warden tool-call authorization gate.
//!
//! This crate provides:
//! - Identifiers shared by the gate, policy and audit crates
//! - The [`Decision`] / [`DecisionLayer`] vocabulary of the policy pipeline
//! - [`RiskLevel`] classification used for display emphasis
//! - The `~/.warden/` home directory layout
//! - Small string utilities used to cap attacker-controlled input

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod dirs;
pub mod types;
pub mod utils;

pub use dirs::WardenHome;
pub use types::{
    Decision, DecisionLayer, RiskLevel, RuleId, SessionId, Timestamp, ToolCallId, WorkspaceId,
};
pub use utils::truncate_to_boundary;
