//! Warden Gate - the Unix-socket front of the Warden tool-call gate.
//!
//! Agent adapters connect to the gate socket, say `hello`, and send one
//! `gate_check` per tool call. Each call is evaluated by the policy
//! pipeline; `ask` decisions wait for a human on the supervisor socket until
//! they are answered, time out, or the adapter goes away. Every final
//! decision is written to the audit log, and a failed audit write denies.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_audit::AuditLog;
//! use warden_core::{Decision, SessionId, ToolCallId};
//! use warden_gate::{GateService, GateSettings, NullApprovalChannel};
//! use warden_policy::{EvaluatorConfig, GateRequest, PolicyEvaluator, RuleStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let evaluator = PolicyEvaluator::new(
//!     EvaluatorConfig::new(Decision::Allow),
//!     Arc::new(RuleStore::in_memory()),
//! );
//! let gate = GateService::new(
//!     evaluator,
//!     Arc::new(AuditLog::in_memory()),
//!     Arc::new(NullApprovalChannel),
//!     GateSettings::default(),
//! );
//!
//! let outcome = gate
//!     .check(GateRequest::new(
//!         "bash",
//!         serde_json::json!({ "command": "ls" }),
//!         SessionId::new("s-1"),
//!         None,
//!         ToolCallId::new("call-1"),
//!     ))
//!     .await;
//! assert_eq!(outcome.action, Decision::Allow);
//! # });
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod approval;
pub mod protocol;

mod connection;
mod error;
mod frame;
mod pending;
mod server;
mod service;
mod supervisor;

pub use approval::{
    ApprovalChannel, ApprovalEvent, ApprovalRequest, ApprovalResolved, BroadcastApprovalChannel,
    NullApprovalChannel,
};
pub use connection::serve_connection;
pub use error::{GateError, GateResult};
pub use pending::{PendingApproval, PendingRegistry, Resolution};
pub use protocol::{ClientMessage, PROTOCOL_VERSION, ServerMessage};
pub use server::{SocketListener, serve_gate, serve_supervisor};
pub use service::{DEFAULT_MAX_MESSAGE_BYTES, GateOutcome, GateService, GateSettings};
pub use supervisor::supervise_connection;
