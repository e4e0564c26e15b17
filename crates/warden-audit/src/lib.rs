//! Warden Audit - append-only record of gate decisions.
//!
//! This crate provides:
//! - [`AuditEntry`]: one line per resolved tool call (allow or deny), with
//!   who resolved it and which policy layer decided
//! - [`JsonlAuditStorage`]: JSON-lines files rotated by size; rotated
//!   segments are never rewritten
//! - [`AuditQuery`]: newest-first paging across active and rotated files
//!
//! # Example
//!
//! ```
//! use warden_audit::{AuditLog, AuditQuery, AuditRecord, ResolvedBy};
//! use warden_core::{Decision, DecisionLayer, SessionId, ToolCallId};
//!
//! let log = AuditLog::in_memory();
//! let entry = log
//!     .record(AuditRecord::new(
//!         SessionId::new("s-1"),
//!         ToolCallId::new("call-1"),
//!         "bash",
//!         Decision::Deny,
//!         ResolvedBy::Timeout,
//!         DecisionLayer::Default,
//!     ))
//!     .unwrap();
//!
//! let page = log.query(&AuditQuery::latest(10)).unwrap();
//! assert_eq!(page[0].id, entry.id);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
mod log;
mod storage;

pub use entry::{AuditEntry, AuditEntryId, AuditRecord, ResolvedBy};
pub use error::{AuditError, AuditResult};
pub use log::AuditLog;
pub use storage::{
    AuditQuery, AuditStorage, DEFAULT_QUERY_LIMIT, JsonlAuditStorage, MemoryAuditStorage,
};
