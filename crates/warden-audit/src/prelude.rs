//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Entry types
pub use crate::{AuditEntry, AuditEntryId, AuditRecord, ResolvedBy};

// Log and storage
pub use crate::{AuditLog, AuditQuery, AuditStorage, JsonlAuditStorage, MemoryAuditStorage};
