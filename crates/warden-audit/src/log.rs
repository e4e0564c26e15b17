//! Audit log - main interface for recording and reading decisions.

use std::path::PathBuf;

use tracing::debug;
use warden_core::Decision;

use crate::entry::{AuditEntry, AuditRecord};
use crate::error::{AuditError, AuditResult};
use crate::storage::{AuditQuery, AuditStorage, JsonlAuditStorage, MemoryAuditStorage};

/// Append-only record of every resolved gate decision.
pub struct AuditLog {
    storage: Box<dyn AuditStorage>,
}

impl AuditLog {
    /// Create an audit log over a custom storage backend.
    #[must_use]
    pub fn with_storage(storage: Box<dyn AuditStorage>) -> Self {
        Self { storage }
    }

    /// Open a JSONL log at `path`, rotating past `max_file_bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, max_file_bytes: u64) -> AuditResult<Self> {
        Ok(Self::with_storage(Box::new(JsonlAuditStorage::open(
            path,
            max_file_bytes,
        )?)))
    }

    /// Create an in-memory audit log (for testing).
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_storage(Box::new(MemoryAuditStorage::new()))
    }

    /// Stamp and append a final decision.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidRecord`] when the decision is `ask`
    /// (not final), or a storage error when the append fails.
    pub fn record(&self, record: AuditRecord) -> AuditResult<AuditEntry> {
        if record.decision == Decision::Ask {
            return Err(AuditError::InvalidRecord {
                reason: "only allow or deny can be recorded as a final decision".to_owned(),
            });
        }

        let entry = AuditEntry::create(record);
        self.storage.append(&entry)?;
        debug!(
            entry_id = %entry.id,
            session_id = %entry.session_id,
            tool_call_id = %entry.tool_call_id,
            action = %entry.decision,
            resolved_by = %entry.resolved_by,
            "audit entry appended"
        );
        Ok(entry)
    }

    /// A page of entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        self.storage.query(query)
    }

    /// Number of readable entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub fn count(&self) -> AuditResult<usize> {
        self.storage.count()
    }

    /// Flush pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails to flush.
    pub fn flush(&self) -> AuditResult<()> {
        self.storage.flush()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
