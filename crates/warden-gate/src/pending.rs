//! Pending approvals and their single-resolution slots.
//!
//! A pending call is settled exactly once: by a human answer, by its
//! deadline, or by teardown of its session. The first of these to reach the
//! slot wins and the rest observe `false`.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::warn;

use warden_core::{Decision, SessionId, ToolCallId};
use warden_policy::ApprovalScope;

use crate::approval::ApprovalRequest;

/// How a pending call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A human answered.
    Human {
        /// `allow` or `deny`.
        action: Decision,
        /// How far to remember an allow.
        scope: ApprovalScope,
    },
    /// The deadline passed.
    Timeout,
    /// The session's connection went away.
    ConnectionLost,
}

/// One call waiting for a human.
#[derive(Debug)]
pub struct PendingApproval {
    request: ApprovalRequest,
    slot: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl PendingApproval {
    /// Create a pending call and the receiver its check task waits on.
    #[must_use]
    pub fn new(request: ApprovalRequest) -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            request,
            slot: Mutex::new(Some(tx)),
        });
        (pending, rx)
    }

    /// The published request.
    #[must_use]
    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }

    /// Settle the call. Returns `false` if it was already settled.
    pub fn resolve(&self, resolution: Resolution) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|e| {
                warn!("Pending approval lock was poisoned, recovering");
                e.into_inner()
            })
            .take();
        match sender {
            Some(tx) => tx.send(resolution).is_ok(),
            None => false,
        }
    }

    /// Whether the call has been settled.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| {
                warn!("Pending approval lock was poisoned, recovering");
                e.into_inner()
            })
            .is_none()
    }
}

/// All pending calls of the gate, keyed by `tool_call_id`.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: DashMap<ToolCallId, Arc<PendingApproval>>,
}

impl PendingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call. Returns `false` if its id is already pending.
    pub fn insert(&self, pending: Arc<PendingApproval>) -> bool {
        match self.entries.entry(pending.request.tool_call_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pending);
                true
            },
        }
    }

    /// Look up a pending call.
    #[must_use]
    pub fn get(&self, id: &ToolCallId) -> Option<Arc<PendingApproval>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Drop a pending call from the registry.
    pub fn remove(&self, id: &ToolCallId) -> Option<Arc<PendingApproval>> {
        self.entries.remove(id).map(|(_, pending)| pending)
    }

    /// Settle the call with `id`. Returns `false` if it is unknown or was
    /// already settled.
    pub fn resolve(&self, id: &ToolCallId, resolution: Resolution) -> bool {
        // Clone out first so the shard lock is not held while resolving.
        self.get(id).is_some_and(|p| p.resolve(resolution))
    }

    /// Pending calls of one session.
    #[must_use]
    pub fn for_session(&self, session_id: &SessionId) -> Vec<Arc<PendingApproval>> {
        self.entries
            .iter()
            .filter(|e| e.value().request.session_id == *session_id)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Published requests of every unsettled call, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<_> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_resolved())
            .map(|e| e.value().request.clone())
            .collect();
        requests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tool_call_id.as_str().cmp(b.tool_call_id.as_str()))
        });
        requests
    }

    /// Number of registered calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
