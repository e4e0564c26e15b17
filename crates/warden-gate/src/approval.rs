//! The human-approval channel.
//!
//! The gate publishes every `ask` as an [`ApprovalRequest`] and announces the
//! outcome with an [`ApprovalResolved`]. Answers come back through
//! [`GateService::resolve`](crate::GateService::resolve), whatever transport
//! the channel uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use warden_audit::ResolvedBy;
use warden_core::{Decision, RiskLevel, RuleId, SessionId, Timestamp, ToolCallId, WorkspaceId};
use warden_policy::{ApprovalScope, HeuristicKind};

/// Buffer of the broadcast channel; slow supervisors lag past this.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A call waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Correlation id; the key of any answer.
    pub tool_call_id: ToolCallId,
    /// Session of the call.
    pub session_id: SessionId,
    /// Workspace of the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    /// Tool name.
    pub tool: String,
    /// One-line description of the call.
    pub display_summary: String,
    /// Display risk.
    pub risk: RiskLevel,
    /// Why the gate is asking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Detector that fired, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<HeuristicKind>,
    /// When the gate started waiting.
    pub created_at: Timestamp,
    /// When the call will be denied by timeout.
    pub deadline_at: Timestamp,
    /// Scopes the gate will honor for an allow.
    pub remember_options: Vec<ApprovalScope>,
}

/// How a pending call was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResolved {
    /// Correlation id.
    pub tool_call_id: ToolCallId,
    /// Session of the call.
    pub session_id: SessionId,
    /// Final decision.
    pub action: Decision,
    /// Who settled it.
    pub resolved_by: ResolvedBy,
    /// Rule learned from a scoped allow, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_rule_id: Option<RuleId>,
}

/// Events carried by a [`BroadcastApprovalChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalEvent {
    /// A call started waiting.
    Requested(ApprovalRequest),
    /// A call stopped waiting.
    Resolved(ApprovalResolved),
}

/// Transport that presents approval requests to a human.
///
/// Implementations must not block: answers are delivered separately through
/// the gate service.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Announce a new pending call.
    async fn publish(&self, request: ApprovalRequest);

    /// Announce that a pending call was settled.
    async fn resolved(&self, resolved: ApprovalResolved);
}

/// Drops every event. Pending calls then end by timeout or teardown.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullApprovalChannel;

#[async_trait]
impl ApprovalChannel for NullApprovalChannel {
    async fn publish(&self, _request: ApprovalRequest) {}

    async fn resolved(&self, _resolved: ApprovalResolved) {}
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastApprovalChannel {
    sender: broadcast::Sender<ApprovalEvent>,
}

impl BroadcastApprovalChannel {
    /// Create a channel buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.sender.subscribe()
    }

    fn send(&self, event: ApprovalEvent) {
        // No subscribers is not an error.
        if self.sender.send(event).is_err() {
            debug!("no approval subscribers");
        }
    }
}

impl Default for BroadcastApprovalChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl ApprovalChannel for BroadcastApprovalChannel {
    async fn publish(&self, request: ApprovalRequest) {
        self.send(ApprovalEvent::Requested(request));
    }

    async fn resolved(&self, resolved: ApprovalResolved) {
        self.send(ApprovalEvent::Resolved(resolved));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ApprovalResolved {
        ApprovalResolved {
            tool_call_id: ToolCallId::new("c1"),
            session_id: SessionId::new("s1"),
            action: Decision::Deny,
            resolved_by: ResolvedBy::Timeout,
            learned_rule_id: None,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let channel = BroadcastApprovalChannel::default();
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        channel.resolved(resolved()).await;

        assert_eq!(a.recv().await.unwrap(), ApprovalEvent::Resolved(resolved()));
        assert_eq!(b.recv().await.unwrap(), ApprovalEvent::Resolved(resolved()));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let channel = BroadcastApprovalChannel::new(0);
        channel.resolved(resolved()).await;
        NullApprovalChannel.resolved(resolved()).await;
    }

    #[test]
    fn test_resolved_shape() {
        let value = serde_json::to_value(resolved()).unwrap();
        assert_eq!(value["resolved_by"], "timeout");
        assert_eq!(value["action"], "deny");
        assert!(value.get("learned_rule_id").is_none());
    }
}
