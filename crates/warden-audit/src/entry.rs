//! Audit entry types.
//!
//! Every resolved gate decision is recorded as exactly one entry. Entries
//! are never mutated or deleted once written.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use warden_core::{
    Decision, DecisionLayer, RiskLevel, RuleId, SessionId, Timestamp, ToolCallId, WorkspaceId,
};

/// Unique identifier of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    /// Generate a fresh entry id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Who settled the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    /// The policy evaluator decided without asking.
    Policy,
    /// A human answered the approval request.
    User,
    /// Nobody answered before the deadline.
    Timeout,
    /// The agent connection went away while the approval was pending.
    ConnectionLost,
}

impl fmt::Display for ResolvedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy => write!(f, "policy"),
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionLost => write!(f, "connection_lost"),
        }
    }
}

/// What the caller knows about a decision, before the log stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Session of the call.
    pub session_id: SessionId,
    /// Workspace of the session, if any.
    pub workspace_id: Option<WorkspaceId>,
    /// Correlation id of the call.
    pub tool_call_id: ToolCallId,
    /// Tool name.
    pub tool: String,
    /// One-line description of the call.
    pub display_summary: String,
    /// Display risk.
    pub risk: RiskLevel,
    /// Final decision: allow or deny.
    pub decision: Decision,
    /// Who settled it.
    pub resolved_by: ResolvedBy,
    /// Policy layer that produced the initial decision.
    pub layer: DecisionLayer,
    /// Rule that matched, if any.
    pub rule_id: Option<RuleId>,
    /// Rule synthesized from a scoped approval, if any.
    pub learned_rule_id: Option<RuleId>,
    /// Explanation, if any.
    pub reason: Option<String>,
}

impl AuditRecord {
    /// Create a record with no rule ids, summary, or reason.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool: impl Into<String>,
        decision: Decision,
        resolved_by: ResolvedBy,
        layer: DecisionLayer,
    ) -> Self {
        Self {
            session_id,
            workspace_id: None,
            tool_call_id,
            tool: tool.into(),
            display_summary: String::new(),
            risk: RiskLevel::Low,
            decision,
            resolved_by,
            layer,
            rule_id: None,
            learned_rule_id: None,
            reason: None,
        }
    }

    /// Set the workspace.
    #[must_use]
    pub fn with_workspace(mut self, workspace_id: Option<WorkspaceId>) -> Self {
        self.workspace_id = workspace_id;
        self
    }

    /// Set the display summary and risk.
    #[must_use]
    pub fn with_summary(mut self, display_summary: impl Into<String>, risk: RiskLevel) -> Self {
        self.display_summary = display_summary.into();
        self.risk = risk;
        self
    }

    /// Set the matched rule.
    #[must_use]
    pub fn with_rule(mut self, rule_id: Option<RuleId>) -> Self {
        self.rule_id = rule_id;
        self
    }

    /// Set the learned rule.
    #[must_use]
    pub fn with_learned_rule(mut self, learned_rule_id: Option<RuleId>) -> Self {
        self.learned_rule_id = learned_rule_id;
        self
    }

    /// Set the explanation.
    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: AuditEntryId,
    /// When the entry was written.
    pub timestamp: Timestamp,
    /// Session of the call.
    pub session_id: SessionId,
    /// Workspace of the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    /// Correlation id of the call.
    pub tool_call_id: ToolCallId,
    /// Tool name.
    pub tool: String,
    /// One-line description of the call.
    pub display_summary: String,
    /// Display risk.
    pub risk: RiskLevel,
    /// Final decision.
    pub decision: Decision,
    /// Who settled it.
    pub resolved_by: ResolvedBy,
    /// Policy layer that produced the initial decision.
    pub layer: DecisionLayer,
    /// Rule that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    /// Rule synthesized from a scoped approval, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_rule_id: Option<RuleId>,
    /// Explanation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    /// Stamp a record with a fresh id and the current time.
    ///
    /// The timestamp is cut to whole milliseconds, the precision it is
    /// stored with.
    #[must_use]
    pub fn create(record: AuditRecord) -> Self {
        Self {
            id: AuditEntryId::new(),
            timestamp: Timestamp::from_millis(Timestamp::now().as_millis()),
            session_id: record.session_id,
            workspace_id: record.workspace_id,
            tool_call_id: record.tool_call_id,
            tool: record.tool,
            display_summary: record.display_summary,
            risk: record.risk,
            decision: record.decision,
            resolved_by: record.resolved_by,
            layer: record.layer,
            rule_id: record.rule_id,
            learned_rule_id: record.learned_rule_id,
            reason: record.reason,
        }
    }

    /// Short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        let summary = if self.display_summary.is_empty() {
            self.tool.as_str()
        } else {
            self.display_summary.as_str()
        };
        format!("{} {} (by {})", self.decision, summary, self.resolved_by)
    }
}
