//! Policy rules and the store that holds them.
//!
//! A [`PolicyRule`] maps a tool (and optionally an executable and/or a glob
//! pattern) to a decision within a scope:
//! - **Session** rules live in memory and die at session teardown.
//! - **Workspace** and **global** rules are persisted to `rules.json`.
//!
//! Rules come from first-run presets, from scoped human approvals
//! (learned), or from the CLI (manual).

mod pattern;
mod store;

pub use pattern::literal_prefix;
pub use store::{RuleMatch, RuleQuery, RuleStore, RuleSubject};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use warden_core::{Decision, RuleId, SessionId, Timestamp, WorkspaceId};

use crate::error::{PolicyError, PolicyResult};
use crate::request::FileAccess;

/// Tool name that matches every tool.
pub const ANY_TOOL: &str = "*";

/// How long a rule lives and who can see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// One agent session; in memory only.
    Session,
    /// One workspace; persisted.
    Workspace,
    /// Everywhere; persisted.
    Global,
}

impl RuleScope {
    /// Whether rules of this scope are written to disk.
    #[must_use]
    pub fn is_persisted(self) -> bool {
        !matches!(self, Self::Session)
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Workspace => write!(f, "workspace"),
            Self::Global => write!(f, "global"),
        }
    }
}

impl FromStr for RuleScope {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "workspace" => Ok(Self::Workspace),
            "global" => Ok(Self::Global),
            other => Err(PolicyError::invalid_rule(format!(
                "unknown scope '{other}'; expected one of: session, workspace, global"
            ))),
        }
    }
}

/// How far a human approval should be remembered.
///
/// Unknown values deserialize as [`ApprovalScope::Once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// This call only.
    #[default]
    Once,
    /// The rest of the session.
    Session,
    /// The workspace, across sessions.
    Workspace,
    /// Everywhere.
    Global,
}

impl ApprovalScope {
    /// Parse leniently: anything unrecognized is `Once`.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Self::Session,
            "workspace" => Self::Workspace,
            "global" => Self::Global,
            _ => Self::Once,
        }
    }

    /// The rule scope a remembered approval is stored under.
    #[must_use]
    pub fn rule_scope(self) -> Option<RuleScope> {
        match self {
            Self::Once => None,
            Self::Session => Some(RuleScope::Session),
            Self::Workspace => Some(RuleScope::Workspace),
            Self::Global => Some(RuleScope::Global),
        }
    }
}

impl<'de> Deserialize<'de> for ApprovalScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

impl fmt::Display for ApprovalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Session => write!(f, "session"),
            Self::Workspace => write!(f, "workspace"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Seeded from configuration on first run.
    Preset,
    /// Synthesized from a scoped human approval.
    Learned,
    /// Added by hand through the CLI.
    Manual,
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset => write!(f, "preset"),
            Self::Learned => write!(f, "learned"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier (assigned by the store when empty).
    pub id: RuleId,
    /// Exact tool name or `*`.
    pub tool: String,
    /// Decision when the rule matches.
    pub decision: Decision,
    /// Visibility and lifetime.
    pub scope: RuleScope,
    /// Owning session (session scope only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Owning workspace (workspace scope only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    /// Glob over the normalized file path or the raw command text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Exact match against the parsed bash executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Origin of the rule.
    pub source: RuleSource,
    /// Expiry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl PolicyRule {
    /// Create a rule with no id, pattern, or executable.
    #[must_use]
    pub fn new(tool: impl Into<String>, decision: Decision, scope: RuleScope) -> Self {
        Self {
            id: RuleId::new(String::new()),
            tool: tool.into(),
            decision,
            scope,
            session_id: None,
            workspace_id: None,
            pattern: None,
            executable: None,
            label: None,
            source: RuleSource::Manual,
            expires_at: None,
            created_at: Timestamp::now(),
        }
    }

    /// Set the rule id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RuleId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the owning session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set the owning workspace.
    #[must_use]
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Set the glob pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set the executable.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: RuleSource) -> Self {
        self.source = source;
        self
    }

    /// Set an expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the rule has expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|e| e.is_at_or_before(now))
    }

    /// Whether the pattern is a file-path glob (the tool is a file tool).
    #[must_use]
    pub fn is_file_rule(&self) -> bool {
        FileAccess::from_tool(&self.tool).is_some()
    }

    /// Whether the rule applies to `tool`.
    #[must_use]
    pub fn applies_to_tool(&self, tool: &str) -> bool {
        self.tool == ANY_TOOL || self.tool == tool
    }

    /// Check the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] when the tool is empty, a scope
    /// owner is missing, or the pattern/executable is blank.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.tool.trim().is_empty() {
            return Err(PolicyError::invalid_rule("tool must not be empty"));
        }
        match self.scope {
            RuleScope::Session if self.session_id.as_ref().is_none_or(SessionId::is_empty) => {
                return Err(PolicyError::invalid_rule(
                    "session-scoped rules require a session_id",
                ));
            },
            RuleScope::Workspace
                if self
                    .workspace_id
                    .as_ref()
                    .is_none_or(WorkspaceId::is_empty) =>
            {
                return Err(PolicyError::invalid_rule(
                    "workspace-scoped rules require a workspace_id",
                ));
            },
            _ => {},
        }
        if self.pattern.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(PolicyError::invalid_rule("pattern must not be blank"));
        }
        if self
            .executable
            .as_deref()
            .is_some_and(|e| e.trim().is_empty())
        {
            return Err(PolicyError::invalid_rule("executable must not be blank"));
        }
        Ok(())
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.decision, self.tool, self.scope)?;
        if let Some(exe) = &self.executable {
            write!(f, " exe={exe}")?;
        }
        if let Some(pattern) = &self.pattern {
            write!(f, " pattern={pattern}")?;
        }
        Ok(())
    }
}
