//! Common types used throughout Warden.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier newtype.
///
/// Session, workspace and tool-call identifiers are assigned by the agent
/// runtime, so they are opaque strings rather than UUIDs.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of an agent session.
    SessionId
);

string_id!(
    /// Identifier of a workspace (a project the agent operates in).
    WorkspaceId
);

string_id!(
    /// Correlation id of a single tool call, unique per request.
    ToolCallId
);

string_id!(
    /// Identifier of a policy rule.
    RuleId
);

impl RuleId {
    /// Generate a fresh random rule id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("rule-{}", Uuid::new_v4()))
    }
}

/// Timestamp wrapper for consistent handling throughout Warden.
///
/// Serialized as Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "chrono::serde::ts_milliseconds")] pub DateTime<Utc>);

impl Timestamp {
    /// Get the current timestamp.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `DateTime<Utc>`.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create a timestamp from Unix epoch milliseconds.
    ///
    /// Out-of-range values clamp to the Unix epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
        )
    }

    /// Unix epoch milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Check if this timestamp is in the past.
    #[must_use]
    pub fn is_past(&self) -> bool {
        self.0 < Utc::now()
    }

    /// Check if this timestamp is at or before `now`.
    #[must_use]
    pub fn is_at_or_before(&self, now: Timestamp) -> bool {
        self.0 <= now.0
    }

    /// This timestamp shifted forward by `duration` (saturating).
    #[must_use]
    pub fn saturating_add(&self, duration: std::time::Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map_or(Self(DateTime::<Utc>::MAX_UTC), Self)
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// The outcome vocabulary of the policy pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Proceed without asking.
    Allow,
    /// Ask a human before proceeding.
    Ask,
    /// Refuse.
    Deny,
}

impl Decision {
    /// Whether this decision lets the tool call run.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Whether this decision refuses the tool call.
    #[must_use]
    pub fn is_deny(self) -> bool {
        matches!(self, Self::Deny)
    }

    /// Strictness rank: `allow` < `ask` < `deny`.
    #[must_use]
    pub fn strictness(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Ask => 1,
            Self::Deny => 2,
        }
    }

    /// Lowercase name as used on the wire and in config.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "ask" => Ok(Self::Ask),
            "deny" | "block" => Ok(Self::Deny),
            other => Err(format!(
                "unknown decision '{other}'; expected one of: allow, ask, deny"
            )),
        }
    }
}

/// Which stage of the policy pipeline produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLayer {
    /// The gate's own policy-management surface.
    ReservedGuard,
    /// A structural command/path detector.
    Heuristic,
    /// A policy rule from the rule store.
    Rule,
    /// The configured fallback.
    Default,
}

impl fmt::Display for DecisionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedGuard => write!(f, "reserved_guard"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Rule => write!(f, "rule"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Risk level classification for tool calls.
///
/// Informational only: it drives UI emphasis, never the decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Low risk - typically read-only operations.
    Low,
    /// Medium risk - local modifications.
    Medium,
    /// High risk - flagged by a heuristic or touching the gate itself.
    High,
    /// Critical risk - credential exposure or exfiltration shapes.
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_serializes_as_millis() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000123");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_timestamp_saturating_add() {
        let ts = Timestamp::from_millis(1_000);
        let later = ts.saturating_add(std::time::Duration::from_secs(2));
        assert_eq!(later.as_millis(), 3_000);
        assert!(ts.is_at_or_before(later));
        assert!(!later.is_at_or_before(ts));
    }

    #[test]
    fn test_decision_parse_and_display() {
        assert_eq!("ALLOW".parse::<Decision>().unwrap(), Decision::Allow);
        assert_eq!("block".parse::<Decision>().unwrap(), Decision::Deny);
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!(Decision::Ask.to_string(), "ask");
        assert!(Decision::Deny.strictness() > Decision::Ask.strictness());
    }

    #[test]
    fn test_layer_wire_names() {
        let json = serde_json::to_string(&DecisionLayer::ReservedGuard).unwrap();
        assert_eq!(json, "\"reserved_guard\"");
        assert_eq!(DecisionLayer::Heuristic.to_string(), "heuristic");
    }

    #[test]
    fn test_string_ids_are_transparent() {
        let id = SessionId::new("sess-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sess-1\"");
        assert!(SessionId::new("  ").is_empty());
        assert!(RuleId::generate().as_str().starts_with("rule-"));
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Low < RiskLevel::Medium);
    }
}
