//! Configuration types for the Warden gate.
//!
//! All types in this module are self-contained with no dependencies on other
//! internal warden crates. Every struct implements [`Default`] so that a bare
//! `[section]` header in TOML produces a working configuration. The one
//! exception is [`PolicySection::default_decision`], which only the embedded
//! defaults supply: a config without it is rejected at startup.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the Warden daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket paths, timeouts and framing limits.
    pub gate: GateSection,
    /// Fallback decision and reserved tool names.
    pub policy: PolicySection,
    /// Per-detector heuristic modes.
    pub heuristics: HeuristicsSection,
    /// Rule persistence and first-run presets.
    pub rules: RulesSection,
    /// Audit log location and rotation.
    pub audit: AuditSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// GateSection
// ---------------------------------------------------------------------------

/// Agent-facing socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    /// Agent adapter socket (defaults to `~/.warden/gate.sock`).
    pub socket_path: Option<String>,
    /// Human-approval socket (defaults to `~/.warden/supervisor.sock`).
    pub supervisor_socket_path: Option<String>,
    /// Whether to serve the supervisor socket at all.
    pub supervisor_enabled: bool,
    /// How long an `ask` waits for a human before failing closed.
    pub approval_timeout_secs: u64,
    /// Heartbeat cadence advertised to adapters.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a connection is treated as closed.
    pub heartbeat_grace_secs: u64,
    /// Time allowed between connect and `hello`.
    pub handshake_timeout_secs: u64,
    /// Maximum size of one newline-delimited message.
    pub max_message_bytes: usize,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            socket_path: None,
            supervisor_socket_path: None,
            supervisor_enabled: true,
            approval_timeout_secs: 300,
            heartbeat_interval_secs: 15,
            heartbeat_grace_secs: 45,
            handshake_timeout_secs: 10,
            max_message_bytes: 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// PolicySection
// ---------------------------------------------------------------------------

/// Evaluator-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Decision when no guard, heuristic, or rule matched (`allow`, `ask`, `deny`).
    pub default_decision: Option<String>,
    /// Tool-name prefixes that always require a one-shot human approval.
    pub reserved_tool_prefixes: Vec<String>,
    /// Commands longer than this are truncated before analysis.
    pub max_command_length: usize,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            default_decision: None,
            reserved_tool_prefixes: vec!["policy.".to_owned()],
            max_command_length: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// HeuristicsSection
// ---------------------------------------------------------------------------

/// What a triggered heuristic does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeuristicModeSetting {
    /// Allow the call outright.
    Allow,
    /// Ask a human.
    Ask,
    /// Deny the call.
    Block,
    /// Skip the detector.
    Disabled,
}

/// Mode of each structural detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsSection {
    /// Reads of credential files and directories.
    pub secret_file_read: HeuristicModeSetting,
    /// Credential-looking env vars expanded into URLs.
    pub secret_env_in_url: HeuristicModeSetting,
    /// Output piped into a shell interpreter.
    pub pipe_to_shell: HeuristicModeSetting,
    /// Outbound transfers carrying a payload.
    pub data_egress: HeuristicModeSetting,
}

impl Default for HeuristicsSection {
    fn default() -> Self {
        Self {
            secret_file_read: HeuristicModeSetting::Block,
            secret_env_in_url: HeuristicModeSetting::Block,
            pipe_to_shell: HeuristicModeSetting::Ask,
            data_egress: HeuristicModeSetting::Ask,
        }
    }
}

// ---------------------------------------------------------------------------
// RulesSection
// ---------------------------------------------------------------------------

/// Rule persistence and seed rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// Persisted rules file (defaults to `~/.warden/rules.json`).
    pub path: Option<String>,
    /// Rules seeded the first time the rules file is created.
    pub presets: Vec<PresetRuleSection>,
}

/// A rule seeded on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetRuleSection {
    /// Stable id (generated when absent).
    pub id: Option<String>,
    /// Tool name or `*`.
    pub tool: String,
    /// `allow`, `ask`, or `deny`.
    pub decision: String,
    /// `workspace` or `global`.
    pub scope: String,
    /// Required for workspace scope.
    pub workspace_id: Option<String>,
    /// Glob over the file path or command text.
    pub pattern: Option<String>,
    /// Exact parsed executable name.
    pub executable: Option<String>,
    /// Human-readable label.
    pub label: Option<String>,
}

impl Default for PresetRuleSection {
    fn default() -> Self {
        Self {
            id: None,
            tool: "*".to_owned(),
            decision: "ask".to_owned(),
            scope: "global".to_owned(),
            workspace_id: None,
            pattern: None,
            executable: None,
            label: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AuditSection
// ---------------------------------------------------------------------------

/// Audit log storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// Active audit file (defaults to `~/.warden/audit/audit.jsonl`).
    pub path: Option<String>,
    /// Rotate once the active file exceeds this size.
    pub max_file_bytes: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: None,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// `pretty`, `compact`, `json`, or `full`.
    pub format: String,
    /// Write to a rolling file under `~/.warden/logs/` instead of stderr.
    pub to_file: bool,
    /// Extra filter directives (e.g. `warden_gate=debug`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            to_file: false,
            directives: Vec::new(),
        }
    }
}
