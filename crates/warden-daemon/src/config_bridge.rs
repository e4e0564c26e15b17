//! Bridge from `warden_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates its string-typed sections into the policy, gate and
//! telemetry types, so the conversion happens once, in one place.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use warden_config::{Config, HeuristicModeSetting, HeuristicsSection, PresetRuleSection};
use warden_core::{Decision, WardenHome, WorkspaceId};
use warden_gate::GateSettings;
use warden_policy::{
    EvaluatorConfig, HeuristicMode, HeuristicSettings, PathContext, PolicyRule, RuleScope,
    RuleSource,
};
use warden_telemetry::{LogConfig, TelemetryResult};

/// Filesystem locations the daemon works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Agent-facing gate socket.
    pub gate_socket: PathBuf,
    /// Human-approval socket.
    pub supervisor_socket: PathBuf,
    /// Persisted workspace and global rules.
    pub rules: PathBuf,
    /// Active audit log segment.
    pub audit_log: PathBuf,
    /// Directory for rolling log files.
    pub logs_dir: PathBuf,
}

/// Resolve configured paths, falling back to the layout under `home`.
///
/// Configured values may start with `~` or `$HOME`.
#[must_use]
pub fn to_runtime_paths(cfg: &Config, home: &WardenHome, ctx: &PathContext) -> RuntimePaths {
    let configured = |value: Option<&String>, fallback: PathBuf| {
        value
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map_or(fallback, |raw| PathBuf::from(ctx.expand_home(raw)))
    };

    RuntimePaths {
        gate_socket: configured(cfg.gate.socket_path.as_ref(), home.gate_socket_path()),
        supervisor_socket: configured(
            cfg.gate.supervisor_socket_path.as_ref(),
            home.supervisor_socket_path(),
        ),
        rules: configured(cfg.rules.path.as_ref(), home.rules_path()),
        audit_log: configured(cfg.audit.path.as_ref(), home.audit_log_path()),
        logs_dir: home.logs_dir(),
    }
}

/// Convert config to [`EvaluatorConfig`].
///
/// # Errors
///
/// Returns an error when no default decision is configured or it is not one
/// of `allow`, `ask`, `deny`.
pub fn to_evaluator_config(cfg: &Config) -> anyhow::Result<EvaluatorConfig> {
    let raw = cfg
        .policy
        .default_decision
        .as_deref()
        .ok_or_else(|| anyhow!("policy.default_decision is not configured"))?;
    let default_decision: Decision = raw
        .parse()
        .map_err(|e: String| anyhow!("policy.default_decision: {e}"))?;

    let mut config = EvaluatorConfig::new(default_decision);
    config.reserved_tool_prefixes = cfg.policy.reserved_tool_prefixes.clone();
    config.heuristics = to_heuristic_settings(&cfg.heuristics);
    config.max_command_length = cfg.policy.max_command_length;
    Ok(config)
}

/// Convert the `[heuristics]` section to [`HeuristicSettings`].
#[must_use]
pub fn to_heuristic_settings(section: &HeuristicsSection) -> HeuristicSettings {
    HeuristicSettings {
        secret_file_read: to_heuristic_mode(section.secret_file_read),
        secret_env_in_url: to_heuristic_mode(section.secret_env_in_url),
        pipe_to_shell: to_heuristic_mode(section.pipe_to_shell),
        data_egress: to_heuristic_mode(section.data_egress),
    }
}

fn to_heuristic_mode(setting: HeuristicModeSetting) -> HeuristicMode {
    match setting {
        HeuristicModeSetting::Allow => HeuristicMode::Allow,
        HeuristicModeSetting::Ask => HeuristicMode::Ask,
        HeuristicModeSetting::Block => HeuristicMode::Block,
        HeuristicModeSetting::Disabled => HeuristicMode::Disabled,
    }
}

/// Convert the `[gate]` section to [`GateSettings`].
#[must_use]
pub fn to_gate_settings(cfg: &Config) -> GateSettings {
    let g = &cfg.gate;
    GateSettings {
        approval_timeout: Duration::from_secs(g.approval_timeout_secs),
        heartbeat_interval: Duration::from_secs(g.heartbeat_interval_secs),
        heartbeat_grace: Duration::from_secs(g.heartbeat_grace_secs),
        handshake_timeout: Duration::from_secs(g.handshake_timeout_secs),
        max_message_bytes: g.max_message_bytes,
    }
}

/// Convert `[[rules.presets]]` entries to preset rules.
///
/// # Errors
///
/// Returns an error naming the first preset whose decision or scope does not
/// parse.
pub fn to_preset_rules(cfg: &Config) -> anyhow::Result<Vec<PolicyRule>> {
    cfg.rules
        .presets
        .iter()
        .enumerate()
        .map(|(index, preset)| {
            to_preset_rule(preset).with_context(|| {
                let name = preset.id.clone().unwrap_or_else(|| index.to_string());
                format!("rules.presets[{name}]")
            })
        })
        .collect()
}

fn to_preset_rule(preset: &PresetRuleSection) -> anyhow::Result<PolicyRule> {
    let decision: Decision = preset.decision.parse().map_err(|e: String| anyhow!(e))?;
    let scope: RuleScope = preset.scope.parse()?;

    let mut rule = PolicyRule::new(preset.tool.clone(), decision, scope)
        .with_source(RuleSource::Preset);
    if let Some(id) = &preset.id {
        rule = rule.with_id(id.clone());
    }
    if let Some(ws) = &preset.workspace_id {
        rule = rule.with_workspace(WorkspaceId::new(ws.clone()));
    }
    if let Some(pattern) = &preset.pattern {
        rule = rule.with_pattern(pattern.clone());
    }
    if let Some(exe) = &preset.executable {
        rule = rule.with_executable(exe.clone());
    }
    if let Some(label) = &preset.label {
        rule = rule.with_label(label.clone());
    }
    Ok(rule)
}

/// Convert the `[logging]` section to a [`LogConfig`].
///
/// # Errors
///
/// Returns an error when the log format is unknown.
pub fn to_log_config(cfg: &Config, paths: &RuntimePaths) -> TelemetryResult<LogConfig> {
    LogConfig::from_section(&cfg.logging, paths.logs_dir.clone())
}
