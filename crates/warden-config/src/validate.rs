//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, PresetRuleSection};

/// Smallest rotation threshold accepted for the audit log.
const MIN_AUDIT_FILE_BYTES: u64 = 4096;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_policy(config)?;
    validate_gate(config)?;
    validate_presets(config)?;
    validate_audit(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_policy(config: &Config) -> ConfigResult<()> {
    let p = &config.policy;

    let Some(default) = p.default_decision.as_deref() else {
        return Err(ConfigError::invalid(
            "policy.default_decision",
            "no default decision configured; set one of: allow, ask, deny",
        ));
    };
    if !is_decision(default) {
        return Err(ConfigError::invalid(
            "policy.default_decision",
            format!("unknown decision '{default}'; expected one of: allow, ask, deny"),
        ));
    }

    if p.reserved_tool_prefixes.iter().any(|s| s.trim().is_empty()) {
        return Err(ConfigError::invalid(
            "policy.reserved_tool_prefixes",
            "reserved tool prefixes must not be empty",
        ));
    }

    if p.max_command_length == 0 {
        return Err(ConfigError::invalid(
            "policy.max_command_length",
            "max_command_length must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_gate(config: &Config) -> ConfigResult<()> {
    let g = &config.gate;

    for (field, value) in [
        ("gate.approval_timeout_secs", g.approval_timeout_secs),
        ("gate.heartbeat_interval_secs", g.heartbeat_interval_secs),
        ("gate.heartbeat_grace_secs", g.heartbeat_grace_secs),
        ("gate.handshake_timeout_secs", g.handshake_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::invalid(field, "timeout must be greater than 0"));
        }
    }

    if g.heartbeat_grace_secs < g.heartbeat_interval_secs {
        return Err(ConfigError::invalid(
            "gate.heartbeat_grace_secs",
            format!(
                "grace ({}s) must be at least the heartbeat interval ({}s)",
                g.heartbeat_grace_secs, g.heartbeat_interval_secs
            ),
        ));
    }

    if g.max_message_bytes < 1024 {
        return Err(ConfigError::invalid(
            "gate.max_message_bytes",
            "max_message_bytes must be at least 1024",
        ));
    }

    Ok(())
}

fn validate_presets(config: &Config) -> ConfigResult<()> {
    for (i, preset) in config.rules.presets.iter().enumerate() {
        validate_preset(i, preset)?;
    }
    Ok(())
}

fn validate_preset(index: usize, preset: &PresetRuleSection) -> ConfigResult<()> {
    let field = |name: &str| format!("rules.presets[{index}].{name}");

    if preset.tool.trim().is_empty() {
        return Err(ConfigError::invalid(field("tool"), "tool must not be empty"));
    }

    if !is_decision(&preset.decision) {
        return Err(ConfigError::invalid(
            field("decision"),
            format!(
                "unknown decision '{}'; expected one of: allow, ask, deny",
                preset.decision
            ),
        ));
    }

    match preset.scope.as_str() {
        "global" => {},
        "workspace" => {
            if preset
                .workspace_id
                .as_deref()
                .is_none_or(|w| w.trim().is_empty())
            {
                return Err(ConfigError::invalid(
                    field("workspace_id"),
                    "workspace-scoped presets require a workspace_id",
                ));
            }
        },
        "session" => {
            return Err(ConfigError::invalid(
                field("scope"),
                "session-scoped rules cannot be configured as presets",
            ));
        },
        other => {
            return Err(ConfigError::invalid(
                field("scope"),
                format!("unknown scope '{other}'; expected one of: workspace, global"),
            ));
        },
    }

    if preset
        .pattern
        .as_deref()
        .is_some_and(|p| p.trim().is_empty())
    {
        return Err(ConfigError::invalid(
            field("pattern"),
            "pattern must not be empty when set",
        ));
    }

    Ok(())
}

fn validate_audit(config: &Config) -> ConfigResult<()> {
    if config.audit.max_file_bytes < MIN_AUDIT_FILE_BYTES {
        return Err(ConfigError::invalid(
            "audit.max_file_bytes",
            format!("max_file_bytes must be at least {MIN_AUDIT_FILE_BYTES}"),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "unknown log level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }

    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(ConfigError::invalid(
            "logging.format",
            format!(
                "unknown log format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }

    Ok(())
}

fn is_decision(value: &str) -> bool {
    matches!(value, "allow" | "ask" | "deny")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.policy.default_decision = Some("ask".to_owned());
        config
    }

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_default_config_with_decision_is_valid() {
        assert!(validate(&valid()).is_ok());
    }

    #[test]
    fn test_missing_default_decision() {
        let config = Config::default();
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "policy.default_decision"
        );
    }

    #[test]
    fn test_unknown_default_decision() {
        let mut config = valid();
        config.policy.default_decision = Some("maybe".to_owned());
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "policy.default_decision"
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid();
        config.gate.approval_timeout_secs = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "gate.approval_timeout_secs"
        );
    }

    #[test]
    fn test_grace_shorter_than_interval_rejected() {
        let mut config = valid();
        config.gate.heartbeat_interval_secs = 30;
        config.gate.heartbeat_grace_secs = 10;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "gate.heartbeat_grace_secs"
        );
    }

    #[test]
    fn test_session_preset_rejected() {
        let mut config = valid();
        config.rules.presets.push(PresetRuleSection {
            scope: "session".to_owned(),
            ..PresetRuleSection::default()
        });
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "rules.presets[0].scope"
        );
    }

    #[test]
    fn test_workspace_preset_requires_workspace_id() {
        let mut config = valid();
        config.rules.presets.push(PresetRuleSection {
            scope: "workspace".to_owned(),
            ..PresetRuleSection::default()
        });
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "rules.presets[0].workspace_id"
        );

        config.rules.presets[0].workspace_id = Some("ws-1".to_owned());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_preset_bad_decision() {
        let mut config = valid();
        config.rules.presets.push(PresetRuleSection {
            decision: "sometimes".to_owned(),
            ..PresetRuleSection::default()
        });
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "rules.presets[0].decision"
        );
    }

    #[test]
    fn test_tiny_audit_rotation_rejected() {
        let mut config = valid();
        config.audit.max_file_bytes = 100;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "audit.max_file_bytes"
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid();
        config.logging.level = "verbose".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = valid();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}
