//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `$WARDEN_HOME/config.toml` or `~/.warden/config.toml` (user)
//! 3. Merge the explicit file, if any
//! 4. Apply env var overrides
//! 5. Deserialize merged tree → `Config`
//! 6. Validate
//! 7. Return `ResolvedConfig`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus the files that contributed to it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final, validated configuration.
    pub config: Config,
    /// Files merged over the embedded defaults, in load order.
    pub loaded_files: Vec<String>,
}

/// Load the configuration with layered file precedence.
///
/// `warden_home_override` replaces `$WARDEN_HOME` / `~/.warden` for user
/// config discovery.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(
    explicit_file: Option<&Path>,
    warden_home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let env_vars: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("WARDEN_"))
        .collect();

    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    // 2. User config.
    let user_path = match warden_home_override {
        Some(h) => h.join("config.toml"),
        None => match env_vars.get("WARDEN_HOME") {
            Some(custom) if Path::new(custom).is_absolute() => {
                PathBuf::from(custom).join("config.toml")
            },
            _ => home_directory()?.join(".warden").join("config.toml"),
        },
    };
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, &overlay);
        loaded_files.push(user_path.display().to_string());
        info!(path = %user_path.display(), "loaded user config");
    }

    // 3. Explicit file. Unlike the user layer, a missing file is an error.
    if let Some(path) = explicit_file {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        })?;
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded config file");
    }

    // 4. Env overrides.
    let applied = apply_env_overrides(&mut merged, &env_vars);
    if applied > 0 {
        debug!(count = applied, "applied environment variable overrides");
    }

    // 5. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 6. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
    })
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation to avoid TOCTOU races (no separate
/// exists/metadata checks before reading).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::invalid(
            path.display().to_string(),
            format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        ));
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Apply `WARDEN_*` overrides. Returns how many were applied.
fn apply_env_overrides(merged: &mut toml::Value, env_vars: &HashMap<String, String>) -> usize {
    const OVERRIDES: &[(&str, &str, &str)] = &[
        ("WARDEN_LOG_LEVEL", "logging", "level"),
        ("WARDEN_DEFAULT_DECISION", "policy", "default_decision"),
        ("WARDEN_SOCKET", "gate", "socket_path"),
    ];

    let Some(root) = merged.as_table_mut() else {
        return 0;
    };

    let mut applied: usize = 0;
    for (var, section, field) in OVERRIDES {
        let Some(value) = env_vars.get(*var) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        let table = root
            .entry((*section).to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if let Some(table) = table.as_table_mut() {
            table.insert((*field).to_owned(), toml::Value::String(value.clone()));
            applied = applied.saturating_add(1);
        }
    }
    applied
}

/// Get the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeuristicModeSetting;

    #[test]
    fn test_defaults_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load(None, Some(dir.path())).unwrap();
        let config = resolved.config;
        assert_eq!(config.policy.default_decision.as_deref(), Some("ask"));
        assert_eq!(config.gate.approval_timeout_secs, 300);
        assert_eq!(
            config.heuristics.secret_file_read,
            HeuristicModeSetting::Block
        );
        assert!(!config.rules.presets.is_empty());
        assert!(resolved.loaded_files.is_empty());
    }

    #[test]
    fn test_user_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[gate]\napproval_timeout_secs = 30\n[heuristics]\npipe_to_shell = \"block\"\n",
        )
        .unwrap();

        let resolved = load(None, Some(dir.path())).unwrap();
        assert_eq!(resolved.config.gate.approval_timeout_secs, 30);
        assert_eq!(resolved.config.gate.heartbeat_interval_secs, 15);
        assert_eq!(
            resolved.config.heuristics.pipe_to_shell,
            HeuristicModeSetting::Block
        );
        assert_eq!(resolved.loaded_files.len(), 1);
    }

    #[test]
    fn test_explicit_file_wins_over_user_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[policy]\ndefault_decision = \"deny\"\n",
        )
        .unwrap();
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&explicit, "[policy]\ndefault_decision = \"allow\"\n").unwrap();

        let resolved = load(Some(&explicit), Some(dir.path())).unwrap();
        assert_eq!(
            resolved.config.policy.default_decision.as_deref(),
            Some("allow")
        );
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load(Some(&missing), Some(dir.path())),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_invalid_heuristic_mode_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[heuristics]\ndata_egress = \"sometimes\"\n",
        )
        .unwrap();
        assert!(matches!(
            load(None, Some(dir.path())),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut merged: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let env: HashMap<String, String> = [
            ("WARDEN_LOG_LEVEL".to_owned(), "debug".to_owned()),
            ("WARDEN_SOCKET".to_owned(), "/tmp/w.sock".to_owned()),
            ("WARDEN_DEFAULT_DECISION".to_owned(), "  ".to_owned()),
        ]
        .into_iter()
        .collect();

        assert_eq!(apply_env_overrides(&mut merged, &env), 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["gate"]["socket_path"].as_str(), Some("/tmp/w.sock"));
        assert_eq!(merged["policy"]["default_decision"].as_str(), Some("ask"));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }
}
