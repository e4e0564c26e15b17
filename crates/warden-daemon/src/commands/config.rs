//! Config command - show the effective configuration and file locations.

use anyhow::{Result, bail};
use colored::Colorize;
use warden_config::Config;
use warden_core::WardenHome;
use warden_daemon::RuntimePaths;

use crate::theme::Theme;

/// Render the configuration (or one section of it) as TOML or JSON.
fn render_config(cfg: &Config, format: &str, section: Option<&str>) -> Result<String> {
    match format {
        "json" => {
            let mut value = serde_json::to_value(cfg)?;
            if let Some(name) = section {
                let Some(inner) = value.get(name).cloned() else {
                    bail!("unknown config section '{name}'");
                };
                value = inner;
            }
            Ok(serde_json::to_string_pretty(&value)?)
        },
        "toml" => {
            let value = toml::Value::try_from(cfg)?;
            let Some(name) = section else {
                return Ok(toml::to_string_pretty(&value)?);
            };
            let Some(inner) = value.get(name).cloned() else {
                bail!("unknown config section '{name}'");
            };
            // Keep the section header so the output is valid TOML.
            let mut table = toml::map::Map::new();
            table.insert(name.to_owned(), inner);
            Ok(toml::to_string_pretty(&toml::Value::Table(table))?)
        },
        other => bail!("unknown format '{other}'; expected toml or json"),
    }
}

/// Print the effective configuration.
pub(crate) fn show_config(cfg: &Config, format: &str, section: Option<&str>) -> Result<()> {
    println!("{}", render_config(cfg, format, section)?);
    Ok(())
}

/// Print where the daemon reads and writes.
pub(crate) fn show_paths(home: &WardenHome, paths: &RuntimePaths, loaded_files: &[String]) {
    println!("\n{}", Theme::header("Warden paths"));
    println!("{}", Theme::separator());
    let rows = [
        ("home", home.root().display().to_string()),
        ("gate socket", paths.gate_socket.display().to_string()),
        ("supervisor socket", paths.supervisor_socket.display().to_string()),
        ("rules", paths.rules.display().to_string()),
        ("audit log", paths.audit_log.display().to_string()),
        ("logs", paths.logs_dir.display().to_string()),
    ];
    for (label, value) in rows {
        println!("  {:<18} {value}", label.dimmed());
    }

    if loaded_files.is_empty() {
        println!("  {:<18} {}", "config".dimmed(), Theme::dimmed("(defaults only)"));
    }
    for file in loaded_files {
        println!("  {:<18} {file}", "config".dimmed());
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        let dir = tempfile::tempdir().unwrap();
        Config::load_with_home(None, dir.path()).unwrap().config
    }

    #[test]
    fn test_render_full_config_as_toml() {
        let out = render_config(&defaults(), "toml", None).unwrap();
        assert!(out.contains("[gate]"));
        assert!(out.contains("approval_timeout_secs = 300"));
        let reparsed: Config = toml::from_str(&out).unwrap();
        assert_eq!(reparsed.gate.heartbeat_grace_secs, 45);
    }

    #[test]
    fn test_render_section() {
        let out = render_config(&defaults(), "toml", Some("policy")).unwrap();
        assert!(out.starts_with("[policy]"));
        assert!(out.contains("default_decision = \"ask\""));

        let json = render_config(&defaults(), "json", Some("heuristics")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["secret_file_read"], "block");
    }

    #[test]
    fn test_render_rejects_unknowns() {
        assert!(render_config(&defaults(), "yaml", None).is_err());
        assert!(render_config(&defaults(), "toml", Some("nope")).is_err());
    }
}
