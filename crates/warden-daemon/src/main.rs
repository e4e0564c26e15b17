//! Warden - tool-call authorization gate.
//!
//! `warden serve` runs the gate daemon. The other subcommands work directly
//! on the rules file, the audit log and the configuration, so they can be
//! used whether or not the daemon is running.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use warden_config::Config;
use warden_core::WardenHome;
use warden_daemon::config_bridge;
use warden_policy::PathContext;
use warden_telemetry::{LogConfig, setup_logging};

mod commands;
mod theme;

use commands::{audit, config, rules, serve};
use theme::Theme;

/// Warden - tool-call authorization gate
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extra configuration file layered over ~/.warden/config.toml
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gate daemon in the foreground
    Serve,

    /// Manage workspace and global rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// Show recent audit entries, newest first
    Audit {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = warden_audit::DEFAULT_QUERY_LIMIT)]
        limit: usize,

        /// Only entries of this session
        #[arg(short, long)]
        session: Option<String>,

        /// Continue after this entry id (printed below a full page)
        #[arg(long)]
        older_than: Option<String>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List persisted rules
    List {
        /// Only global rules and rules of this workspace
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Add a manual rule
    Add {
        /// Tool name, or `*` for every tool
        tool: String,

        /// allow, ask or deny
        decision: String,

        /// global or workspace
        #[arg(short, long, default_value = "global")]
        scope: String,

        /// Workspace the rule belongs to (workspace scope)
        #[arg(short, long)]
        workspace: Option<String>,

        /// Glob over the file path or command text
        #[arg(short, long)]
        pattern: Option<String>,

        /// Exact executable of a bash command
        #[arg(short, long)]
        executable: Option<String>,

        /// Human-readable label
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a rule by id
    Remove {
        /// Rule id
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output format (toml or json)
        #[arg(short, long, default_value = "toml")]
        format: String,
        /// Show only a specific section (e.g. gate, policy, heuristics)
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Show resolved file and socket locations
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = WardenHome::resolve()?;
    let resolved = Config::load_with_home(cli.config.as_deref(), home.root())?;
    let cfg = resolved.config;
    let ctx = PathContext::from_env();
    let paths = config_bridge::to_runtime_paths(&cfg, &home, &ctx);

    // The daemon logs as configured; one-shot commands stay quiet unless
    // asked.
    let log_config = if matches!(cli.command, Commands::Serve) {
        let mut log_config = match config_bridge::to_log_config(&cfg, &paths) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", Theme::warning(&format!("Invalid logging config: {e}")));
                LogConfig::default()
            },
        };
        if cli.verbose {
            "debug".clone_into(&mut log_config.level);
        }
        log_config
    } else {
        LogConfig::new(if cli.verbose { "debug" } else { "warn" }).without_timestamps()
    };
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("{}", Theme::warning(&format!("Failed to set up logging: {e}")));
    }

    match cli.command {
        Commands::Serve => {
            home.ensure()?;
            serve::run_daemon(&cfg, &home, ctx, &resolved.loaded_files).await?;
        },
        Commands::Rules { command } => match command {
            RuleCommands::List { workspace } => {
                rules::list_rules(&cfg, &paths, ctx, workspace.as_deref())?;
            },
            RuleCommands::Add {
                tool,
                decision,
                scope,
                workspace,
                pattern,
                executable,
                label,
            } => {
                let args = rules::AddRuleArgs {
                    tool,
                    decision,
                    scope,
                    workspace,
                    pattern,
                    executable,
                    label,
                };
                rules::add_rule(&cfg, &paths, ctx, args)?;
            },
            RuleCommands::Remove { id } => rules::remove_rule(&cfg, &paths, ctx, &id)?,
        },
        Commands::Audit {
            limit,
            session,
            older_than,
        } => {
            let args = audit::AuditArgs {
                limit,
                session,
                older_than,
            };
            audit::show_audit_entries(&cfg, &paths, &args)?;
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { format, section } => {
                config::show_config(&cfg, &format, section.as_deref())?;
            },
            ConfigCommands::Paths => config::show_paths(&home, &paths, &resolved.loaded_files),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rules_add_parses() {
        let cli = Cli::try_parse_from([
            "warden", "rules", "add", "bash", "allow", "--scope", "workspace", "--workspace",
            "ws-1", "--executable", "npm",
        ])
        .unwrap();
        let Commands::Rules {
            command:
                RuleCommands::Add {
                    tool,
                    scope,
                    workspace,
                    executable,
                    ..
                },
        } = cli.command
        else {
            panic!("expected rules add");
        };
        assert_eq!(tool, "bash");
        assert_eq!(scope, "workspace");
        assert_eq!(workspace.as_deref(), Some("ws-1"));
        assert_eq!(executable.as_deref(), Some("npm"));
    }

    #[test]
    fn test_audit_limit_defaults() {
        let cli = Cli::try_parse_from(["warden", "audit", "--session", "s1"]).unwrap();
        let Commands::Audit {
            limit,
            session,
            older_than,
        } = cli.command
        else {
            panic!("expected audit");
        };
        assert_eq!(limit, warden_audit::DEFAULT_QUERY_LIMIT);
        assert_eq!(session.as_deref(), Some("s1"));
        assert!(older_than.is_none());
    }
}
