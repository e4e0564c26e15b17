//! Serve command - run the gate daemon in the foreground.

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use warden_config::Config;
use warden_core::WardenHome;
use warden_daemon::Daemon;
use warden_policy::PathContext;

use crate::theme::Theme;

/// Run the daemon until Ctrl+C.
pub(crate) async fn run_daemon(
    cfg: &Config,
    home: &WardenHome,
    ctx: PathContext,
    loaded_files: &[String],
) -> Result<()> {
    let daemon = Daemon::build_with_context(cfg, home, ctx)?;
    let rules = daemon.service().evaluator().rules().len();

    let shutdown = CancellationToken::new();
    let running = daemon.start(shutdown.clone())?;

    println!("{}", Theme::header("Warden gate"));
    println!("{}", Theme::separator());
    println!(
        "  {} {}",
        "gate:".dimmed(),
        running.paths().gate_socket.display()
    );
    if running.supervisor_enabled() {
        println!(
            "  {} {}",
            "supervisor:".dimmed(),
            running.paths().supervisor_socket.display()
        );
    }
    println!(
        "  {} {}",
        "audit:".dimmed(),
        running.paths().audit_log.display()
    );
    println!("  {} {rules}", "rules:".dimmed());
    for file in loaded_files {
        println!("  {} {file}", "config:".dimmed());
    }
    println!("{}", Theme::dimmed("Press Ctrl+C to stop"));

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("{}", Theme::error(&format!("Failed to wait for Ctrl+C: {e}")));
    }

    println!("\n{}", "Shutting down gate...".yellow());
    shutdown.cancel();
    running.stopped().await?;

    println!("{}", Theme::success("Gate stopped"));
    Ok(())
}
