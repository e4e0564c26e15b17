//! Audit command - view recent gate decisions.

use anyhow::{Context, Result};
use colored::Colorize;
use warden_audit::{AuditEntry, AuditEntryId, AuditLog, AuditQuery, ResolvedBy};
use warden_config::Config;
use warden_core::SessionId;
use warden_daemon::RuntimePaths;

use crate::theme::Theme;

/// Options of `warden audit`.
pub(crate) struct AuditArgs {
    pub(crate) limit: usize,
    pub(crate) session: Option<String>,
    pub(crate) older_than: Option<String>,
}

/// Build the query for `warden audit`.
fn audit_query(args: &AuditArgs) -> Result<AuditQuery> {
    let mut query = AuditQuery::latest(args.limit);
    if let Some(id) = &args.session {
        query = query.for_session(SessionId::new(id));
    }
    if let Some(cursor) = &args.older_than {
        let id: AuditEntryId = cursor
            .parse()
            .with_context(|| format!("invalid audit entry id: {cursor}"))?;
        query = query.older_than(id);
    }
    Ok(query)
}

fn resolved_by(entry: &AuditEntry) -> String {
    let text = format!("{:<15}", entry.resolved_by.to_string());
    match entry.resolved_by {
        ResolvedBy::Policy => text.dimmed().to_string(),
        ResolvedBy::User => text.cyan().to_string(),
        ResolvedBy::Timeout | ResolvedBy::ConnectionLost => text.yellow().to_string(),
    }
}

/// Show the newest audit entries.
pub(crate) fn show_audit_entries(
    cfg: &Config,
    paths: &RuntimePaths,
    args: &AuditArgs,
) -> Result<()> {
    let query = audit_query(args)?;
    let log = AuditLog::open(&paths.audit_log, cfg.audit.max_file_bytes)
        .with_context(|| format!("failed to open audit log {}", paths.audit_log.display()))?;
    let entries = log.query(&query)?;

    if entries.is_empty() {
        println!("{}", Theme::info("No audit entries"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Audit Entries"));
    println!(
        "{:<19} {:<5} {:<15} {:<8} {:<16} {}",
        "TIMESTAMP".dimmed(),
        "ACT".dimmed(),
        "BY".dimmed(),
        "RISK".dimmed(),
        "SESSION".dimmed(),
        "CALL".dimmed()
    );
    println!("{}", Theme::separator());

    for entry in &entries {
        println!(
            "{} {} {} {} {:<16} {}",
            Theme::timestamp(&entry.timestamp),
            Theme::decision(entry.decision),
            resolved_by(entry),
            Theme::risk(entry.risk),
            entry.session_id.as_str(),
            entry.display_summary
        );
        let mut detail = vec![format!("layer={}", entry.layer)];
        if let Some(rule) = &entry.rule_id {
            detail.push(format!("rule={rule}"));
        }
        if let Some(rule) = &entry.learned_rule_id {
            detail.push(format!("learned={rule}"));
        }
        if let Some(reason) = &entry.reason {
            detail.push(reason.clone());
        }
        println!("{:<19} {}", "", Theme::dimmed(&detail.join("  ")));
    }

    if entries.len() >= args.limit
        && let Some(last) = entries.last()
    {
        println!(
            "\n{}",
            Theme::dimmed(&format!("Older entries: warden audit --older-than {}", last.id))
        );
    }
    println!();
    Ok(())
}
