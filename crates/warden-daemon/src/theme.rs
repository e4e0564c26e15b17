//! CLI theme and styling.

use colored::Colorize;
use warden_core::{Decision, RiskLevel, Timestamp};

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(72).dimmed().to_string()
    }

    /// Color a decision.
    pub(crate) fn decision(decision: Decision) -> String {
        let text = format!("{:<5}", decision.as_str());
        match decision {
            Decision::Allow => text.green().to_string(),
            Decision::Ask => text.yellow().to_string(),
            Decision::Deny => text.red().bold().to_string(),
        }
    }

    /// Color a risk level.
    pub(crate) fn risk(risk: RiskLevel) -> String {
        let text = format!("{:<8}", risk.to_string());
        match risk {
            RiskLevel::Low => text.dimmed().to_string(),
            RiskLevel::Medium => text.yellow().to_string(),
            RiskLevel::High => text.red().to_string(),
            RiskLevel::Critical => text.red().bold().to_string(),
        }
    }

    /// Format a timestamp in local time.
    pub(crate) fn timestamp(ts: &Timestamp) -> String {
        let local = ts.0.with_timezone(&chrono::Local);
        format!("{}", local.format("%Y-%m-%d %H:%M:%S").to_string().dimmed())
    }
}
