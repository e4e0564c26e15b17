//! One-line display summaries for approval prompts and the audit log.

use serde_json::Value;
use warden_core::{RiskLevel, truncate_to_boundary};

use crate::request::{FileAccess, GateRequest, ToolInput};

/// Longest summary shown, in bytes, before the ellipsis.
const MAX_SUMMARY_BYTES: usize = 200;

/// Summarize a request and give its baseline risk.
///
/// Heuristic hits raise the risk later; this only looks at the tool shape.
///
/// | input | summary | risk |
/// |---|---|---|
/// | bash | `$ <command>` | medium |
/// | read | `Read: <path>` | low |
/// | write / edit | `Write: <path>` / `Edit: <path>` | medium |
/// | anything with a `url` | `Navigate: <host>` | low |
/// | other | `<tool>(<args>)` | medium |
#[must_use]
pub fn summarize(request: &GateRequest) -> (String, RiskLevel) {
    match request.view() {
        ToolInput::Bash { command } => (clip(&format!("$ {}", command.trim())), RiskLevel::Medium),
        ToolInput::File { access, path } => {
            let risk = match access {
                FileAccess::Read => RiskLevel::Low,
                FileAccess::Write | FileAccess::Edit => RiskLevel::Medium,
            };
            (clip(&format!("{access}: {path}")), risk)
        },
        ToolInput::Other { .. } => {
            if let Some(url) = request.str_field("url") {
                return (clip(&format!("Navigate: {}", host_of(url))), RiskLevel::Low);
            }
            (
                clip(&format!("{}({})", request.tool, compact_args(&request.input))),
                RiskLevel::Medium,
            )
        },
    }
}

fn host_of(raw: &str) -> String {
    url::Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| raw.trim().to_owned())
}

fn compact_args(input: &Value) -> String {
    match input {
        Value::Object(map) if map.is_empty() => String::new(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn clip(s: &str) -> String {
    let line = s.lines().next().unwrap_or_default();
    let multiline = line.len() < s.len();
    let cut = truncate_to_boundary(line, MAX_SUMMARY_BYTES);
    if multiline || cut.len() < line.len() {
        format!("{cut}...")
    } else {
        cut.to_owned()
    }
}
