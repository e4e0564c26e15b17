//! Structural detectors over command text and file paths.
//!
//! Detectors are pure functions of their input plus a [`PathContext`]; the
//! only filesystem access is the best-effort symlink probe used by the
//! secret-path checks. They run in a fixed order and the first triggered,
//! non-disabled detector decides.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use warden_core::{Decision, RiskLevel};

use crate::command::{
    analysis_units, basename, parse_executable, shell_words, split_command_list,
    split_pipeline_stages,
};
use crate::paths::{NormalizedPath, PathContext};
use crate::request::ToolInput;

/// Shell interpreters that must not receive piped input.
const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

/// Tools that send data over the network.
const TRANSFER_TOOLS: &[&str] = &["curl", "wget", "nc", "ncat", "netcat", "http", "https", "xh"];

/// Flags that attach a request payload. A trailing `*` is a prefix match.
const PAYLOAD_FLAGS: &[&str] = &[
    "-d",
    "--data*",
    "-F",
    "--form",
    "-T",
    "--upload-file",
    "--json",
    "--post-data",
    "--post-file",
    "--body-data",
    "--body-file",
];

/// Short payload flags that may carry their value attached (`-d@file`).
const ATTACHED_SHORT_FLAGS: &[&str] = &["-d", "-F", "-T"];

/// Env var name suffixes that indicate a credential.
const SECRET_ENV_SUFFIXES: &[&str] = &["_KEY", "_TOKEN", "_SECRET", "_PASSWORD"];

/// Credential directories, relative to the home directory.
const SECRET_HOME_DIRS: &[&str] = &[
    ".ssh",
    ".aws",
    ".docker",
    ".kube",
    ".azure",
    ".config/gh",
    ".config/gcloud",
];

/// Credential file names, wherever they live.
const SECRET_FILE_NAMES: &[&str] = &[".npmrc", ".netrc", ".pypirc"];

static ENV_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").ok());

/// Outcome of one detector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// Whether the detector fired.
    pub matched: bool,
    /// Human-readable explanation when it fired.
    pub reason: Option<String>,
}

impl Detection {
    fn hit(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: Some(reason.into()),
        }
    }

    fn miss() -> Self {
        Self::default()
    }
}

/// The detectors, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    /// Reads of credential files or directories.
    SecretFileRead,
    /// Credential-looking env vars expanded into a URL.
    SecretEnvInUrl,
    /// Output piped into a shell interpreter.
    PipeToShell,
    /// Outbound transfer carrying a payload.
    DataEgress,
}

impl HeuristicKind {
    /// All detectors in the order they run.
    pub const ORDER: [Self; 4] = [
        Self::SecretFileRead,
        Self::SecretEnvInUrl,
        Self::PipeToShell,
        Self::DataEgress,
    ];

    /// Wire and config name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SecretFileRead => "secret_file_read",
            Self::SecretEnvInUrl => "secret_env_in_url",
            Self::PipeToShell => "pipe_to_shell",
            Self::DataEgress => "data_egress",
        }
    }

    /// Risk shown when this detector fires.
    #[must_use]
    pub fn risk(self) -> RiskLevel {
        match self {
            Self::PipeToShell => RiskLevel::High,
            Self::SecretFileRead | Self::SecretEnvInUrl | Self::DataEgress => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for HeuristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a triggered detector does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeuristicMode {
    /// Allow the call.
    Allow,
    /// Ask a human.
    Ask,
    /// Deny the call.
    Block,
    /// Skip the detector.
    Disabled,
}

impl HeuristicMode {
    /// The decision this mode produces, or `None` when disabled.
    #[must_use]
    pub fn decision(self) -> Option<Decision> {
        match self {
            Self::Allow => Some(Decision::Allow),
            Self::Ask => Some(Decision::Ask),
            Self::Block => Some(Decision::Deny),
            Self::Disabled => None,
        }
    }
}

/// Mode of each detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicSettings {
    /// Mode for [`HeuristicKind::SecretFileRead`].
    pub secret_file_read: HeuristicMode,
    /// Mode for [`HeuristicKind::SecretEnvInUrl`].
    pub secret_env_in_url: HeuristicMode,
    /// Mode for [`HeuristicKind::PipeToShell`].
    pub pipe_to_shell: HeuristicMode,
    /// Mode for [`HeuristicKind::DataEgress`].
    pub data_egress: HeuristicMode,
}

impl Default for HeuristicSettings {
    fn default() -> Self {
        Self {
            secret_file_read: HeuristicMode::Block,
            secret_env_in_url: HeuristicMode::Block,
            pipe_to_shell: HeuristicMode::Ask,
            data_egress: HeuristicMode::Ask,
        }
    }
}

impl HeuristicSettings {
    /// Mode configured for a detector.
    #[must_use]
    pub fn mode(&self, kind: HeuristicKind) -> HeuristicMode {
        match kind {
            HeuristicKind::SecretFileRead => self.secret_file_read,
            HeuristicKind::SecretEnvInUrl => self.secret_env_in_url,
            HeuristicKind::PipeToShell => self.pipe_to_shell,
            HeuristicKind::DataEgress => self.data_egress,
        }
    }
}

/// The first detector that fired with a non-disabled mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicHit {
    /// Which detector fired.
    pub kind: HeuristicKind,
    /// Its configured mode.
    pub mode: HeuristicMode,
    /// Explanation.
    pub reason: String,
}

/// Run the detectors for a tool input in order.
///
/// Bash commands go through all four detectors, file tools only through the
/// secret-path check; other tools are never flagged.
#[must_use]
pub fn run_heuristics(
    input: &ToolInput,
    ctx: &PathContext,
    settings: &HeuristicSettings,
) -> Option<HeuristicHit> {
    HeuristicKind::ORDER.into_iter().find_map(|kind| {
        let mode = settings.mode(kind);
        if mode == HeuristicMode::Disabled {
            return None;
        }
        let detection = detect(kind, input, ctx);
        if !detection.matched {
            return None;
        }
        Some(HeuristicHit {
            kind,
            mode,
            reason: detection.reason.unwrap_or_else(|| kind.name().to_owned()),
        })
    })
}

fn detect(kind: HeuristicKind, input: &ToolInput, ctx: &PathContext) -> Detection {
    match (kind, input) {
        (HeuristicKind::SecretFileRead, ToolInput::Bash { command }) => {
            has_secret_file_reference(command, ctx)
        },
        (HeuristicKind::SecretFileRead, ToolInput::File { path, .. }) => {
            is_secret_file_read(path, ctx)
        },
        (HeuristicKind::SecretEnvInUrl, ToolInput::Bash { command }) => {
            has_secret_env_expansion_in_url(command)
        },
        (HeuristicKind::PipeToShell, ToolInput::Bash { command }) => is_pipe_to_shell(command),
        (HeuristicKind::DataEgress, ToolInput::Bash { command }) => is_data_egress(command),
        _ => Detection::miss(),
    }
}

/// Output of an earlier pipeline stage piped into a shell interpreter.
#[must_use]
pub fn is_pipe_to_shell(command: &str) -> Detection {
    for unit in analysis_units(command) {
        for stage in split_pipeline_stages(&unit).iter().skip(1) {
            let Some(exe) = split_command_list(stage)
                .first()
                .and_then(|c| parse_executable(c))
            else {
                continue;
            };
            let name = basename(&exe);
            if SHELLS.contains(&name) {
                return Detection::hit(format!("output is piped into the `{name}` interpreter"));
            }
        }
    }
    Detection::miss()
}

/// An outbound transfer tool that carries a payload or reads piped stdin.
#[must_use]
pub fn is_data_egress(command: &str) -> Detection {
    for unit in analysis_units(command) {
        for (stage_idx, stage) in split_pipeline_stages(&unit).iter().enumerate() {
            for (cmd_idx, simple) in split_command_list(stage).iter().enumerate() {
                let Some(exe) = parse_executable(simple) else {
                    continue;
                };
                let name = basename(&exe);
                if !TRANSFER_TOOLS.contains(&name) {
                    continue;
                }
                if let Some(flag) = shell_words(simple).iter().find(|w| is_payload_flag(w)) {
                    return Detection::hit(format!(
                        "`{name}` sends a request payload ({flag})"
                    ));
                }
                if stage_idx > 0 && cmd_idx == 0 {
                    return Detection::hit(format!("`{name}` receives piped input"));
                }
            }
        }
    }
    Detection::miss()
}

fn is_payload_flag(word: &str) -> bool {
    let (flag, _) = word.split_once('=').unwrap_or((word, ""));
    PAYLOAD_FLAGS.iter().any(|p| match p.strip_suffix('*') {
        Some(prefix) => flag.starts_with(prefix),
        None => flag == *p,
    }) || ATTACHED_SHORT_FLAGS
        .iter()
        .any(|p| word.starts_with(p) && word.len() > p.len() && !word.starts_with("--"))
}

/// A URL-bearing word that expands a credential-looking env var.
#[must_use]
pub fn has_secret_env_expansion_in_url(command: &str) -> Detection {
    let Some(re) = ENV_REFERENCE.as_ref() else {
        return Detection::miss();
    };
    for unit in analysis_units(command) {
        for word in shell_words(&unit) {
            if !word.contains("://") {
                continue;
            }
            for capture in re.captures_iter(&word) {
                let Some(name) = capture.get(1).map(|m| m.as_str()) else {
                    continue;
                };
                let upper = name.to_ascii_uppercase();
                if SECRET_ENV_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
                    return Detection::hit(format!("URL expands the secret variable ${name}"));
                }
            }
        }
    }
    Detection::miss()
}

/// A command that references a credential file anywhere in its words.
#[must_use]
pub fn has_secret_file_reference(command: &str, ctx: &PathContext) -> Detection {
    for unit in analysis_units(command) {
        for word in shell_words(&unit) {
            let Some(candidate) = unwrap_path_word(&word) else {
                continue;
            };
            if let Some(reason) = secret_path_reason(candidate, ctx) {
                return Detection::hit(reason);
            }
        }
    }
    Detection::miss()
}

/// A file tool whose path is a credential file.
#[must_use]
pub fn is_secret_file_read(path: &str, ctx: &PathContext) -> Detection {
    match secret_path_reason(path, ctx) {
        Some(reason) => Detection::hit(reason),
        None => Detection::miss(),
    }
}

/// Strip `@file`, `<file`, `>file` and `--opt=file` wrappers from a word.
fn unwrap_path_word(word: &str) -> Option<&str> {
    if word.contains("://") {
        return None;
    }
    let mut w = word;
    if w.starts_with('-')
        && let Some((_, value)) = w.split_once('=')
    {
        w = value;
    }
    let w = w.trim_start_matches(|c: char| c.is_ascii_digit() && w.contains('>'));
    let w = w.trim_start_matches(['@', '<', '>', '&']);
    (!w.is_empty()).then_some(w)
}

fn secret_path_reason(raw: &str, ctx: &PathContext) -> Option<String> {
    let normalized = NormalizedPath::new(raw, ctx)?;
    [&normalized.lexical, &normalized.resolved]
        .into_iter()
        .find_map(|p| secret_match(p, ctx))
        .map(|what| format!("references credential location {what}"))
}

fn secret_match(path: &Path, ctx: &PathContext) -> Option<String> {
    for home in ctx.home_dirs() {
        for dir in SECRET_HOME_DIRS {
            if path.starts_with(home.join(dir)) {
                return Some(format!("~/{dir}"));
            }
        }
    }
    let name = path.file_name()?.to_str()?;
    if SECRET_FILE_NAMES.contains(&name) || name.starts_with(".env") {
        return Some(name.to_owned());
    }
    None
}
