//! The request shape evaluated by the gate.
//!
//! A [`GateRequest`] carries the tool input as an opaque JSON value so that
//! unknown extension tools pass through untouched. The analyzer works on the
//! typed [`ToolInput`] view derived from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use warden_core::{SessionId, ToolCallId, WorkspaceId};

/// Tool name used for shell commands.
pub const BASH_TOOL: &str = "bash";

/// One tool call awaiting a decision. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRequest {
    /// Tool name (`bash`, `read`, `write`, `edit`, or an extension tool).
    pub tool: String,
    /// Tool input as sent by the agent.
    pub input: Value,
    /// Session the call belongs to.
    pub session_id: SessionId,
    /// Workspace the session operates in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    /// Correlation id, unique per request.
    pub tool_call_id: ToolCallId,
}

impl GateRequest {
    /// Create a request.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        input: Value,
        session_id: SessionId,
        workspace_id: Option<WorkspaceId>,
        tool_call_id: ToolCallId,
    ) -> Self {
        Self {
            tool: tool.into(),
            input,
            session_id,
            workspace_id,
            tool_call_id,
        }
    }

    /// Typed view of the input used by the analyzer.
    #[must_use]
    pub fn view(&self) -> ToolInput {
        ToolInput::from_parts(&self.tool, &self.input)
    }

    /// The optional working directory that anchors relative paths.
    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.str_field("cwd")
    }

    /// A string field of the input, if present.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

/// How a file tool touches its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAccess {
    /// `read`
    Read,
    /// `write`
    Write,
    /// `edit`
    Edit,
}

impl FileAccess {
    /// Map a tool name to a file access kind.
    #[must_use]
    pub fn from_tool(tool: &str) -> Option<Self> {
        match tool {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }

    /// Label used in display summaries.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Edit => "Edit",
        }
    }
}

impl fmt::Display for FileAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Typed view over a tool input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInput {
    /// A shell command. Empty when the input carries no `command`.
    Bash {
        /// Raw command text.
        command: String,
    },
    /// A file tool with a path.
    File {
        /// Kind of access.
        access: FileAccess,
        /// Path exactly as the agent sent it.
        path: String,
    },
    /// Anything else. `subject` is the first of `url`, `path`, `file_path`,
    /// `pattern`, `query` present as a string.
    Other {
        /// Text that rule patterns match against.
        subject: Option<String>,
    },
}

impl ToolInput {
    /// Build the view from a tool name and its raw input.
    #[must_use]
    pub fn from_parts(tool: &str, input: &Value) -> Self {
        let field = |key: &str| input.get(key).and_then(Value::as_str);

        if tool == BASH_TOOL {
            return Self::Bash {
                command: field("command").unwrap_or_default().to_owned(),
            };
        }

        if let Some(access) = FileAccess::from_tool(tool)
            && let Some(path) = field("path").or_else(|| field("file_path"))
        {
            return Self::File {
                access,
                path: path.to_owned(),
            };
        }

        let subject = ["url", "path", "file_path", "pattern", "query"]
            .iter()
            .find_map(|k| field(k))
            .map(str::to_owned);
        Self::Other { subject }
    }

    /// Whether this is a shell command.
    #[must_use]
    pub fn is_bash(&self) -> bool {
        matches!(self, Self::Bash { .. })
    }
}
