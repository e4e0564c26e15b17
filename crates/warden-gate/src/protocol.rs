//! Wire protocol: newline-delimited JSON objects tagged by `type`.
//!
//! Agent adapter → gate: `hello`, `gate_check`, `heartbeat`, `session_end`.
//! Gate → adapter: `hello_ack`, `gate_result`, `heartbeat_ack`, `error`.
//!
//! Supervisor → gate: `resolve`. Gate → supervisor: `approval_requested`,
//! `approval_resolved`, `resolve_ack`, `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_core::{Decision, SessionId, ToolCallId, WorkspaceId};
use warden_policy::ApprovalScope;

use crate::approval::{ApprovalEvent, ApprovalRequest, ApprovalResolved};

/// Version advertised in `hello_ack`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent by the agent adapter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the session; must be the first message.
    Hello {
        /// Session the connection speaks for.
        session_id: SessionId,
        /// Workspace of the session.
        #[serde(default)]
        workspace_id: Option<WorkspaceId>,
        /// Free-form adapter name.
        #[serde(default)]
        agent: Option<String>,
    },
    /// A tool call waiting for a decision.
    GateCheck {
        /// Correlation id.
        tool_call_id: ToolCallId,
        /// Tool name.
        tool: String,
        /// Tool input object.
        input: Value,
    },
    /// Liveness ping.
    Heartbeat {
        /// Echoed back in the ack.
        #[serde(default)]
        seq: Option<u64>,
    },
    /// The session is over.
    SessionEnd,
}

/// Messages sent to the agent adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    HelloAck {
        /// Echo of the session id.
        session_id: SessionId,
        /// How often the adapter should send heartbeats.
        heartbeat_interval_ms: u64,
        /// Protocol version.
        protocol_version: u32,
    },
    /// Final decision for a `gate_check`.
    GateResult {
        /// Correlation id.
        tool_call_id: ToolCallId,
        /// `allow` or `deny`.
        action: Decision,
        /// Explanation, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Reply to a heartbeat.
    HeartbeatAck {
        /// Echo of the heartbeat's sequence number.
        seq: Option<u64>,
    },
    /// A message was rejected; the connection stays open.
    Error {
        /// What went wrong.
        message: String,
        /// The call the error refers to, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<ToolCallId>,
    },
}

impl ServerMessage {
    /// An `error` reply.
    #[must_use]
    pub fn error(message: impl Into<String>, tool_call_id: Option<ToolCallId>) -> Self {
        Self::Error {
            message: message.into(),
            tool_call_id,
        }
    }
}

/// A line that could not be turned into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// What went wrong.
    pub message: String,
    /// The `tool_call_id` field of the line, if it had one.
    pub tool_call_id: Option<ToolCallId>,
}

impl DecodeError {
    /// The `error` reply for this failure.
    #[must_use]
    pub fn into_reply(self) -> ServerMessage {
        ServerMessage::error(self.message, self.tool_call_id)
    }
}

/// Decode one adapter line.
///
/// # Errors
///
/// Returns a [`DecodeError`] for invalid JSON, unknown message types,
/// missing fields, blank ids, or a non-object `input`.
pub fn decode_client(line: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(line).map_err(|e| DecodeError {
        message: format!("invalid JSON: {e}"),
        tool_call_id: None,
    })?;
    let tool_call_id = value
        .get("tool_call_id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ToolCallId::from);
    let fail = |message: String| DecodeError {
        message,
        tool_call_id: tool_call_id.clone(),
    };

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|e| fail(format!("invalid message: {e}")))?;
    match &message {
        ClientMessage::Hello { session_id, .. } if session_id.is_empty() => {
            Err(fail("session_id must not be empty".to_owned()))
        },
        ClientMessage::GateCheck { tool_call_id, .. } if tool_call_id.is_empty() => {
            Err(fail("tool_call_id must not be empty".to_owned()))
        },
        ClientMessage::GateCheck { tool, .. } if tool.trim().is_empty() => {
            Err(fail("tool must not be empty".to_owned()))
        },
        ClientMessage::GateCheck { input, .. } if !input.is_object() => {
            Err(fail("input must be a JSON object".to_owned()))
        },
        _ => Ok(message),
    }
}

/// Commands sent by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorCommand {
    /// Answer a pending approval.
    Resolve {
        /// The pending call.
        tool_call_id: ToolCallId,
        /// `allow` or `deny`.
        action: Decision,
        /// How far to remember an allow; unknown values mean `once`.
        #[serde(default)]
        scope: ApprovalScope,
    },
}

/// Messages sent to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// A call is waiting for a human.
    ApprovalRequested(ApprovalRequest),
    /// A pending call was settled.
    ApprovalResolved(ApprovalResolved),
    /// Whether a `resolve` reached a pending call.
    ResolveAck {
        /// The call named by the command.
        tool_call_id: ToolCallId,
        /// `false` when the call was unknown or already settled.
        accepted: bool,
    },
    /// A command was rejected.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl From<ApprovalEvent> for SupervisorMessage {
    fn from(event: ApprovalEvent) -> Self {
        match event {
            ApprovalEvent::Requested(request) => Self::ApprovalRequested(request),
            ApprovalEvent::Resolved(resolved) => Self::ApprovalResolved(resolved),
        }
    }
}

/// Decode one supervisor line.
///
/// # Errors
///
/// Returns a description of the problem for invalid JSON, unknown commands,
/// or an `ask` action.
pub fn decode_supervisor(line: &str) -> Result<SupervisorCommand, String> {
    let command: SupervisorCommand =
        serde_json::from_str(line).map_err(|e| format!("invalid command: {e}"))?;
    match &command {
        SupervisorCommand::Resolve { action, .. } if *action == Decision::Ask => {
            Err("action must be allow or deny".to_owned())
        },
        _ => Ok(command),
    }
}
