//! One adapter connection.
//!
//! A reader loop owns the framed input and the connection state. Replies go
//! through an mpsc channel to a writer task. Every `gate_check` runs in its
//! own task so a pending approval never blocks other calls or heartbeats.

use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_core::{SessionId, ToolCallId, WorkspaceId};
use warden_policy::GateRequest;

use crate::error::GateResult;
use crate::frame::{Frame, FrameCodec};
use crate::protocol::{ClientMessage, PROTOCOL_VERSION, ServerMessage, decode_client};
use crate::service::GateService;

/// Replies buffered per connection before the reader waits on the writer.
const OUTBOUND_BUFFER: usize = 64;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    AwaitingHandshake,
    Ready,
    Closed,
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Eof,
    HandshakeTimeout,
    HeartbeatExpired,
    SessionEnd,
    Shutdown,
}

/// Serve one adapter connection until it closes.
///
/// Teardown always runs on the way out: pending approvals of the session
/// resolve as connection loss and its session rules are dropped.
///
/// # Errors
///
/// Returns an error when reading from the stream fails. The session is torn
/// down first.
pub async fn serve_connection<S>(
    stream: S,
    service: Arc<GateService>,
    shutdown: CancellationToken,
) -> GateResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let settings = *service.settings();
    let (reader, writer) = tokio::io::split(stream);
    let mut frames = FramedRead::new(reader, FrameCodec::new(settings.max_message_bytes));

    let (out, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(write_loop(
        FramedWrite::new(writer, FrameCodec::new(usize::MAX)),
        out_rx,
    ));

    let mut conn = Connection {
        service,
        out,
        state: ConnectionState::Connecting,
        session: None,
        in_flight: HashSet::new(),
        tasks: JoinSet::new(),
        closed: CancellationToken::new(),
    };
    conn.transition(ConnectionState::AwaitingHandshake);

    let result = conn.run(&mut frames, &shutdown).await;
    conn.close().await;
    drop(conn);
    if let Err(e) = writer_task.await {
        warn!(error = %e, "gate writer task failed");
    }
    result
}

struct Connection {
    service: Arc<GateService>,
    out: mpsc::Sender<ServerMessage>,
    state: ConnectionState,
    session: Option<(SessionId, Option<WorkspaceId>)>,
    in_flight: HashSet<ToolCallId>,
    tasks: JoinSet<ToolCallId>,
    closed: CancellationToken,
}

impl Connection {
    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, session_id = ?self.session_id(), "gate connection state");
        self.state = next;
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|(id, _)| id.as_str())
    }

    async fn reply(&self, message: ServerMessage) {
        if self.out.send(message).await.is_err() {
            debug!("gate writer closed, dropping reply");
        }
    }

    async fn run<R>(
        &mut self,
        frames: &mut FramedRead<R, FrameCodec>,
        shutdown: &CancellationToken,
    ) -> GateResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let reason = match self.handshake(frames, shutdown).await? {
            Some(reason) => reason,
            None => self.ready_loop(frames, shutdown).await?,
        };
        info!(session_id = ?self.session_id(), reason = ?reason, "gate connection closing");
        Ok(())
    }

    /// Wait for `hello`. Returns a close reason if the connection ends first.
    async fn handshake<R>(
        &mut self,
        frames: &mut FramedRead<R, FrameCodec>,
        shutdown: &CancellationToken,
    ) -> GateResult<Option<CloseReason>>
    where
        R: AsyncRead + Unpin,
    {
        let timeout = self.service.settings().handshake_timeout;
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            let frame = tokio::select! {
                () = tokio::time::sleep(remaining) => return Ok(Some(CloseReason::HandshakeTimeout)),
                () = shutdown.cancelled() => return Ok(Some(CloseReason::Shutdown)),
                frame = frames.next() => frame,
            };
            let line = match frame {
                None => return Ok(Some(CloseReason::Eof)),
                Some(frame) => match self.line(frame?).await {
                    Some(line) => line,
                    None => continue,
                },
            };
            match decode_client(&line) {
                Ok(ClientMessage::Hello {
                    session_id,
                    workspace_id,
                    agent,
                }) => {
                    info!(
                        session_id = %session_id,
                        workspace_id = ?workspace_id.as_ref().map(WorkspaceId::as_str),
                        agent = ?agent,
                        "gate session started"
                    );
                    let settings = self.service.settings();
                    let ack = ServerMessage::HelloAck {
                        session_id: session_id.clone(),
                        heartbeat_interval_ms: u64::try_from(
                            settings.heartbeat_interval.as_millis(),
                        )
                        .unwrap_or(u64::MAX),
                        protocol_version: PROTOCOL_VERSION,
                    };
                    self.session = Some((session_id, workspace_id));
                    self.transition(ConnectionState::Ready);
                    self.reply(ack).await;
                    return Ok(None);
                },
                Ok(_) => {
                    self.reply(ServerMessage::error("expected hello", None))
                        .await;
                },
                Err(e) => self.reply(e.into_reply()).await,
            }
        }
    }

    async fn ready_loop<R>(
        &mut self,
        frames: &mut FramedRead<R, FrameCodec>,
        shutdown: &CancellationToken,
    ) -> GateResult<CloseReason>
    where
        R: AsyncRead + Unpin,
    {
        let grace = self.service.settings().heartbeat_grace;
        let mut last_seen = Instant::now();
        loop {
            let remaining = grace.saturating_sub(last_seen.elapsed());
            tokio::select! {
                () = tokio::time::sleep(remaining) => {
                    warn!(session_id = ?self.session_id(), "heartbeat grace expired");
                    return Ok(CloseReason::HeartbeatExpired);
                },
                () = shutdown.cancelled() => return Ok(CloseReason::Shutdown),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.check_finished(joined);
                },
                frame = frames.next() => {
                    last_seen = Instant::now();
                    let Some(frame) = frame else {
                        return Ok(CloseReason::Eof);
                    };
                    let Some(line) = self.line(frame?).await else {
                        continue;
                    };
                    if let Some(reason) = self.handle(&line).await {
                        return Ok(reason);
                    }
                },
            }
        }
    }

    /// Turn a frame into a line, replying with an error for bad frames.
    /// Blank lines are skipped.
    async fn line(&self, frame: Frame) -> Option<String> {
        match frame {
            Frame::Line(line) if line.trim().is_empty() => None,
            Frame::Line(line) => Some(line),
            Frame::Oversize => {
                warn!(session_id = ?self.session_id(), "oversize message dropped");
                self.reply(ServerMessage::error("message exceeds max_message_bytes", None))
                    .await;
                None
            },
            Frame::NotUtf8 => {
                self.reply(ServerMessage::error("message is not valid UTF-8", None))
                    .await;
                None
            },
        }
    }

    async fn handle(&mut self, line: &str) -> Option<CloseReason> {
        let message = match decode_client(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = ?self.session_id(), error = %e.message, "malformed message");
                self.reply(e.into_reply()).await;
                return None;
            },
        };

        match message {
            ClientMessage::Hello { .. } => {
                self.reply(ServerMessage::error("session already started", None))
                    .await;
            },
            ClientMessage::Heartbeat { seq } => {
                self.reply(ServerMessage::HeartbeatAck { seq }).await;
            },
            ClientMessage::SessionEnd => return Some(CloseReason::SessionEnd),
            ClientMessage::GateCheck {
                tool_call_id,
                tool,
                input,
            } => self.start_check(tool_call_id, tool, input).await,
        }
        None
    }

    async fn start_check(
        &mut self,
        tool_call_id: ToolCallId,
        tool: String,
        input: serde_json::Value,
    ) {
        let Some((session_id, workspace_id)) = self.session.clone() else {
            return;
        };
        if !self.in_flight.insert(tool_call_id.clone()) {
            self.reply(ServerMessage::error(
                "tool_call_id is already in flight",
                Some(tool_call_id),
            ))
            .await;
            return;
        }

        let request = GateRequest::new(tool, input, session_id, workspace_id, tool_call_id);
        let service = Arc::clone(&self.service);
        let out = self.out.clone();
        let closed = self.closed.clone();
        self.tasks.spawn(async move {
            let outcome = service.check_until_closed(request, &closed).await;
            if out.send(outcome.to_message()).await.is_err() {
                debug!(tool_call_id = %outcome.tool_call_id, "connection gone before result");
            }
            outcome.tool_call_id
        });
    }

    fn check_finished(&mut self, joined: Result<ToolCallId, tokio::task::JoinError>) {
        match joined {
            Ok(id) => {
                self.in_flight.remove(&id);
            },
            Err(e) => error!(session_id = ?self.session_id(), error = %e, "gate check task failed"),
        }
    }

    /// Resolve pending calls as connection loss, let their tasks record the
    /// outcome, then drop the session's rules.
    async fn close(&mut self) {
        self.closed.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            self.check_finished(joined);
        }
        if let Some((session_id, _)) = &self.session {
            self.service.teardown_session(session_id);
        }
        self.transition(ConnectionState::Closed);
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<ServerMessage>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode gate reply");
                continue;
            },
        };
        if let Err(e) = sink.send(line).await {
            debug!(error = %e, "gate connection write failed");
            break;
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
