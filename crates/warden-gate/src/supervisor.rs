//! The supervisor channel: where a human sees and answers approvals.
//!
//! On connect the supervisor receives every call still waiting, then a live
//! stream of `approval_requested` / `approval_resolved` events. It answers
//! with `resolve` lines; each gets a `resolve_ack`.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::ApprovalEvent;
use crate::error::GateResult;
use crate::frame::{Frame, FrameCodec};
use crate::protocol::{SupervisorCommand, SupervisorMessage, decode_supervisor};
use crate::service::GateService;

/// Serve one supervisor until it disconnects or `shutdown` fires.
///
/// `events` should be subscribed before this is called so that nothing
/// published after the snapshot is missed.
///
/// # Errors
///
/// Returns an error when the stream fails.
pub async fn supervise_connection<S>(
    stream: S,
    service: Arc<GateService>,
    mut events: broadcast::Receiver<ApprovalEvent>,
    shutdown: CancellationToken,
) -> GateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(
        stream,
        FrameCodec::new(service.settings().max_message_bytes),
    );

    let snapshot = service.pending_snapshot();
    info!(pending = snapshot.len(), "supervisor connected");
    for request in snapshot {
        send(&mut framed, &SupervisorMessage::ApprovalRequested(request)).await?;
    }

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => SupervisorMessage::from(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "supervisor fell behind approval events");
                    SupervisorMessage::Error {
                        message: format!("missed {missed} events; reconnect for a fresh snapshot"),
                    }
                },
                Err(RecvError::Closed) => break,
            },
            frame = framed.next() => match frame {
                None => break,
                Some(frame) => match frame? {
                    Frame::Line(line) if line.trim().is_empty() => continue,
                    Frame::Line(line) => handle_command(&service, &line),
                    Frame::Oversize => SupervisorMessage::Error {
                        message: "message exceeds max_message_bytes".to_owned(),
                    },
                    Frame::NotUtf8 => SupervisorMessage::Error {
                        message: "message is not valid UTF-8".to_owned(),
                    },
                },
            },
        };
        send(&mut framed, &message).await?;
    }

    info!("supervisor disconnected");
    Ok(())
}

fn handle_command(service: &GateService, line: &str) -> SupervisorMessage {
    match decode_supervisor(line) {
        Ok(SupervisorCommand::Resolve {
            tool_call_id,
            action,
            scope,
        }) => {
            let accepted = service.resolve(&tool_call_id, action, scope);
            SupervisorMessage::ResolveAck {
                tool_call_id,
                accepted,
            }
        },
        Err(message) => {
            debug!(error = %message, "rejected supervisor command");
            SupervisorMessage::Error { message }
        },
    }
}

async fn send<S>(
    framed: &mut Framed<S, FrameCodec>,
    message: &SupervisorMessage,
) -> GateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serde_json::to_string(message) {
        Ok(line) => framed.send(line).await?,
        Err(e) => warn!(error = %e, "failed to encode supervisor message"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::BroadcastApprovalChannel;
    use crate::service::GateSettings;
    use serde_json::{Value, json};
    use tokio::io::DuplexStream;
    use tokio_util::codec::LinesCodec;
    use warden_audit::{AuditLog, ResolvedBy};
    use warden_core::{Decision, SessionId, ToolCallId, WorkspaceId};
    use warden_policy::{EvaluatorConfig, GateRequest, PolicyEvaluator, RuleStore};

    fn service() -> (Arc<GateService>, BroadcastApprovalChannel) {
        let rules = Arc::new(RuleStore::in_memory());
        let evaluator = PolicyEvaluator::new(EvaluatorConfig::new(Decision::Ask), rules);
        let channel = BroadcastApprovalChannel::default();
        let service = GateService::new(
            evaluator,
            Arc::new(AuditLog::in_memory()),
            Arc::new(channel.clone()),
            GateSettings::default(),
        );
        (Arc::new(service), channel)
    }

    fn request(id: &str) -> GateRequest {
        GateRequest::new(
            "bash",
            json!({ "command": "make" }),
            SessionId::new("s1"),
            Some(WorkspaceId::new("ws")),
            ToolCallId::new(id),
        )
    }

    async fn recv(client: &mut Framed<DuplexStream, LinesCodec>) -> Value {
        let line = client.next().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn connect(
        service: &Arc<GateService>,
        channel: &BroadcastApprovalChannel,
        shutdown: &CancellationToken,
    ) -> Framed<DuplexStream, LinesCodec> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(supervise_connection(
            server,
            Arc::clone(service),
            channel.subscribe(),
            shutdown.clone(),
        ));
        Framed::new(client, LinesCodec::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_then_live_events() {
        let (service, channel) = service();
        let shutdown = CancellationToken::new();
        let mut probe = channel.subscribe();

        let svc = Arc::clone(&service);
        let first = tokio::spawn(async move { svc.check(request("c1")).await });
        probe.recv().await.unwrap();

        let mut client = connect(&service, &channel, &shutdown);
        let snap = recv(&mut client).await;
        assert_eq!(snap["type"], "approval_requested");
        assert_eq!(snap["tool_call_id"], "c1");
        assert_eq!(snap["display_summary"], "$ make");
        assert_eq!(
            snap["remember_options"],
            json!(["once", "session", "workspace", "global"])
        );

        let svc = Arc::clone(&service);
        let second = tokio::spawn(async move { svc.check(request("c2")).await });
        let live = recv(&mut client).await;
        assert_eq!(live["type"], "approval_requested");
        assert_eq!(live["tool_call_id"], "c2");

        client
            .send(
                json!({ "type": "resolve", "tool_call_id": "c2", "action": "allow", "scope": "session" })
                    .to_string(),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(recv(&mut client).await);
        }
        let ack = seen.iter().find(|m| m["type"] == "resolve_ack").unwrap();
        assert_eq!(ack["accepted"], true);
        let resolved = seen
            .iter()
            .find(|m| m["type"] == "approval_resolved")
            .unwrap();
        assert_eq!(resolved["tool_call_id"], "c2");
        assert_eq!(resolved["resolved_by"], "user");
        assert!(resolved["learned_rule_id"].is_string());

        let outcome = second.await.unwrap();
        assert_eq!(outcome.resolved_by, ResolvedBy::User);
        assert_eq!(outcome.action, Decision::Allow);

        service.teardown_session(&SessionId::new("s1"));
        assert_eq!(first.await.unwrap().resolved_by, ResolvedBy::ConnectionLost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_commands_get_errors() {
        let (service, channel) = service();
        let shutdown = CancellationToken::new();
        let mut client = connect(&service, &channel, &shutdown);

        client.send("nope".to_owned()).await.unwrap();
        assert_eq!(recv(&mut client).await["type"], "error");

        client
            .send(json!({ "type": "resolve", "tool_call_id": "c1", "action": "ask" }).to_string())
            .await
            .unwrap();
        let reply = recv(&mut client).await;
        assert_eq!(reply["message"], "action must be allow or deny");

        client
            .send(json!({ "type": "resolve", "tool_call_id": "ghost", "action": "deny" }).to_string())
            .await
            .unwrap();
        let reply = recv(&mut client).await;
        assert_eq!(reply["type"], "resolve_ack");
        assert_eq!(reply["accepted"], false);

        shutdown.cancel();
        assert!(client.next().await.is_none());
    }
}
