//! Gate and supervisor over real Unix sockets.

#![allow(clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use warden_audit::{AuditLog, AuditQuery, ResolvedBy};
use warden_core::Decision;
use warden_gate::{
    BroadcastApprovalChannel, GateService, GateSettings, SocketListener, serve_gate,
    serve_supervisor,
};
use warden_policy::{EvaluatorConfig, PathContext, PolicyEvaluator, RuleStore};

type Client = Framed<UnixStream, LinesCodec>;

async fn connect(path: &Path) -> Client {
    Framed::new(UnixStream::connect(path).await.unwrap(), LinesCodec::new())
}

async fn send(client: &mut Client, value: Value) {
    client.send(value.to_string()).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    serde_json::from_str(&client.next().await.unwrap().unwrap()).unwrap()
}

#[tokio::test]
async fn test_ask_answered_over_supervisor_socket() {
    let dir = tempfile::tempdir().unwrap();
    let gate_path = dir.path().join("gate.sock");
    let supervisor_path = dir.path().join("supervisor.sock");

    let ctx = PathContext::new(dir.path());
    let rules = Arc::new(RuleStore::open(dir.path().join("rules.json"), ctx.clone()).unwrap());
    let evaluator =
        PolicyEvaluator::new(EvaluatorConfig::new(Decision::Ask), rules).with_path_context(ctx);
    let audit = Arc::new(AuditLog::open(dir.path().join("audit/audit.jsonl"), 1_048_576).unwrap());
    let channel = BroadcastApprovalChannel::default();
    let service = Arc::new(GateService::new(
        evaluator,
        Arc::clone(&audit),
        Arc::new(channel.clone()),
        GateSettings::default(),
    ));

    let shutdown = CancellationToken::new();
    let gate = tokio::spawn(serve_gate(
        SocketListener::bind(&gate_path).unwrap(),
        Arc::clone(&service),
        shutdown.clone(),
    ));
    let supervisor = tokio::spawn(serve_supervisor(
        SocketListener::bind(&supervisor_path).unwrap(),
        Arc::clone(&service),
        channel,
        shutdown.clone(),
    ));

    let mut human = connect(&supervisor_path).await;
    let mut agent = connect(&gate_path).await;
    send(&mut agent, json!({ "type": "hello", "session_id": "s1", "workspace_id": "ws" })).await;
    assert_eq!(recv(&mut agent).await["type"], "hello_ack");

    send(
        &mut agent,
        json!({
            "type": "gate_check",
            "tool_call_id": "c1",
            "tool": "bash",
            "input": { "command": "npm install" },
        }),
    )
    .await;

    let asked = recv(&mut human).await;
    assert_eq!(asked["type"], "approval_requested");
    assert_eq!(asked["tool_call_id"], "c1");
    send(
        &mut human,
        json!({ "type": "resolve", "tool_call_id": "c1", "action": "allow", "scope": "workspace" }),
    )
    .await;

    let result = recv(&mut agent).await;
    assert_eq!(result["tool_call_id"], "c1");
    assert_eq!(result["action"], "allow");

    // The learned workspace rule answers the next call without asking.
    send(
        &mut agent,
        json!({
            "type": "gate_check",
            "tool_call_id": "c2",
            "tool": "bash",
            "input": { "command": "npm test" },
        }),
    )
    .await;
    let result = recv(&mut agent).await;
    assert_eq!(result["tool_call_id"], "c2");
    assert_eq!(result["action"], "allow");

    shutdown.cancel();
    gate.await.unwrap().unwrap();
    supervisor.await.unwrap().unwrap();
    assert!(!gate_path.exists());
    assert!(!supervisor_path.exists());

    let entries = audit.query(&AuditQuery::latest(10)).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].tool_call_id.as_str(), "c2");
    assert_eq!(entries[0].resolved_by, ResolvedBy::Policy);
    assert_eq!(entries[1].resolved_by, ResolvedBy::User);
    assert!(entries[1].learned_rule_id.is_some());

    // Workspace rules outlive the session.
    let reopened = RuleStore::open(dir.path().join("rules.json"), PathContext::new(dir.path()))
        .unwrap();
    assert_eq!(reopened.len(), 1);
}
