//! Session teardown, connection loss and remembered approvals across
//! sessions and restarts.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::GateHarness;
use serde_json::json;
use warden_audit::ResolvedBy;
use warden_core::{Decision, SessionId};
use warden_policy::{RuleScope, RuleSource};

#[tokio::test]
async fn test_connection_loss_denies_once() {
    let mut gate = GateHarness::start().await;
    let mut supervisor = gate.supervisor().await;
    let mut agent = gate.agent("s1", "ws-1").await;

    agent
        .submit("c1", "bash", json!({ "command": "make deploy" }))
        .await;
    supervisor.requested("c1").await;
    drop(agent);

    let resolved = supervisor.resolved("c1").await;
    assert_eq!(resolved["action"], "deny");
    assert_eq!(resolved["resolved_by"], "connection_lost");

    // The answer arrives too late to change anything.
    assert!(!supervisor.answer("c1", "allow", "once").await);

    let entries = gate.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, Decision::Deny);
    assert_eq!(entries[0].resolved_by, ResolvedBy::ConnectionLost);
    assert!(gate.service.pending_snapshot().is_empty());

    gate.stop().await;
}

#[tokio::test]
async fn test_session_rule_ends_with_the_session() {
    let mut gate = GateHarness::start().await;
    let mut supervisor = gate.supervisor().await;
    let mut agent = gate.agent("s1", "ws-1").await;

    agent
        .submit("c1", "bash", json!({ "command": "cargo build --release" }))
        .await;
    supervisor.requested("c1").await;
    assert!(supervisor.answer("c1", "allow", "session").await);
    let result = agent.result("c1").await;
    assert_eq!(result["action"], "allow");

    // Remembered for the rest of the session.
    let result = agent.bash("c2", "cargo test").await;
    assert_eq!(result["action"], "allow");
    let learned = gate.rules().list();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].scope, RuleScope::Session);
    assert_eq!(learned[0].session_id, Some(SessionId::new("s1")));
    assert_eq!(learned[0].source, RuleSource::Learned);

    agent.end().await;
    assert!(gate.rules().is_empty());

    // A new connection reusing the session id starts from scratch.
    let mut agent = gate.agent("s1", "ws-1").await;
    agent
        .submit("c3", "bash", json!({ "command": "cargo test" }))
        .await;
    let asked = supervisor.requested("c3").await;
    assert_eq!(asked["session_id"], "s1");
    assert!(supervisor.answer("c3", "deny", "once").await);
    assert_eq!(agent.result("c3").await["action"], "deny");

    gate.stop().await;
}

#[tokio::test]
async fn test_workspace_rule_survives_restart() {
    let gate = GateHarness::start().await;
    let mut supervisor = gate.supervisor().await;
    let mut agent = gate.agent("s1", "ws-1").await;

    agent
        .submit("c1", "bash", json!({ "command": "npm install" }))
        .await;
    supervisor.requested("c1").await;
    assert!(supervisor.answer("c1", "allow", "workspace").await);
    assert_eq!(agent.result("c1").await["action"], "allow");

    let rules = gate.rules().list();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].scope, RuleScope::Workspace);
    assert_eq!(rules[0].executable.as_deref(), Some("npm"));
    drop(agent);
    drop(supervisor);

    let mut gate = gate.restart().await;
    assert_eq!(gate.rules().len(), 1);

    // Same workspace, different session: no question asked.
    let mut agent = gate.agent("s2", "ws-1").await;
    assert_eq!(agent.bash("c2", "npm test").await["action"], "allow");

    // Another workspace falls through to the default.
    let mut supervisor = gate.supervisor().await;
    let mut other = gate.agent("s3", "ws-2").await;
    other
        .submit("c3", "bash", json!({ "command": "npm test" }))
        .await;
    supervisor.requested("c3").await;
    assert!(supervisor.answer("c3", "deny", "once").await);
    assert_eq!(other.result("c3").await["action"], "deny");

    gate.stop().await;
}

#[tokio::test]
async fn test_approval_timeout_denies() {
    let mut gate = GateHarness::start_with(|cfg| {
        cfg.gate.approval_timeout_secs = 1;
    })
    .await;
    let mut supervisor = gate.supervisor().await;
    let mut agent = gate.agent("s1", "ws-1").await;

    agent
        .submit("c1", "bash", json!({ "command": "make deploy" }))
        .await;
    supervisor.requested("c1").await;

    let result = agent.result("c1").await;
    assert_eq!(result["action"], "deny");
    assert_eq!(result["reason"], "approval timed out");
    assert_eq!(supervisor.resolved("c1").await["resolved_by"], "timeout");
    assert!(!supervisor.answer("c1", "allow", "once").await);

    let entries = gate.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resolved_by, ResolvedBy::Timeout);

    gate.stop().await;
}

#[tokio::test]
async fn test_late_supervisor_sees_pending_calls() {
    let mut gate = GateHarness::start().await;
    let mut agent = gate.agent("s1", "ws-1").await;
    agent
        .submit("c1", "bash", json!({ "command": "terraform apply" }))
        .await;

    // Connect only once the call is parked.
    while gate.service.pending_snapshot().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut supervisor = gate.supervisor().await;
    let asked = supervisor.requested("c1").await;
    assert_eq!(asked["display_summary"], "$ terraform apply");
    assert!(supervisor.answer("c1", "allow", "once").await);
    assert_eq!(agent.result("c1").await["action"], "allow");
    assert!(gate.rules().is_empty());

    gate.stop().await;
}
