//! Shared test harness for integration tests.

#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use warden_audit::{AuditEntry, AuditQuery};
use warden_config::Config;
use warden_core::WardenHome;
use warden_daemon::{Daemon, RunningDaemon, RuntimePaths};
use warden_gate::GateService;
use warden_policy::{PathContext, RuleStore};

/// Upper bound on any single socket read in these tests.
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// A daemon built from [`Config`] and served on real sockets in a tempdir.
///
/// The tempdir holds both the Warden home (`<root>/warden`) and the home
/// directory the evaluator resolves `~` against (`<root>/home`).
#[allow(dead_code)]
pub struct GateHarness {
    /// The running daemon (taken by [`GateHarness::stop`]).
    running: Option<RunningDaemon>,
    /// Shared gate state, for inspecting rules and the audit log.
    pub service: Arc<GateService>,
    /// Resolved socket and file locations.
    pub paths: RuntimePaths,
    /// The configuration the daemon was built from.
    pub config: Config,
    /// The agent's home directory.
    pub user_home: PathBuf,
    shutdown: CancellationToken,
    dir: TempDir,
}

#[allow(dead_code)]
impl GateHarness {
    /// Start a daemon from the embedded defaults with no preset rules.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a daemon after adjusting the default configuration.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let home = WardenHome::from_path(root.join("warden"));
        let user_home = root.join("home");
        std::fs::create_dir_all(&user_home).unwrap();

        let mut config = Config::load_with_home(None, home.root()).unwrap().config;
        config.rules.presets.clear();
        config.policy.default_decision = Some("ask".to_owned());
        configure(&mut config);

        Self::launch(dir, home, user_home, config)
    }

    fn launch(dir: TempDir, home: WardenHome, user_home: PathBuf, config: Config) -> Self {
        home.ensure().unwrap();
        let daemon =
            Daemon::build_with_context(&config, &home, PathContext::new(&user_home)).unwrap();
        let shutdown = CancellationToken::new();
        let running = daemon.start(shutdown.clone()).unwrap();
        Self {
            service: Arc::clone(running.service()),
            paths: running.paths().clone(),
            running: Some(running),
            config,
            user_home,
            shutdown,
            dir,
        }
    }

    /// Stop the daemon and start a fresh one over the same files.
    pub async fn restart(mut self) -> Self {
        self.stop().await;
        let root = self.user_home.parent().unwrap().to_path_buf();
        let home = WardenHome::from_path(root.join("warden"));
        Self::launch(self.dir, home, self.user_home, self.config)
    }

    /// Shut down and wait for every listener to stop.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(running) = self.running.take() {
            running.stopped().await.unwrap();
        }
    }

    /// The live rule store.
    pub fn rules(&self) -> &Arc<RuleStore> {
        self.service.evaluator().rules()
    }

    /// Every audit entry, newest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.service
            .audit()
            .query(&AuditQuery::latest(1000))
            .unwrap()
    }

    /// Connect an agent and complete the handshake.
    pub async fn agent(&self, session: &str, workspace: &str) -> Agent {
        let mut agent = Agent {
            framed: connect(&self.paths.gate_socket).await,
        };
        agent
            .send(json!({ "type": "hello", "session_id": session, "workspace_id": workspace }))
            .await;
        let ack = agent.recv().await;
        assert_eq!(ack["type"], "hello_ack", "{ack}");
        agent
    }

    /// Connect a supervisor.
    pub async fn supervisor(&self) -> Supervisor {
        Supervisor {
            framed: connect(&self.paths.supervisor_socket).await,
        }
    }
}

async fn connect(path: &Path) -> Framed<UnixStream, LinesCodec> {
    Framed::new(UnixStream::connect(path).await.unwrap(), LinesCodec::new())
}

async fn recv_line(framed: &mut Framed<UnixStream, LinesCodec>) -> Option<Value> {
    let next = tokio::time::timeout(RECV_TIMEOUT, framed.next())
        .await
        .expect("timed out waiting for a message");
    next.map(|line| serde_json::from_str(&line.unwrap()).unwrap())
}

/// The agent side of the gate socket.
pub struct Agent {
    framed: Framed<UnixStream, LinesCodec>,
}

#[allow(dead_code)]
impl Agent {
    /// Send one message.
    pub async fn send(&mut self, value: Value) {
        self.framed.send(value.to_string()).await.unwrap();
    }

    /// Receive the next message.
    pub async fn recv(&mut self) -> Value {
        recv_line(&mut self.framed).await.expect("gate closed")
    }

    /// Whether the gate closed the connection.
    pub async fn recv_eof(&mut self) -> bool {
        recv_line(&mut self.framed).await.is_none()
    }

    /// Send a `gate_check` without waiting.
    pub async fn submit(&mut self, id: &str, tool: &str, input: Value) {
        self.send(json!({
            "type": "gate_check",
            "tool_call_id": id,
            "tool": tool,
            "input": input,
        }))
        .await;
    }

    /// Wait for the `gate_result` of `id`, skipping other messages.
    pub async fn result(&mut self, id: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message["type"] == "gate_result" && message["tool_call_id"] == id {
                return message;
            }
        }
    }

    /// Submit a check and wait for its result.
    pub async fn check(&mut self, id: &str, tool: &str, input: Value) -> Value {
        self.submit(id, tool, input).await;
        self.result(id).await
    }

    /// Submit a bash check and wait for its result.
    pub async fn bash(&mut self, id: &str, command: &str) -> Value {
        self.check(id, "bash", json!({ "command": command })).await
    }

    /// End the session politely.
    pub async fn end(mut self) {
        self.send(json!({ "type": "session_end" })).await;
        assert!(self.recv_eof().await);
    }
}

/// The human side of the supervisor socket.
pub struct Supervisor {
    framed: Framed<UnixStream, LinesCodec>,
}

#[allow(dead_code)]
impl Supervisor {
    /// Receive the next message.
    pub async fn recv(&mut self) -> Value {
        recv_line(&mut self.framed).await.expect("supervisor socket closed")
    }

    /// Wait for the approval request of `id`.
    pub async fn requested(&mut self, id: &str) -> Value {
        self.wait_for("approval_requested", id).await
    }

    /// Wait for the resolution of `id`.
    pub async fn resolved(&mut self, id: &str) -> Value {
        self.wait_for("approval_resolved", id).await
    }

    async fn wait_for(&mut self, kind: &str, id: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message["type"] == kind && message["tool_call_id"] == id {
                return message;
            }
        }
    }

    /// Answer an approval.
    pub async fn resolve(&mut self, id: &str, action: &str, scope: &str) {
        let command = json!({
            "type": "resolve",
            "tool_call_id": id,
            "action": action,
            "scope": scope,
        });
        self.framed.send(command.to_string()).await.unwrap();
    }

    /// Answer an approval and return whether the gate accepted it.
    pub async fn answer(&mut self, id: &str, action: &str, scope: &str) -> bool {
        self.resolve(id, action, scope).await;
        self.wait_for("resolve_ack", id).await["accepted"] == true
    }
}
