//! Daemon assembly: stores, evaluator, gate service and the two sockets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_audit::AuditLog;
use warden_config::Config;
use warden_core::WardenHome;
use warden_gate::{
    BroadcastApprovalChannel, GateResult, GateService, SocketListener, serve_gate,
    serve_supervisor,
};
use warden_policy::{PathContext, PolicyEvaluator, RuleStore};

use crate::config_bridge::{self, RuntimePaths};

/// How often persisted rules are re-read and expired rules purged.
pub const RULE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// A fully wired gate, not yet listening.
#[derive(Debug)]
pub struct Daemon {
    service: Arc<GateService>,
    channel: BroadcastApprovalChannel,
    paths: RuntimePaths,
    supervisor_enabled: bool,
}

impl Daemon {
    /// Build the daemon for the current user.
    ///
    /// # Errors
    ///
    /// See [`Daemon::build_with_context`].
    pub fn build(cfg: &Config, home: &WardenHome) -> anyhow::Result<Self> {
        Self::build_with_context(cfg, home, PathContext::from_env())
    }

    /// Build the daemon, resolving `~` in paths and rules against `ctx`.
    ///
    /// Opens the rule store (seeding presets into a new rules file), opens
    /// the audit log, and builds the evaluator and gate service.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not convert, or the rule
    /// store or audit log cannot be opened.
    pub fn build_with_context(
        cfg: &Config,
        home: &WardenHome,
        ctx: PathContext,
    ) -> anyhow::Result<Self> {
        let paths = config_bridge::to_runtime_paths(cfg, home, &ctx);
        let evaluator_config = config_bridge::to_evaluator_config(cfg)?;
        let presets = config_bridge::to_preset_rules(cfg)?;

        let rules = RuleStore::open(&paths.rules, ctx.clone())
            .with_context(|| format!("failed to open rules file {}", paths.rules.display()))?;
        let seeded = rules
            .seed_presets(presets)
            .context("failed to seed preset rules")?;
        if let Err(e) = rules.purge_expired() {
            warn!(error = %e, "failed to purge expired rules");
        }

        let audit = AuditLog::open(&paths.audit_log, cfg.audit.max_file_bytes).with_context(
            || format!("failed to open audit log {}", paths.audit_log.display()),
        )?;

        let evaluator =
            PolicyEvaluator::new(evaluator_config, Arc::new(rules)).with_path_context(ctx);
        let channel = BroadcastApprovalChannel::default();
        let service = GateService::new(
            evaluator,
            Arc::new(audit),
            Arc::new(channel.clone()),
            config_bridge::to_gate_settings(cfg),
        );

        info!(
            rules = service.evaluator().rules().len(),
            seeded,
            default_decision = %service.evaluator().config().default_decision,
            "gate assembled"
        );

        Ok(Self {
            service: Arc::new(service),
            channel,
            paths,
            supervisor_enabled: cfg.gate.supervisor_enabled,
        })
    }

    /// The gate service.
    #[must_use]
    pub fn service(&self) -> &Arc<GateService> {
        &self.service
    }

    /// The approval channel supervisors subscribe to.
    #[must_use]
    pub fn channel(&self) -> &BroadcastApprovalChannel {
        &self.channel
    }

    /// Resolved filesystem locations.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Bind the sockets and start serving until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a socket cannot be bound. Nothing is left
    /// listening in that case.
    pub fn start(self, shutdown: CancellationToken) -> anyhow::Result<RunningDaemon> {
        let gate_listener = SocketListener::bind(&self.paths.gate_socket).inspect_err(|e| {
            error!(error = %e, "failed to bind gate socket");
        })?;
        let supervisor_listener = if self.supervisor_enabled {
            Some(
                SocketListener::bind(&self.paths.supervisor_socket).inspect_err(|e| {
                    error!(error = %e, "failed to bind supervisor socket");
                })?,
            )
        } else {
            info!("supervisor socket disabled");
            None
        };

        let gate = tokio::spawn(serve_gate(
            gate_listener,
            Arc::clone(&self.service),
            shutdown.clone(),
        ));
        let supervisor = supervisor_listener.map(|listener| {
            tokio::spawn(serve_supervisor(
                listener,
                Arc::clone(&self.service),
                self.channel.clone(),
                shutdown.clone(),
            ))
        });
        let maintenance = tokio::spawn(rule_maintenance_loop(
            Arc::clone(&self.service),
            shutdown,
        ));

        Ok(RunningDaemon {
            service: self.service,
            paths: self.paths,
            gate,
            supervisor,
            maintenance,
        })
    }
}

/// A daemon whose sockets are being served.
#[derive(Debug)]
pub struct RunningDaemon {
    service: Arc<GateService>,
    paths: RuntimePaths,
    gate: JoinHandle<GateResult<()>>,
    supervisor: Option<JoinHandle<GateResult<()>>>,
    maintenance: JoinHandle<()>,
}

impl RunningDaemon {
    /// Resolved filesystem locations.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Whether the supervisor socket is being served.
    #[must_use]
    pub fn supervisor_enabled(&self) -> bool {
        self.supervisor.is_some()
    }

    /// The gate service.
    #[must_use]
    pub fn service(&self) -> &Arc<GateService> {
        &self.service
    }

    /// Wait for every listener to stop after shutdown, then flush the audit
    /// log.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener task failed or panicked.
    pub async fn stopped(self) -> anyhow::Result<()> {
        self.gate.await.context("gate listener panicked")??;
        if let Some(supervisor) = self.supervisor {
            supervisor.await.context("supervisor listener panicked")??;
        }
        self.maintenance
            .await
            .context("rule maintenance task panicked")?;

        if let Err(e) = self.service.audit().flush() {
            warn!(error = %e, "failed to flush audit log");
        }
        info!("daemon stopped");
        Ok(())
    }
}

/// Pick up rules edited by `warden rules` and drop expired ones.
async fn rule_maintenance_loop(service: Arc<GateService>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(RULE_MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the store was just opened.
    interval.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let rules = service.evaluator().rules();
                rules.reload();
                if let Err(e) = rules.purge_expired() {
                    warn!(error = %e, "failed to purge expired rules");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::load_with_home(None, dir).unwrap().config;
        cfg.policy.default_decision = Some("ask".to_owned());
        cfg
    }

    #[tokio::test]
    async fn test_build_seeds_presets_once() {
        let dir = tempfile::tempdir().unwrap();
        let home = WardenHome::from_path(dir.path());
        let cfg = config(dir.path());
        let ctx = PathContext::new(dir.path());

        let daemon = Daemon::build_with_context(&cfg, &home, ctx.clone()).unwrap();
        let seeded = daemon.service().evaluator().rules().len();
        assert_eq!(seeded, cfg.rules.presets.len());
        assert!(home.rules_path().exists());

        // A user deletes a preset; restarting does not bring it back.
        let rules = daemon.service().evaluator().rules();
        assert!(rules.remove(&"preset-sudo".into()).unwrap());
        drop(daemon);

        let daemon = Daemon::build_with_context(&cfg, &home, ctx).unwrap();
        assert_eq!(
            daemon.service().evaluator().rules().len(),
            seeded.saturating_sub(1)
        );
    }

    #[tokio::test]
    async fn test_start_binds_and_shutdown_removes_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let home = WardenHome::from_path(dir.path());
        let cfg = config(dir.path());

        let daemon =
            Daemon::build_with_context(&cfg, &home, PathContext::new(dir.path())).unwrap();
        let shutdown = CancellationToken::new();
        let running = daemon.start(shutdown.clone()).unwrap();
        assert!(running.supervisor_enabled());
        assert!(running.paths().gate_socket.exists());
        assert!(running.paths().supervisor_socket.exists());

        let paths = running.paths().clone();
        shutdown.cancel();
        running.stopped().await.unwrap();
        assert!(!paths.gate_socket.exists());
        assert!(!paths.supervisor_socket.exists());
    }

    #[tokio::test]
    async fn test_supervisor_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let home = WardenHome::from_path(dir.path());
        let mut cfg = config(dir.path());
        cfg.gate.supervisor_enabled = false;

        let daemon =
            Daemon::build_with_context(&cfg, &home, PathContext::new(dir.path())).unwrap();
        let shutdown = CancellationToken::new();
        let running = daemon.start(shutdown.clone()).unwrap();
        assert!(!running.supervisor_enabled());
        assert!(!running.paths().supervisor_socket.exists());

        shutdown.cancel();
        running.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_daemon_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let home = WardenHome::from_path(dir.path());
        let cfg = config(dir.path());
        let ctx = PathContext::new(dir.path());

        let first = Daemon::build_with_context(&cfg, &home, ctx.clone()).unwrap();
        let shutdown = CancellationToken::new();
        let running = first.start(shutdown.clone()).unwrap();

        let second = Daemon::build_with_context(&cfg, &home, ctx).unwrap();
        assert!(second.start(CancellationToken::new()).is_err());
        // The refused bind must not remove the live socket.
        assert!(running.paths().gate_socket.exists());

        shutdown.cancel();
        running.stopped().await.unwrap();
    }
}
