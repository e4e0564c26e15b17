//! The gate service: evaluate, ask, wait, learn, audit.
//!
//! Every check ends in exactly one audit entry. When the audit append fails
//! the call is denied regardless of what policy or the human said.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_audit::{AuditLog, AuditRecord, ResolvedBy};
use warden_core::{Decision, DecisionLayer, RuleId, SessionId, Timestamp, ToolCallId};
use warden_policy::{ApprovalScope, GateRequest, PolicyDecision, PolicyEvaluator};

use crate::approval::{ApprovalChannel, ApprovalRequest, ApprovalResolved};
use crate::pending::{PendingApproval, PendingRegistry, Resolution};
use crate::protocol::ServerMessage;

/// Default cap on one protocol line.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Timing and framing limits of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// How long an `ask` waits for a human before denying.
    pub approval_timeout: Duration,
    /// Heartbeat period advertised to adapters.
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is dropped.
    pub heartbeat_grace: Duration,
    /// Time allowed between connect and `hello`.
    pub handshake_timeout: Duration,
    /// Longest accepted line, in bytes.
    pub max_message_bytes: usize,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_grace: Duration::from_secs(45),
            handshake_timeout: Duration::from_secs(10),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Final result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    /// Correlation id.
    pub tool_call_id: ToolCallId,
    /// `allow` or `deny`.
    pub action: Decision,
    /// Explanation sent to the adapter.
    pub reason: Option<String>,
    /// Who settled it.
    pub resolved_by: ResolvedBy,
    /// Policy layer of the initial decision.
    pub layer: DecisionLayer,
    /// Rule that matched, if any.
    pub matched_rule_id: Option<RuleId>,
    /// Rule learned from a scoped allow, if any.
    pub learned_rule_id: Option<RuleId>,
}

impl GateOutcome {
    /// The `gate_result` reply.
    #[must_use]
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::GateResult {
            tool_call_id: self.tool_call_id.clone(),
            action: self.action,
            reason: self.reason.clone(),
        }
    }
}

/// What settled a check, before auditing.
struct Settled {
    action: Decision,
    resolved_by: ResolvedBy,
    learned_rule_id: Option<RuleId>,
    reason: Option<String>,
}

/// Shared state behind every gate connection.
pub struct GateService {
    evaluator: PolicyEvaluator,
    audit: Arc<AuditLog>,
    channel: Arc<dyn ApprovalChannel>,
    pending: PendingRegistry,
    settings: GateSettings,
}

impl std::fmt::Debug for GateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateService")
            .field("evaluator", &self.evaluator)
            .field("pending", &self.pending.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GateService {
    /// Create a service.
    #[must_use]
    pub fn new(
        evaluator: PolicyEvaluator,
        audit: Arc<AuditLog>,
        channel: Arc<dyn ApprovalChannel>,
        settings: GateSettings,
    ) -> Self {
        Self {
            evaluator,
            audit,
            channel,
            pending: PendingRegistry::new(),
            settings,
        }
    }

    /// The policy evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    /// The audit log.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Timing and framing limits.
    #[must_use]
    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Published requests of every call still waiting, oldest first.
    #[must_use]
    pub fn pending_snapshot(&self) -> Vec<ApprovalRequest> {
        self.pending.snapshot()
    }

    /// Decide a call, waiting for a human if policy asks.
    pub async fn check(&self, request: GateRequest) -> GateOutcome {
        self.check_until_closed(request, &CancellationToken::new())
            .await
    }

    /// Like [`check`](Self::check), but a pending approval resolves as
    /// connection loss as soon as `closed` is cancelled.
    pub async fn check_until_closed(
        &self,
        request: GateRequest,
        closed: &CancellationToken,
    ) -> GateOutcome {
        let decision = self.evaluator.evaluate(&request);
        match decision.action {
            Decision::Allow | Decision::Deny => {
                let settled = Settled {
                    action: decision.action,
                    resolved_by: ResolvedBy::Policy,
                    learned_rule_id: None,
                    reason: decision.reason.clone(),
                };
                self.finish(&request, &decision, settled).await
            },
            Decision::Ask => self.ask(request, decision, closed).await,
        }
    }

    async fn ask(
        &self,
        request: GateRequest,
        decision: PolicyDecision,
        closed: &CancellationToken,
    ) -> GateOutcome {
        let created_at = Timestamp::now();
        let notice = ApprovalRequest {
            tool_call_id: request.tool_call_id.clone(),
            session_id: request.session_id.clone(),
            workspace_id: request.workspace_id.clone(),
            tool: request.tool.clone(),
            display_summary: decision.display_summary.clone(),
            risk: decision.risk,
            reason: decision.reason.clone(),
            heuristic: decision.heuristic,
            created_at,
            deadline_at: created_at.saturating_add(self.settings.approval_timeout),
            remember_options: self.evaluator.remember_options(&request),
        };

        let (pending, rx) = PendingApproval::new(notice.clone());
        if !self.pending.insert(Arc::clone(&pending)) {
            warn!(
                session_id = %request.session_id,
                tool_call_id = %request.tool_call_id,
                "tool_call_id is already pending elsewhere, denying"
            );
            let settled = Settled {
                action: Decision::Deny,
                resolved_by: ResolvedBy::Policy,
                learned_rule_id: None,
                reason: Some("tool_call_id is already pending".to_owned()),
            };
            return self.finish(&request, &decision, settled).await;
        }

        info!(
            session_id = %request.session_id,
            tool_call_id = %request.tool_call_id,
            tool = %request.tool,
            risk = %decision.risk,
            "approval requested"
        );
        self.channel.publish(notice).await;

        let resolution = self.wait(&pending, rx, closed).await;
        self.pending.remove(&request.tool_call_id);

        let settled = match resolution {
            Resolution::Human {
                action: Decision::Allow,
                scope,
            } => Settled {
                action: Decision::Allow,
                resolved_by: ResolvedBy::User,
                learned_rule_id: self.learn(&request, scope).await,
                reason: Some("approved by user".to_owned()),
            },
            Resolution::Human { .. } => Settled {
                action: Decision::Deny,
                resolved_by: ResolvedBy::User,
                learned_rule_id: None,
                reason: Some("denied by user".to_owned()),
            },
            Resolution::Timeout => Settled {
                action: Decision::Deny,
                resolved_by: ResolvedBy::Timeout,
                learned_rule_id: None,
                reason: Some("approval timed out".to_owned()),
            },
            Resolution::ConnectionLost => Settled {
                action: Decision::Deny,
                resolved_by: ResolvedBy::ConnectionLost,
                learned_rule_id: None,
                reason: Some("connection lost".to_owned()),
            },
        };

        let outcome = self.finish(&request, &decision, settled).await;
        self.channel
            .resolved(ApprovalResolved {
                tool_call_id: outcome.tool_call_id.clone(),
                session_id: request.session_id.clone(),
                action: outcome.action,
                resolved_by: outcome.resolved_by,
                learned_rule_id: outcome.learned_rule_id.clone(),
            })
            .await;
        outcome
    }

    /// Race the human, the deadline and connection loss for the slot.
    async fn wait(
        &self,
        pending: &PendingApproval,
        mut rx: oneshot::Receiver<Resolution>,
        closed: &CancellationToken,
    ) -> Resolution {
        tokio::select! {
            result = &mut rx => return result.unwrap_or(Resolution::ConnectionLost),
            () = tokio::time::sleep(self.settings.approval_timeout) => {
                pending.resolve(Resolution::Timeout);
            },
            () = closed.cancelled() => {
                pending.resolve(Resolution::ConnectionLost);
            },
        }
        // Whoever filled the slot first decides.
        rx.await.unwrap_or(Resolution::ConnectionLost)
    }

    /// Store the rule a scoped allow implies. Failures leave the call allowed.
    ///
    /// Persisting takes a file lock another process may hold, so it runs on
    /// the blocking pool.
    async fn learn(&self, request: &GateRequest, scope: ApprovalScope) -> Option<RuleId> {
        let Some(rule) = self.evaluator.suggest_rule(request, scope) else {
            if scope != ApprovalScope::Once {
                debug!(
                    tool_call_id = %request.tool_call_id,
                    %scope,
                    "no rule can be learned for this scope"
                );
            }
            return None;
        };
        let rules = Arc::clone(self.evaluator.rules());
        match tokio::task::spawn_blocking(move || rules.add(rule)).await {
            Ok(Ok(rule)) => {
                info!(
                    session_id = %request.session_id,
                    tool_call_id = %request.tool_call_id,
                    rule_id = %rule.id,
                    %scope,
                    "rule learned from approval"
                );
                Some(rule.id)
            },
            Ok(Err(e)) => {
                warn!(
                    tool_call_id = %request.tool_call_id,
                    error = %e,
                    "failed to store learned rule"
                );
                None
            },
            Err(e) => {
                warn!(
                    tool_call_id = %request.tool_call_id,
                    error = %e,
                    "rule store task failed"
                );
                None
            },
        }
    }

    async fn finish(
        &self,
        request: &GateRequest,
        decision: &PolicyDecision,
        settled: Settled,
    ) -> GateOutcome {
        let record = AuditRecord::new(
            request.session_id.clone(),
            request.tool_call_id.clone(),
            request.tool.as_str(),
            settled.action,
            settled.resolved_by,
            decision.layer,
        )
        .with_workspace(request.workspace_id.clone())
        .with_summary(decision.display_summary.as_str(), decision.risk)
        .with_rule(decision.matched_rule_id.clone())
        .with_learned_rule(settled.learned_rule_id.clone())
        .with_reason(settled.reason.clone());

        let mut outcome = GateOutcome {
            tool_call_id: request.tool_call_id.clone(),
            action: settled.action,
            reason: settled.reason,
            resolved_by: settled.resolved_by,
            layer: decision.layer,
            matched_rule_id: decision.matched_rule_id.clone(),
            learned_rule_id: settled.learned_rule_id,
        };

        let audit = Arc::clone(&self.audit);
        let failure = match tokio::task::spawn_blocking(move || audit.record(record)).await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(e) = failure {
            error!(
                session_id = %request.session_id,
                tool_call_id = %request.tool_call_id,
                error = %e,
                "audit append failed, denying"
            );
            outcome.action = Decision::Deny;
            outcome.reason = Some("audit log unavailable".to_owned());
        }

        debug!(
            session_id = %request.session_id,
            tool_call_id = %request.tool_call_id,
            tool = %request.tool,
            action = %outcome.action,
            layer = %outcome.layer,
            resolved_by = %outcome.resolved_by,
            "check resolved"
        );
        outcome
    }

    /// Deliver a human answer. Returns `false` for unknown or settled calls.
    ///
    /// `ask` is not an answer and is treated as `deny`.
    pub fn resolve(&self, tool_call_id: &ToolCallId, action: Decision, scope: ApprovalScope) -> bool {
        let action = if action.is_allow() {
            Decision::Allow
        } else {
            Decision::Deny
        };
        let accepted = self
            .pending
            .resolve(tool_call_id, Resolution::Human { action, scope });
        if accepted {
            debug!(%tool_call_id, %action, %scope, "approval answered");
        } else {
            warn!(%tool_call_id, "late or unknown approval answer ignored");
        }
        accepted
    }

    /// Resolve every pending call of a session as connection loss.
    /// Returns how many calls this settled.
    pub fn abandon_session(&self, session_id: &SessionId) -> usize {
        self.pending
            .for_session(session_id)
            .iter()
            .filter(|p| p.resolve(Resolution::ConnectionLost))
            .count()
    }

    /// End a session: abandon its pending calls and drop its session rules.
    pub fn teardown_session(&self, session_id: &SessionId) {
        let abandoned = self.abandon_session(session_id);
        let cleared = self.evaluator.rules().clear_session_rules(session_id);
        info!(
            session_id = %session_id,
            abandoned,
            rules_cleared = cleared,
            "session torn down"
        );
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
