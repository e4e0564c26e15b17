//! The policy evaluator.
//!
//! Layers run in a fixed order and the first one that yields a decision
//! wins: reserved guards, heuristics, rules, then the configured default.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use warden_core::{Decision, DecisionLayer, RiskLevel, RuleId, truncate_to_boundary};

use crate::command::{self, MAX_ANALYZED_LEN};
use crate::heuristics::{HeuristicKind, HeuristicSettings, run_heuristics};
use crate::paths::{NormalizedPath, PathContext};
use crate::request::{GateRequest, ToolInput};
use crate::rule::{
    ApprovalScope, PolicyRule, RuleMatch, RuleQuery, RuleScope, RuleSource, RuleStore,
    RuleSubject,
};
use crate::summary::summarize;

/// Tool-name prefix reserved for the gate's own policy surface.
pub const DEFAULT_RESERVED_PREFIX: &str = "policy.";

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Decision when no earlier layer decides.
    pub default_decision: Decision,
    /// Tools starting with any of these always ask (case-insensitive).
    pub reserved_tool_prefixes: Vec<String>,
    /// Detector modes.
    pub heuristics: HeuristicSettings,
    /// Bash commands are cut to this many bytes before detectors see them.
    pub max_command_length: usize,
}

impl EvaluatorConfig {
    /// Defaults with the given fallback decision.
    #[must_use]
    pub fn new(default_decision: Decision) -> Self {
        Self {
            default_decision,
            reserved_tool_prefixes: vec![DEFAULT_RESERVED_PREFIX.to_owned()],
            heuristics: HeuristicSettings::default(),
            max_command_length: MAX_ANALYZED_LEN,
        }
    }
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    /// What to do.
    pub action: Decision,
    /// Which layer decided.
    pub layer: DecisionLayer,
    /// Rule that decided, for the rule layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<RuleId>,
    /// One-line description of the call.
    pub display_summary: String,
    /// Display emphasis; never feeds back into the decision.
    pub risk: RiskLevel,
    /// Explanation, when the layer has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Detector that fired, for the heuristic layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<HeuristicKind>,
}

/// Evaluates gate requests against reserved guards, heuristics and rules.
#[derive(Debug)]
pub struct PolicyEvaluator {
    config: EvaluatorConfig,
    rules: Arc<RuleStore>,
    paths: PathContext,
}

impl PolicyEvaluator {
    /// Create an evaluator over a shared rule store.
    #[must_use]
    pub fn new(config: EvaluatorConfig, rules: Arc<RuleStore>) -> Self {
        Self {
            config,
            rules,
            paths: PathContext::from_env(),
        }
    }

    /// Use an explicit home directory for path expansion.
    #[must_use]
    pub fn with_path_context(mut self, paths: PathContext) -> Self {
        self.paths = paths;
        self
    }

    /// The rule store.
    #[must_use]
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// The evaluator settings.
    #[must_use]
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Whether `tool` belongs to the gate's own policy surface.
    #[must_use]
    pub fn is_reserved(&self, tool: &str) -> bool {
        let tool = tool.trim().to_ascii_lowercase();
        self.config
            .reserved_tool_prefixes
            .iter()
            .filter(|p| !p.is_empty())
            .any(|p| tool.starts_with(&p.to_ascii_lowercase()))
    }

    /// Decide a request.
    #[must_use]
    pub fn evaluate(&self, request: &GateRequest) -> PolicyDecision {
        let (display_summary, risk) = summarize(request);
        let decision = self.decide(request, display_summary, risk);
        debug!(
            session_id = %request.session_id,
            tool_call_id = %request.tool_call_id,
            tool = %request.tool,
            action = %decision.action,
            layer = %decision.layer,
            rule_id = decision.matched_rule_id.as_ref().map(RuleId::as_str),
            heuristic = decision.heuristic.map(HeuristicKind::name),
            "policy evaluated"
        );
        decision
    }

    fn decide(
        &self,
        request: &GateRequest,
        display_summary: String,
        risk: RiskLevel,
    ) -> PolicyDecision {
        let decision = |action, layer| PolicyDecision {
            action,
            layer,
            matched_rule_id: None,
            display_summary: display_summary.clone(),
            risk,
            reason: None,
            heuristic: None,
        };

        if self.is_reserved(&request.tool) {
            return PolicyDecision {
                risk: risk.max(RiskLevel::High),
                reason: Some("tool manages the gate's own policy".to_owned()),
                ..decision(Decision::Ask, DecisionLayer::ReservedGuard)
            };
        }

        let ctx = self.paths.with_cwd(request.cwd());
        let view = request.view();

        let analyzed = self.capped(&view);
        if let Some(hit) = run_heuristics(&analyzed, &ctx, &self.config.heuristics)
            && let Some(action) = hit.mode.decision()
        {
            return PolicyDecision {
                risk: risk.max(hit.kind.risk()),
                reason: Some(hit.reason),
                heuristic: Some(hit.kind),
                ..decision(action, DecisionLayer::Heuristic)
            };
        }

        if let Some(winner) = select_rule(self.matching_rules(request, &view, &ctx)) {
            let rule = winner.rule;
            return PolicyDecision {
                reason: Some(rule.label.clone().unwrap_or_else(|| rule.to_string())),
                matched_rule_id: Some(rule.id),
                ..decision(rule.decision, DecisionLayer::Rule)
            };
        }

        decision(self.config.default_decision, DecisionLayer::Default)
    }

    /// Bash commands trimmed to the configured analysis length.
    fn capped(&self, view: &ToolInput) -> ToolInput {
        match view {
            ToolInput::Bash { command } => ToolInput::Bash {
                command: truncate_to_boundary(command, self.config.max_command_length).to_owned(),
            },
            other => other.clone(),
        }
    }

    fn matching_rules(
        &self,
        request: &GateRequest,
        view: &ToolInput,
        ctx: &PathContext,
    ) -> Vec<RuleMatch> {
        match view {
            ToolInput::Bash { command } => {
                let executable = command::parse_executable(command::cap(command));
                self.find(
                    request,
                    RuleSubject::Command {
                        text: command,
                        executable: executable.as_deref(),
                    },
                )
            },
            ToolInput::File { path, .. } => match NormalizedPath::new(path, ctx) {
                Some(normalized) => {
                    let lexical = normalized.lexical_str();
                    let resolved = normalized.resolved_str();
                    self.find(
                        request,
                        RuleSubject::Path {
                            lexical: &lexical,
                            resolved: &resolved,
                        },
                    )
                },
                None => self.find(request, RuleSubject::Other(None)),
            },
            ToolInput::Other { subject } => {
                self.find(request, RuleSubject::Other(subject.as_deref()))
            },
        }
    }

    fn find(&self, request: &GateRequest, subject: RuleSubject<'_>) -> Vec<RuleMatch> {
        self.rules.find_matching(&RuleQuery {
            tool: &request.tool,
            session_id: &request.session_id,
            workspace_id: request.workspace_id.as_ref(),
            subject,
        })
    }

    /// The rule a scoped approval of `request` would create.
    ///
    /// Bash calls get a rule on the parsed executable, file tools a
    /// `<parent>/**` pattern on the resolved absolute path, and other tools a
    /// tool-only rule. Returns `None` for `once`, reserved tools, commands
    /// with no executable, relative or parentless paths, and workspace scope
    /// without a workspace id. Nothing is stored.
    #[must_use]
    pub fn suggest_rule(&self, request: &GateRequest, scope: ApprovalScope) -> Option<PolicyRule> {
        let scope = scope.rule_scope()?;
        if self.is_reserved(&request.tool) {
            return None;
        }

        let mut rule = match request.view() {
            ToolInput::Bash { command } => {
                let exe = command::parse_executable(command::cap(&command))?;
                PolicyRule::new(request.tool.as_str(), Decision::Allow, scope)
                    .with_label(format!("allow {exe}"))
                    .with_executable(exe)
            },
            ToolInput::File { access, path } => {
                let ctx = self.paths.with_cwd(request.cwd());
                let normalized = NormalizedPath::new(&path, &ctx)?;
                let parent = normalized
                    .resolved
                    .parent()
                    .filter(|p| p.is_absolute())
                    .map(Path::to_string_lossy)?;
                let pattern = if parent == "/" {
                    "/**".to_owned()
                } else {
                    format!("{}/**", escape_glob(&parent))
                };
                PolicyRule::new(request.tool.as_str(), Decision::Allow, scope)
                    .with_label(format!("{} under {parent}", access.label()))
                    .with_pattern(pattern)
            },
            ToolInput::Other { .. } => {
                PolicyRule::new(request.tool.as_str(), Decision::Allow, scope)
                    .with_label(format!("allow {}", request.tool))
            },
        };

        match scope {
            RuleScope::Session => rule = rule.with_session(request.session_id.clone()),
            RuleScope::Workspace => rule = rule.with_workspace(request.workspace_id.clone()?),
            RuleScope::Global => {},
        }
        Some(rule.with_source(RuleSource::Learned))
    }

    /// Approval scopes the gate will honor for `request`.
    ///
    /// Empty for reserved tools. `once` is always offered otherwise; the
    /// remembering scopes only when a rule can be built for them.
    #[must_use]
    pub fn remember_options(&self, request: &GateRequest) -> Vec<ApprovalScope> {
        if self.is_reserved(&request.tool) {
            return Vec::new();
        }
        let mut options = vec![ApprovalScope::Once];
        options.extend(
            [
                ApprovalScope::Session,
                ApprovalScope::Workspace,
                ApprovalScope::Global,
            ]
            .into_iter()
            .filter(|scope| self.suggest_rule(request, *scope).is_some()),
        );
        options
    }
}

/// A matching deny always wins; otherwise the most specific rule does.
fn select_rule(matches: Vec<RuleMatch>) -> Option<RuleMatch> {
    let (denies, others): (Vec<_>, Vec<_>) = matches
        .into_iter()
        .partition(|m| m.rule.decision.is_deny());
    denies
        .into_iter()
        .max_by(RuleMatch::cmp_specificity)
        .or_else(|| others.into_iter().max_by(RuleMatch::cmp_specificity))
}

fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[path = "evaluator_tests.rs"]
mod tests;
