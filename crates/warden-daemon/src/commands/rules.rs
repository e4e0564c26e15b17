//! Rules command - list, add and remove persisted rules.
//!
//! Edits go straight to the rules file; a running daemon picks them up on
//! its next maintenance tick.

use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use warden_config::Config;
use warden_core::{Decision, RuleId, WorkspaceId};
use warden_daemon::{RuntimePaths, config_bridge};
use warden_policy::{PathContext, PolicyRule, RuleScope, RuleSource, RuleStore};

use crate::theme::Theme;

/// Arguments of `warden rules add`.
pub(crate) struct AddRuleArgs {
    pub(crate) tool: String,
    pub(crate) decision: String,
    pub(crate) scope: String,
    pub(crate) workspace: Option<String>,
    pub(crate) pattern: Option<String>,
    pub(crate) executable: Option<String>,
    pub(crate) label: Option<String>,
}

/// Open the rules file, seeding presets the way the daemon would.
fn open_store(cfg: &Config, paths: &RuntimePaths, ctx: PathContext) -> Result<RuleStore> {
    let store = RuleStore::open(&paths.rules, ctx)
        .with_context(|| format!("failed to open rules file {}", paths.rules.display()))?;
    store.seed_presets(config_bridge::to_preset_rules(cfg)?)?;
    Ok(store)
}

/// Build a manual rule from CLI arguments.
///
/// Session rules only live inside a running daemon, so they cannot be added
/// here.
fn manual_rule(args: AddRuleArgs) -> Result<PolicyRule> {
    let decision: Decision = args.decision.parse().map_err(|e: String| anyhow!(e))?;
    let scope: RuleScope = args.scope.parse()?;
    if scope == RuleScope::Session {
        bail!("session rules cannot be added from the CLI; use workspace or global");
    }

    let mut rule = PolicyRule::new(args.tool, decision, scope).with_source(RuleSource::Manual);
    match (scope, args.workspace) {
        (RuleScope::Workspace, Some(ws)) => rule = rule.with_workspace(WorkspaceId::new(ws)),
        (RuleScope::Workspace, None) => bail!("workspace rules need --workspace"),
        (_, Some(_)) => bail!("--workspace only applies to workspace rules"),
        (_, None) => {},
    }
    if let Some(pattern) = args.pattern {
        rule = rule.with_pattern(pattern);
    }
    if let Some(exe) = args.executable {
        rule = rule.with_executable(exe);
    }
    if let Some(label) = args.label {
        rule = rule.with_label(label);
    }
    rule.validate()?;
    Ok(rule)
}

/// Whether a rule is shown when listing for `workspace`.
fn visible_in(rule: &PolicyRule, workspace: Option<&str>) -> bool {
    match (workspace, rule.scope) {
        (None, _) | (Some(_), RuleScope::Global) => true,
        (Some(ws), RuleScope::Workspace) => {
            rule.workspace_id.as_ref().is_some_and(|id| id.as_str() == ws)
        },
        (Some(_), RuleScope::Session) => false,
    }
}

fn describe_match(rule: &PolicyRule) -> String {
    match (&rule.executable, &rule.pattern) {
        (Some(exe), Some(pattern)) => format!("{exe}: {pattern}"),
        (Some(exe), None) => exe.clone(),
        (None, Some(pattern)) => pattern.clone(),
        (None, None) => "*".to_owned(),
    }
}

/// List persisted rules.
pub(crate) fn list_rules(
    cfg: &Config,
    paths: &RuntimePaths,
    ctx: PathContext,
    workspace: Option<&str>,
) -> Result<()> {
    let store = open_store(cfg, paths, ctx)?;
    let rules: Vec<PolicyRule> = store
        .list()
        .into_iter()
        .filter(|r| visible_in(r, workspace))
        .collect();

    if rules.is_empty() {
        println!("{}", Theme::info("No rules"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Rules"));
    println!(
        "{:<24} {:<5} {:<10} {:<16} {:<8} {}",
        "ID".dimmed(),
        "ACT".dimmed(),
        "TOOL".dimmed(),
        "SCOPE".dimmed(),
        "SOURCE".dimmed(),
        "MATCH".dimmed()
    );
    println!("{}", Theme::separator());

    for rule in rules {
        let scope = match (&rule.scope, &rule.workspace_id) {
            (RuleScope::Workspace, Some(ws)) => format!("ws:{ws}"),
            (scope, _) => scope.to_string(),
        };
        println!(
            "{:<24} {} {:<10} {:<16} {:<8} {}",
            rule.id.as_str(),
            Theme::decision(rule.decision),
            rule.tool,
            scope,
            rule.source.to_string(),
            describe_match(&rule)
        );
        if let Some(label) = &rule.label {
            println!("{:<24} {}", "", Theme::dimmed(label));
        }
    }

    println!();
    Ok(())
}

/// Add a manual rule.
pub(crate) fn add_rule(
    cfg: &Config,
    paths: &RuntimePaths,
    ctx: PathContext,
    args: AddRuleArgs,
) -> Result<()> {
    let rule = manual_rule(args)?;
    let store = open_store(cfg, paths, ctx)?;
    let stored = store.add(rule)?;
    println!(
        "{}",
        Theme::success(&format!("Added rule {}: {stored}", stored.id))
    );
    Ok(())
}

/// Remove a rule by id.
pub(crate) fn remove_rule(
    cfg: &Config,
    paths: &RuntimePaths,
    ctx: PathContext,
    id: &str,
) -> Result<()> {
    let store = open_store(cfg, paths, ctx)?;
    if store.remove(&RuleId::new(id))? {
        println!("{}", Theme::success(&format!("Removed rule {id}")));
    } else {
        println!("{}", Theme::warning(&format!("No rule with id {id}")));
    }
    Ok(())
}
