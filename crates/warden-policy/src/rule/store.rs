//! Rule storage: in-memory session rules plus persisted workspace/global rules.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::{debug, info, warn};
use warden_core::{Decision, RuleId, SessionId, Timestamp, WorkspaceId};

use super::pattern::{PatternKind, RulePattern};
use super::{ANY_TOOL, PolicyRule, RuleScope};
use crate::error::{PolicyError, PolicyResult};
use crate::paths::PathContext;

/// Version of the persisted rules document.
const RULES_DOCUMENT_VERSION: u32 = 1;

/// On-disk shape of `rules.json`.
#[derive(Debug, Serialize, Deserialize)]
struct RulesDocument {
    version: u32,
    #[serde(default)]
    rules: BTreeMap<RuleId, PolicyRule>,
}

impl Default for RulesDocument {
    fn default() -> Self {
        Self {
            version: RULES_DOCUMENT_VERSION,
            rules: BTreeMap::new(),
        }
    }
}

/// What the request offers for rule patterns to match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSubject<'a> {
    /// A bash command.
    Command {
        /// Raw command text.
        text: &'a str,
        /// Parsed executable, when one could be found.
        executable: Option<&'a str>,
    },
    /// A file tool path.
    Path {
        /// Lexically normalized path.
        lexical: &'a str,
        /// Symlink-resolved path (the lexical path when resolution failed).
        resolved: &'a str,
    },
    /// Any other tool, with its optional subject text.
    Other(Option<&'a str>),
}

/// A lookup against the store.
#[derive(Debug, Clone, Copy)]
pub struct RuleQuery<'a> {
    /// Tool being called.
    pub tool: &'a str,
    /// Calling session.
    pub session_id: &'a SessionId,
    /// Calling workspace, if any.
    pub workspace_id: Option<&'a WorkspaceId>,
    /// Match subject.
    pub subject: RuleSubject<'a>,
}

/// A rule that matched, with the facts used to rank it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// The matching rule.
    pub rule: PolicyRule,
    /// Length (in chars) of the pattern's literal prefix; 0 without a pattern.
    pub literal_prefix_len: usize,
    /// How many of executable and pattern the rule constrains (0..=2).
    pub criteria: u8,
}

impl RuleMatch {
    /// Order by specificity: longer literal prefix, then more criteria,
    /// then `ask` over `allow`. Equal specificity falls back to the rule id,
    /// where the smaller id ranks higher.
    #[must_use]
    pub fn cmp_specificity(&self, other: &Self) -> std::cmp::Ordering {
        self.literal_prefix_len
            .cmp(&other.literal_prefix_len)
            .then(self.criteria.cmp(&other.criteria))
            .then(
                self.rule
                    .decision
                    .strictness()
                    .cmp(&other.rule.decision.strictness()),
            )
            .then_with(|| other.rule.id.cmp(&self.rule.id))
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PolicyRule,
    pattern: Option<RulePattern>,
    /// For `*` rules: the pattern with `~` expanded, used on file paths.
    path_pattern: Option<RulePattern>,
}

impl CompiledRule {
    fn compile(rule: PolicyRule, ctx: &PathContext) -> PolicyResult<Self> {
        let kind = if rule.is_file_rule() {
            PatternKind::Path
        } else {
            PatternKind::Command
        };
        let pattern = rule
            .pattern
            .as_deref()
            .map(|p| RulePattern::compile(p, kind))
            .transpose()?;
        let path_pattern = match rule.pattern.as_deref() {
            Some(p) if rule.tool == ANY_TOOL => {
                let normalized = ctx.normalize_pattern(p);
                (normalized != p)
                    .then(|| RulePattern::compile(&normalized, PatternKind::Command))
                    .transpose()?
            },
            _ => None,
        };
        Ok(Self {
            rule,
            pattern,
            path_pattern,
        })
    }

    fn pattern_for(&self, subject: &RuleSubject<'_>) -> Option<&RulePattern> {
        match subject {
            RuleSubject::Path { .. } => self.path_pattern.as_ref().or(self.pattern.as_ref()),
            _ => self.pattern.as_ref(),
        }
    }

    fn matches(&self, query: &RuleQuery<'_>, now: Timestamp) -> bool {
        let rule = &self.rule;
        if rule.is_expired_at(now) || !rule.applies_to_tool(query.tool) {
            return false;
        }

        let visible = match rule.scope {
            RuleScope::Session => rule.session_id.as_ref() == Some(query.session_id),
            RuleScope::Workspace => {
                rule.workspace_id.is_some() && rule.workspace_id.as_ref() == query.workspace_id
            },
            RuleScope::Global => true,
        };
        if !visible {
            return false;
        }

        if let Some(exe) = rule.executable.as_deref() {
            let parsed = match query.subject {
                RuleSubject::Command { executable, .. } => executable,
                _ => None,
            };
            if parsed != Some(exe) {
                return false;
            }
        }

        let Some(pattern) = self.pattern_for(&query.subject) else {
            return true;
        };
        match query.subject {
            RuleSubject::Command { text, .. } => pattern.is_match(text),
            // A deny follows the path either way; anything more permissive
            // must match where the path actually leads.
            RuleSubject::Path { lexical, resolved } => {
                if rule.decision == Decision::Deny {
                    pattern.is_match(lexical) || pattern.is_match(resolved)
                } else {
                    pattern.is_match(resolved)
                }
            },
            RuleSubject::Other(Some(subject)) => pattern.is_match(subject),
            RuleSubject::Other(None) => false,
        }
    }

    fn to_match(&self, subject: &RuleSubject<'_>) -> RuleMatch {
        let criteria =
            u8::from(self.rule.executable.is_some()).saturating_add(u8::from(self.pattern.is_some()));
        RuleMatch {
            rule: self.rule.clone(),
            literal_prefix_len: self
                .pattern_for(subject)
                .map_or(0, RulePattern::literal_prefix_len),
            criteria,
        }
    }
}

/// Holds every policy rule.
///
/// Session rules live in memory keyed by session. Workspace and global
/// rules are persisted to a JSON document; each load-modify-save cycle runs
/// under an in-process mutex plus an exclusive file lock and is written
/// atomically (temp file + rename).
///
/// # Example
///
/// ```
/// use warden_core::{Decision, SessionId};
/// use warden_policy::{PolicyRule, RuleScope, RuleStore};
///
/// let store = RuleStore::in_memory();
/// let rule = PolicyRule::new("bash", Decision::Allow, RuleScope::Session)
///     .with_session(SessionId::new("s-1"))
///     .with_executable("ls");
/// let stored = store.add(rule).unwrap();
/// assert!(!stored.id.is_empty());
/// assert_eq!(store.clear_session_rules(&SessionId::new("s-1")), 1);
/// ```
pub struct RuleStore {
    session_rules: RwLock<HashMap<SessionId, Vec<CompiledRule>>>,
    persisted: RwLock<BTreeMap<RuleId, CompiledRule>>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
    ctx: PathContext,
    fresh: AtomicBool,
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("path", &self.path)
            .field("rules", &self.len())
            .finish_non_exhaustive()
    }
}

impl RuleStore {
    /// A store with no backing file. Presets can be seeded once.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::build(None, PathContext::from_env(), true)
    }

    /// An in-memory store that normalizes file patterns against `ctx`.
    #[must_use]
    pub fn in_memory_with_context(ctx: PathContext) -> Self {
        Self::build(None, ctx, true)
    }

    /// Open (or create on first write) the rules file at `path`.
    ///
    /// A missing file starts empty and allows [`seed_presets`](Self::seed_presets).
    /// A corrupt or unreadable file is moved aside to
    /// `<file>.corrupt-<millis>` and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Persistence`] if the parent directory cannot be
    /// created.
    pub fn open(path: impl Into<PathBuf>, ctx: PathContext) -> PolicyResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| persist_err(&path, e))?;
        }

        let (document, fresh) = match read_document(&path) {
            Ok(Some(doc)) => (doc, false),
            Ok(None) => (RulesDocument::default(), true),
            Err(reason) => {
                quarantine(&path, &reason);
                (RulesDocument::default(), false)
            },
        };

        let store = Self::build(Some(path), ctx, fresh);
        store.install_document(document);
        info!(
            path = ?store.path,
            rules = store.persisted_read().len(),
            fresh,
            "rule store opened"
        );
        Ok(store)
    }

    fn build(path: Option<PathBuf>, ctx: PathContext, fresh: bool) -> Self {
        Self {
            session_rules: RwLock::new(HashMap::new()),
            persisted: RwLock::new(BTreeMap::new()),
            path,
            write_lock: Mutex::new(()),
            ctx,
            fresh: AtomicBool::new(fresh),
        }
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add a rule, assigning an id when empty.
    ///
    /// File-tool patterns are normalized (`~` expansion, `.`/`..` and
    /// duplicate separator collapse) before storage. A rule with the same id
    /// replaces the old one.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] or [`PolicyError::InvalidPattern`]
    /// for malformed rules, and [`PolicyError::Persistence`] if the rules
    /// file cannot be written.
    pub fn add(&self, rule: PolicyRule) -> PolicyResult<PolicyRule> {
        let compiled = self.prepare(rule)?;
        let rule = compiled.rule.clone();

        if rule.scope == RuleScope::Session {
            let Some(session_id) = rule.session_id.clone() else {
                return Err(PolicyError::invalid_rule(
                    "session-scoped rules require a session_id",
                ));
            };
            let mut sessions = self.sessions_write();
            let rules = sessions.entry(session_id).or_default();
            rules.retain(|r| r.rule.id != rule.id);
            rules.push(compiled);
        } else {
            let stored = rule.clone();
            self.mutate_persisted(move |doc| {
                doc.rules.insert(stored.id.clone(), stored);
            })?;
        }

        debug!(
            rule_id = %rule.id,
            tool = %rule.tool,
            decision = %rule.decision,
            scope = %rule.scope,
            "rule added"
        );
        Ok(rule)
    }

    fn prepare(&self, mut rule: PolicyRule) -> PolicyResult<CompiledRule> {
        if rule.id.is_empty() {
            rule.id = RuleId::generate();
        }
        rule.validate()?;
        if rule.is_file_rule()
            && let Some(pattern) = rule.pattern.take()
        {
            rule.pattern = Some(self.ctx.normalize_pattern(&pattern));
        }
        CompiledRule::compile(rule, &self.ctx)
    }

    /// Remove a rule by id. Returns whether a rule was removed.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Persistence`] if the rules file cannot be
    /// written.
    pub fn remove(&self, id: &RuleId) -> PolicyResult<bool> {
        {
            let mut sessions = self.sessions_write();
            for rules in sessions.values_mut() {
                let before = rules.len();
                rules.retain(|r| &r.rule.id != id);
                if rules.len() != before {
                    debug!(rule_id = %id, "session rule removed");
                    return Ok(true);
                }
            }
        }

        let removed = self.mutate_persisted(|doc| doc.rules.remove(id).is_some())?;
        if removed {
            debug!(rule_id = %id, "rule removed");
        }
        Ok(removed)
    }

    /// Every visible, unexpired rule that matches the query.
    #[must_use]
    pub fn find_matching(&self, query: &RuleQuery<'_>) -> Vec<RuleMatch> {
        let now = Timestamp::now();
        let mut matches = Vec::new();
        {
            let sessions = self.sessions_read();
            if let Some(rules) = sessions.get(query.session_id) {
                matches.extend(
                    rules
                        .iter()
                        .filter(|r| r.matches(query, now))
                        .map(|r| r.to_match(&query.subject)),
                );
            }
        }
        matches.extend(
            self.persisted_read()
                .values()
                .filter(|r| r.matches(query, now))
                .map(|r| r.to_match(&query.subject)),
        );
        matches
    }

    /// Drop every rule of a session. Returns how many were dropped.
    pub fn clear_session_rules(&self, session_id: &SessionId) -> usize {
        let removed = self
            .sessions_write()
            .remove(session_id)
            .map_or(0, |rules| rules.len());
        if removed > 0 {
            debug!(session_id = %session_id, removed, "session rules cleared");
        }
        removed
    }

    /// All rules: session rules first, then persisted rules by id.
    #[must_use]
    pub fn list(&self) -> Vec<PolicyRule> {
        let mut out: Vec<PolicyRule> = self
            .sessions_read()
            .values()
            .flatten()
            .map(|r| r.rule.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.extend(self.persisted_read().values().map(|r| r.rule.clone()));
        out
    }

    /// Look up a rule by id.
    #[must_use]
    pub fn get(&self, id: &RuleId) -> Option<PolicyRule> {
        if let Some(rule) = self.persisted_read().get(id) {
            return Some(rule.rule.clone());
        }
        self.sessions_read()
            .values()
            .flatten()
            .find(|r| &r.rule.id == id)
            .map(|r| r.rule.clone())
    }

    /// Total number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        let sessions: usize = self.sessions_read().values().map(Vec::len).sum();
        sessions.saturating_add(self.persisted_read().len())
    }

    /// Whether the store holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired rules. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Persistence`] if the rules file cannot be
    /// written.
    pub fn purge_expired(&self) -> PolicyResult<usize> {
        let now = Timestamp::now();
        let mut removed: usize = 0;
        {
            let mut sessions = self.sessions_write();
            for rules in sessions.values_mut() {
                let before = rules.len();
                rules.retain(|r| !r.rule.is_expired_at(now));
                removed = removed.saturating_add(before.saturating_sub(rules.len()));
            }
            sessions.retain(|_, rules| !rules.is_empty());
        }

        let any_persisted_expired = self
            .persisted_read()
            .values()
            .any(|r| r.rule.is_expired_at(now));
        if any_persisted_expired {
            let purged = self.mutate_persisted(|doc| {
                let before = doc.rules.len();
                doc.rules.retain(|_, r| !r.is_expired_at(now));
                before.saturating_sub(doc.rules.len())
            })?;
            removed = removed.saturating_add(purged);
        }

        if removed > 0 {
            info!(removed, "expired rules purged");
        }
        Ok(removed)
    }

    /// Seed preset rules. Only the first call on a store whose file did not
    /// exist at open time has any effect. Returns how many were seeded.
    ///
    /// Session-scoped presets are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a preset is malformed or the rules file cannot be
    /// written.
    pub fn seed_presets(&self, presets: Vec<PolicyRule>) -> PolicyResult<usize> {
        if !self.fresh.swap(false, Ordering::SeqCst) {
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(presets.len());
        for preset in presets {
            if preset.scope == RuleScope::Session {
                warn!(tool = %preset.tool, "skipping session-scoped preset rule");
                continue;
            }
            prepared.push(self.prepare(preset)?.rule);
        }

        let count = prepared.len();
        self.mutate_persisted(move |doc| {
            for rule in prepared {
                doc.rules.entry(rule.id.clone()).or_insert(rule);
            }
        })?;
        info!(count, "preset rules seeded");
        Ok(count)
    }

    /// Re-read persisted rules from disk, picking up external edits.
    ///
    /// A corrupt file is quarantined and the store continues empty.
    pub fn reload(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| {
            warn!("RuleStore write lock poisoned, recovering");
            e.into_inner()
        });
        let doc = match read_document(path) {
            Ok(doc) => doc.unwrap_or_default(),
            Err(reason) => {
                quarantine(path, &reason);
                RulesDocument::default()
            },
        };
        self.install_document(doc);
    }

    fn mutate_persisted<T>(&self, f: impl FnOnce(&mut RulesDocument) -> T) -> PolicyResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| {
            warn!("RuleStore write lock poisoned, recovering");
            e.into_inner()
        });

        let Some(path) = self.path.as_deref() else {
            let mut doc = self.snapshot_document();
            let out = f(&mut doc);
            self.install_document(doc);
            return Ok(out);
        };

        let lock = open_lock_file(path)?;
        lock.lock_exclusive().map_err(|e| persist_err(path, e))?;

        let mut doc = match read_document(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => RulesDocument::default(),
            Err(reason) => {
                quarantine(path, &reason);
                RulesDocument::default()
            },
        };
        let out = f(&mut doc);
        let written = write_document(path, &doc);
        if let Err(e) = FileExt::unlock(&lock) {
            warn!(path = %path.display(), error = %e, "failed to release rules lock");
        }
        written?;

        self.install_document(doc);
        Ok(out)
    }

    fn snapshot_document(&self) -> RulesDocument {
        RulesDocument {
            version: RULES_DOCUMENT_VERSION,
            rules: self
                .persisted_read()
                .iter()
                .map(|(id, r)| (id.clone(), r.rule.clone()))
                .collect(),
        }
    }

    fn install_document(&self, doc: RulesDocument) {
        let mut compiled = BTreeMap::new();
        for (id, mut rule) in doc.rules {
            if rule.id != id {
                rule.id = id.clone();
            }
            if !rule.scope.is_persisted() {
                warn!(rule_id = %id, "ignoring session-scoped rule in rules file");
                continue;
            }
            match rule
                .validate()
                .and_then(|()| CompiledRule::compile(rule, &self.ctx)) {
                Ok(c) => {
                    compiled.insert(id, c);
                },
                Err(e) => warn!(rule_id = %id, error = %e, "ignoring invalid persisted rule"),
            }
        }
        *self.persisted.write().unwrap_or_else(|e| {
            warn!("RuleStore persisted lock poisoned, recovering");
            e.into_inner()
        }) = compiled;
    }

    fn sessions_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Vec<CompiledRule>>> {
        self.session_rules.read().unwrap_or_else(|e| {
            warn!("RuleStore session lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn sessions_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Vec<CompiledRule>>> {
        self.session_rules.write().unwrap_or_else(|e| {
            warn!("RuleStore session lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn persisted_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RuleId, CompiledRule>> {
        self.persisted.read().unwrap_or_else(|e| {
            warn!("RuleStore persisted lock poisoned, recovering");
            e.into_inner()
        })
    }
}

fn persist_err(path: &Path, source: std::io::Error) -> PolicyError {
    PolicyError::Persistence {
        path: path.display().to_string(),
        source,
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Read the rules document. `Ok(None)` when the file does not exist;
/// `Err` carries a description of why the file is unusable.
fn read_document(path: &Path) -> Result<Option<RulesDocument>, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("unreadable: {e}")),
    };
    let doc: RulesDocument =
        serde_json::from_str(&content).map_err(|e| format!("malformed JSON: {e}"))?;
    if doc.version != RULES_DOCUMENT_VERSION {
        return Err(format!("unsupported version {}", doc.version));
    }
    Ok(Some(doc))
}

fn quarantine(path: &Path, reason: &str) {
    let target = sibling_with_suffix(
        path,
        &format!(".corrupt-{}", Timestamp::now().as_millis()),
    );
    match std::fs::rename(path, &target) {
        Ok(()) => warn!(
            path = %path.display(),
            moved_to = %target.display(),
            reason,
            "rules file unusable, moved aside; starting empty"
        ),
        Err(e) => warn!(
            path = %path.display(),
            reason,
            error = %e,
            "rules file unusable and could not be moved aside; starting empty"
        ),
    }
}

fn open_lock_file(path: &Path) -> PolicyResult<File> {
    let lock_path = sibling_with_suffix(path, ".lock");
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| persist_err(&lock_path, e))
}

fn write_document(path: &Path, doc: &RulesDocument) -> PolicyResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(doc)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| persist_err(path, e))?;
    tmp.write_all(&json).map_err(|e| persist_err(path, e))?;
    tmp.as_file().sync_all().map_err(|e| persist_err(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| persist_err(path, e))?;
    }
    tmp.persist(path).map_err(|e| persist_err(path, e.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
