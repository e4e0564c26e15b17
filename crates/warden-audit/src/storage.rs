//! Audit log storage trait and its JSONL and in-memory implementations.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::{info, warn};
use warden_core::{SessionId, Timestamp};

use crate::entry::{AuditEntry, AuditEntryId};
use crate::error::{AuditError, AuditResult};

/// Page size used when a query does not set one.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// A page request over the log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    /// Maximum number of entries returned.
    pub limit: usize,
    /// Only entries strictly older than this.
    pub before: Option<Timestamp>,
    /// Only entries written before this entry. Unlike `before`, this is
    /// exact when several entries share a millisecond, so pages chain
    /// through it.
    pub older_than: Option<AuditEntryId>,
    /// Only entries of this session.
    pub session_id: Option<SessionId>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUERY_LIMIT,
            before: None,
            older_than: None,
            session_id: None,
        }
    }
}

impl AuditQuery {
    /// A query for the newest `limit` entries.
    #[must_use]
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Only entries older than `before`.
    #[must_use]
    pub fn before(mut self, before: Timestamp) -> Self {
        self.before = Some(before);
        self
    }

    /// Only entries written before the entry `id`, i.e. the page after one
    /// ending at `id`.
    #[must_use]
    pub fn older_than(mut self, id: AuditEntryId) -> Self {
        self.older_than = Some(id);
        self
    }

    /// Only entries of `session_id`.
    #[must_use]
    pub fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Whether `entry` passes the filters.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.before.is_none_or(|b| entry.timestamp < b)
            && self
                .session_id
                .as_ref()
                .is_none_or(|s| &entry.session_id == s)
    }
}

/// Collects one page from entries offered newest first.
struct Page<'q> {
    query: &'q AuditQuery,
    past_cursor: bool,
    entries: Vec<AuditEntry>,
}

impl<'q> Page<'q> {
    fn new(query: &'q AuditQuery) -> Self {
        Self {
            query,
            past_cursor: query.older_than.is_none(),
            entries: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.query.limit
    }

    /// Offer the next older entry. Returns `true` once the page is full.
    fn offer(&mut self, entry: AuditEntry) -> bool {
        if !self.past_cursor {
            // The cursor entry itself belongs to the previous page.
            self.past_cursor = self.query.older_than == Some(entry.id);
            return false;
        }
        if self.query.matches(&entry) {
            self.entries.push(entry);
        }
        self.is_full()
    }
}

/// Storage backend for audit logs.
///
/// Implementations must be thread-safe, append-only, and return query
/// results newest first.
pub trait AuditStorage: Send + Sync {
    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    fn append(&self, entry: &AuditEntry) -> AuditResult<()>;

    /// Entries matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>>;

    /// Count readable entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn count(&self) -> AuditResult<usize>;

    /// Flush pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails to flush.
    fn flush(&self) -> AuditResult<()>;
}

struct ActiveFile {
    file: Option<File>,
    size: u64,
}

/// JSON-lines storage with size-based rotation.
///
/// The active file is `<dir>/<stem>.jsonl`. When a write would push it past
/// `max_file_bytes`, it is renamed to `<stem>.<millis>.jsonl` first and a
/// fresh active file is started. Rotated files are never rewritten.
pub struct JsonlAuditStorage {
    path: PathBuf,
    max_file_bytes: u64,
    active: Mutex<ActiveFile>,
}

impl JsonlAuditStorage {
    /// Open (creating if needed) the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>, max_file_bytes: u64) -> AuditResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        info!(path = %path.display(), size, "audit log opened");
        Ok(Self {
            path,
            max_file_bytes,
            active: Mutex::new(ActiveFile {
                file: Some(file),
                size,
            }),
        })
    }

    /// Path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the active file to a timestamped segment and start a new one.
    ///
    /// Does nothing when the active file is empty. Returns the segment path.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename or reopen fails.
    pub fn rotate(&self) -> AuditResult<Option<PathBuf>> {
        let mut active = self.lock_active();
        self.rotate_locked(&mut active)
    }

    fn rotate_locked(&self, active: &mut ActiveFile) -> AuditResult<Option<PathBuf>> {
        if active.size == 0 {
            return Ok(None);
        }
        if let Some(file) = active.file.take() {
            file.sync_all()?;
        }

        let mut millis = Timestamp::now().as_millis();
        let mut target = self.segment_path(millis);
        while target.exists() {
            millis = millis.saturating_add(1);
            target = self.segment_path(millis);
        }
        std::fs::rename(&self.path, &target)?;

        active.file = Some(open_append(&self.path)?);
        active.size = 0;
        info!(segment = %target.display(), "audit log rotated");
        Ok(Some(target))
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "audit".to_owned(), |s| s.to_string_lossy().into_owned())
    }

    fn segment_path(&self, millis: i64) -> PathBuf {
        self.path.with_file_name(format!("{}.{millis}.jsonl", self.stem()))
    }

    /// Rotated segments, newest first.
    fn segments(&self) -> AuditResult<Vec<PathBuf>> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let prefix = format!("{}.", self.stem());
        let mut segments: Vec<(i64, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let millis = name
                    .strip_prefix(&prefix)?
                    .strip_suffix(".jsonl")?
                    .parse::<i64>()
                    .ok()?;
                Some((millis, e.path()))
            })
            .collect();
        segments.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(segments.into_iter().map(|(_, p)| p).collect())
    }

    /// Every readable file, newest first.
    fn files_newest_first(&self) -> AuditResult<Vec<PathBuf>> {
        let mut files = vec![self.path.clone()];
        files.extend(self.segments()?);
        Ok(files)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, ActiveFile> {
        self.active.lock().unwrap_or_else(|e| {
            warn!("audit file lock poisoned, recovering");
            e.into_inner()
        })
    }
}

impl AuditStorage for JsonlAuditStorage {
    fn append(&self, entry: &AuditEntry) -> AuditResult<()> {
        let mut line =
            serde_json::to_vec(entry).map_err(|e| AuditError::SerializationError(e.to_string()))?;
        line.push(b'\n');
        let len = u64::try_from(line.len()).unwrap_or(u64::MAX);

        let mut active = self.lock_active();
        if active.size > 0 && active.size.saturating_add(len) > self.max_file_bytes {
            self.rotate_locked(&mut active)?;
        }
        if active.file.is_none() {
            active.file = Some(open_append(&self.path)?);
        }
        let Some(file) = active.file.as_mut() else {
            return Err(AuditError::StorageError("audit file unavailable".to_owned()));
        };
        file.write_all(&line)?;
        file.flush()?;
        active.size = active.size.saturating_add(len);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let mut page = Page::new(query);
        if page.is_full() {
            return Ok(page.entries);
        }
        // Holding the lock keeps rotation from moving files mid-read.
        let _active = self.lock_active();
        for path in self.files_newest_first()? {
            for entry in read_entries(&path)?.into_iter().rev() {
                if page.offer(entry) {
                    return Ok(page.entries);
                }
            }
        }
        Ok(page.entries)
    }

    fn count(&self) -> AuditResult<usize> {
        let _active = self.lock_active();
        let mut total: usize = 0;
        for path in self.files_newest_first()? {
            total = total.saturating_add(read_entries(&path)?.len());
        }
        Ok(total)
    }

    fn flush(&self) -> AuditResult<()> {
        let active = self.lock_active();
        if let Some(file) = active.file.as_ref() {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for JsonlAuditStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAuditStorage")
            .field("path", &self.path)
            .field("max_file_bytes", &self.max_file_bytes)
            .finish_non_exhaustive()
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Parse a JSONL file in file order, skipping lines that do not parse.
fn read_entries(path: &Path) -> AuditResult<Vec<AuditEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                path = %path.display(),
                line = idx.saturating_add(1),
                error = %e,
                "skipping unparseable audit line"
            ),
        }
    }
    Ok(entries)
}

/// In-memory storage for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditStorage {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AuditStorage for MemoryAuditStorage {
    fn append(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.entries
            .write()
            .map_err(|e| AuditError::StorageError(e.to_string()))?
            .push(entry.clone());
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::StorageError(e.to_string()))?;
        let mut page = Page::new(query);
        if page.is_full() {
            return Ok(page.entries);
        }
        for entry in entries.iter().rev() {
            if page.offer(entry.clone()) {
                break;
            }
        }
        Ok(page.entries)
    }

    fn count(&self) -> AuditResult<usize> {
        Ok(self
            .entries
            .read()
            .map_err(|e| AuditError::StorageError(e.to_string()))?
            .len())
    }

    fn flush(&self) -> AuditResult<()> {
        Ok(())
    }
}
