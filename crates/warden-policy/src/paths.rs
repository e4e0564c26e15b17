//! Path normalization for file tools and rule patterns.
//!
//! Normalization is lexical: `~`, `$HOME` and `${HOME}` are expanded,
//! relative paths are anchored at the request's working directory when one
//! is known, and `.`/`..`/duplicate separators are collapsed. Symlink
//! resolution is a separate, best-effort filesystem probe.

use std::path::{Component, Path, PathBuf};

/// Home and working directory used to anchor paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathContext {
    /// The user's home directory.
    pub home: Option<PathBuf>,
    /// Working directory of the current request.
    pub cwd: Option<PathBuf>,
    /// `home` with symlinks resolved, when it differs.
    resolved_home: Option<PathBuf>,
}

impl PathContext {
    /// Context with an explicit home and no working directory.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self::with_home(Some(home.into()))
    }

    /// Context for the current user.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_home(directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
    }

    fn with_home(home: Option<PathBuf>) -> Self {
        let resolved_home = home
            .as_deref()
            .and_then(resolve_symlinks)
            .filter(|resolved| Some(resolved) != home.as_ref());
        Self {
            home,
            cwd: None,
            resolved_home,
        }
    }

    /// The home directory as written and, when it goes through a symlink,
    /// its resolved form.
    #[must_use]
    pub fn home_dirs(&self) -> impl Iterator<Item = &Path> {
        self.home.iter().chain(&self.resolved_home).map(PathBuf::as_path)
    }

    /// A copy anchored at `cwd`. Relative or empty values are ignored.
    #[must_use]
    pub fn with_cwd(&self, cwd: Option<&str>) -> Self {
        let cwd = cwd
            .map(|c| self.expand_home(c))
            .map(PathBuf::from)
            .filter(|p| p.is_absolute());
        Self {
            home: self.home.clone(),
            cwd: cwd.or_else(|| self.cwd.clone()),
            resolved_home: self.resolved_home.clone(),
        }
    }

    /// Expand a leading `~`, `$HOME` or `${HOME}`.
    #[must_use]
    pub fn expand_home(&self, raw: &str) -> String {
        let Some(home) = self.home.as_deref() else {
            return raw.to_owned();
        };
        for prefix in ["${HOME}", "$HOME", "~"] {
            if let Some(rest) = raw.strip_prefix(prefix)
                && (rest.is_empty() || rest.starts_with('/'))
            {
                return format!("{}{rest}", home.display());
            }
        }
        raw.to_owned()
    }

    /// Lexically normalize a path as the agent wrote it.
    ///
    /// Returns `None` for empty input.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> Option<PathBuf> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let expanded = PathBuf::from(self.expand_home(trimmed));
        let anchored = match (&self.cwd, expanded.is_absolute()) {
            (Some(cwd), false) => cwd.join(expanded),
            _ => expanded,
        };
        Some(lexical_normalize(&anchored))
    }

    /// Normalize a glob pattern for storage.
    ///
    /// Glob metacharacters are kept; only `~` expansion and separator,
    /// `.` and `..` collapsing are applied.
    #[must_use]
    pub fn normalize_pattern(&self, pattern: &str) -> String {
        let expanded = self.expand_home(pattern.trim());
        let absolute = expanded.starts_with('/');
        let mut parts: Vec<&str> = Vec::new();
        for part in expanded.split('/') {
            match part {
                "" | "." => {},
                ".." => {
                    if parts.last().is_some_and(|p| *p != "..") {
                        parts.pop();
                    } else if !absolute {
                        parts.push("..");
                    }
                },
                other => parts.push(other),
            }
        }
        let joined = parts.join("/");
        if absolute {
            format!("/{joined}")
        } else {
            joined
        }
    }
}

/// Collapse `.`, `..` and duplicate separators without touching the
/// filesystem. `..` never climbs above the root.
#[must_use]
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                let climbable = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if climbable {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Resolve symlinks, best effort.
///
/// When the path does not exist, the longest existing ancestor is
/// canonicalized and the remaining components are appended. Returns `None`
/// when nothing along the path can be resolved.
#[must_use]
pub fn resolve_symlinks(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Some(resolved);
    }
    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    let mut ancestor = path;
    loop {
        missing.push(ancestor.file_name()?);
        ancestor = ancestor.parent()?;
        if let Ok(resolved) = std::fs::canonicalize(ancestor) {
            let mut out = resolved;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }
    }
}

/// Both forms of a file path that policy decisions look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// Lexically normalized path.
    pub lexical: PathBuf,
    /// Symlink-resolved path; the lexical path when resolution fails.
    pub resolved: PathBuf,
}

impl NormalizedPath {
    /// Normalize and resolve `raw`. Returns `None` for empty input.
    ///
    /// Relative paths (no usable working directory) are never probed, since
    /// they would resolve against the daemon's own directory.
    #[must_use]
    pub fn new(raw: &str, ctx: &PathContext) -> Option<Self> {
        let lexical = ctx.normalize(raw)?;
        let resolved = lexical
            .is_absolute()
            .then(|| resolve_symlinks(&lexical))
            .flatten()
            .unwrap_or_else(|| lexical.clone());
        Some(Self { lexical, resolved })
    }

    /// The lexical path as a string.
    #[must_use]
    pub fn lexical_str(&self) -> String {
        self.lexical.to_string_lossy().into_owned()
    }

    /// The resolved path as a string.
    #[must_use]
    pub fn resolved_str(&self) -> String {
        self.resolved.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PathContext {
        PathContext::new("/home/dev")
    }

    #[test]
    fn test_expand_home_forms() {
        let c = ctx();
        assert_eq!(c.expand_home("~/.ssh/id_rsa"), "/home/dev/.ssh/id_rsa");
        assert_eq!(c.expand_home("$HOME/.aws"), "/home/dev/.aws");
        assert_eq!(c.expand_home("${HOME}"), "/home/dev");
        assert_eq!(c.expand_home("~other/x"), "~other/x");
        assert_eq!(c.expand_home("$HOMEDIR/x"), "$HOMEDIR/x");
    }

    #[test]
    fn test_normalize_collapses_dots() {
        let c = ctx();
        assert_eq!(
            c.normalize("/home/dev/project/../.ssh//id_rsa").unwrap(),
            PathBuf::from("/home/dev/.ssh/id_rsa")
        );
        assert_eq!(
            c.normalize("/../../etc/./passwd").unwrap(),
            PathBuf::from("/etc/passwd")
        );
        assert!(c.normalize("  ").is_none());
    }

    #[test]
    fn test_relative_paths_anchor_at_cwd() {
        let c = ctx().with_cwd(Some("/work/repo"));
        assert_eq!(
            c.normalize("src/../Cargo.toml").unwrap(),
            PathBuf::from("/work/repo/Cargo.toml")
        );
        // Relative cwd is ignored.
        let c = ctx().with_cwd(Some("repo"));
        assert_eq!(c.normalize("a/b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_normalize_pattern() {
        let c = ctx();
        assert_eq!(c.normalize_pattern("~/src//**"), "/home/dev/src/**");
        assert_eq!(c.normalize_pattern("/a/./b/../c/*.rs"), "/a/c/*.rs");
        assert_eq!(c.normalize_pattern("../x/**"), "../x/**");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_symlinks_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("key"), "x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve_symlinks(&link.join("key")).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(real.join("key")).unwrap());

        // Missing leaf under a symlinked directory still resolves.
        let resolved = resolve_symlinks(&link.join("missing.txt")).unwrap();
        assert_eq!(
            resolved,
            std::fs::canonicalize(&real).unwrap().join("missing.txt")
        );
    }
}
