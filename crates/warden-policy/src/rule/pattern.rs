//! Compiled rule patterns.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{PolicyError, PolicyResult};

/// Characters that start a glob metasequence.
const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

/// What a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PatternKind {
    /// Normalized file paths: `*` stays within a component, `**` crosses.
    Path,
    /// Raw command text: `*` matches anything, including `/`.
    Command,
}

/// A glob compiled once at insertion time.
#[derive(Debug, Clone)]
pub(crate) struct RulePattern {
    matcher: GlobMatcher,
    literal_prefix_len: usize,
}

impl RulePattern {
    pub(crate) fn compile(pattern: &str, kind: PatternKind) -> PolicyResult<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(kind == PatternKind::Path)
            .backslash_escape(true)
            .build()
            .map_err(|e| PolicyError::InvalidPattern {
                pattern: pattern.to_owned(),
                reason: e.kind().to_string(),
            })?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            literal_prefix_len: literal_prefix(pattern).chars().count(),
        })
    }

    pub(crate) fn is_match(&self, subject: &str) -> bool {
        self.matcher.is_match(subject)
    }

    pub(crate) fn literal_prefix_len(&self) -> usize {
        self.literal_prefix_len
    }
}

/// The text before the first `*`, `?`, `[` or `{` of a pattern.
#[must_use]
pub fn literal_prefix(pattern: &str) -> &str {
    pattern
        .find(GLOB_META)
        .and_then(|i| pattern.get(..i))
        .unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("git push*"), "git push");
        assert_eq!(literal_prefix("/src/**/*.rs"), "/src/");
        assert_eq!(literal_prefix("exact"), "exact");
        assert_eq!(literal_prefix("{a,b}"), "");
    }

    #[test]
    fn test_path_star_stays_in_component() {
        let p = RulePattern::compile("/work/*", PatternKind::Path).unwrap();
        assert!(p.is_match("/work/a.txt"));
        assert!(!p.is_match("/work/sub/a.txt"));

        let p = RulePattern::compile("/work/**", PatternKind::Path).unwrap();
        assert!(p.is_match("/work/sub/a.txt"));
        assert!(!p.is_match("/other/a.txt"));
    }

    #[test]
    fn test_command_star_crosses_slashes() {
        let p = RulePattern::compile("git *", PatternKind::Command).unwrap();
        assert!(p.is_match("git push origin feature/x"));
        assert!(!p.is_match("gitk"));
        assert_eq!(p.literal_prefix_len(), 4);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(matches!(
            RulePattern::compile("a[", PatternKind::Command),
            Err(PolicyError::InvalidPattern { .. })
        ));
    }
}
