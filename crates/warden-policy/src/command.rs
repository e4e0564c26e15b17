//! Best-effort shell command analysis.
//!
//! This is not a shell parser. It understands just enough quoting to find
//! pipeline stages, command lists, one level of command substitution, and
//! the executable of a simple command. Variables are never expanded.
//!
//! Every entry point caps its input at [`MAX_ANALYZED_LEN`] bytes, so
//! pathological input degrades to fewer matches instead of unbounded work.

use warden_core::truncate_to_boundary;

/// Maximum number of bytes of a command that is analyzed.
pub const MAX_ANALYZED_LEN: usize = 64 * 1024;

/// `sudo` flags that consume the following word.
const SUDO_ARG_FLAGS: &[&str] = &[
    "-u", "-g", "-p", "-C", "-U", "-r", "-t", "-D", "-R", "-h", "-T", "--user", "--group",
    "--prompt", "--chdir",
];

/// `env` flags that consume the following word.
const ENV_ARG_FLAGS: &[&str] = &["-u", "-C", "-S", "--unset", "--chdir", "--split-string"];

/// Truncate a command to the analyzed length.
#[must_use]
pub fn cap(command: &str) -> &str {
    truncate_to_boundary(command, MAX_ANALYZED_LEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitMode {
    /// Split on `|` and `|&`.
    Pipes,
    /// Split on `;`, `&&`, `||`, `&` and newlines.
    Lists,
}

/// Split a command into pipeline stages.
///
/// Splits on unquoted, unescaped `|` and `|&`. `||` is not a pipe, and a `|`
/// inside `$(...)` or backticks belongs to the enclosing stage. Stages are
/// trimmed and empty stages dropped.
#[must_use]
pub fn split_pipeline_stages(command: &str) -> Vec<String> {
    split_top_level(cap(command), SplitMode::Pipes)
}

/// Split a pipeline stage into the simple commands of a command list.
#[must_use]
pub fn split_command_list(stage: &str) -> Vec<String> {
    split_top_level(cap(stage), SplitMode::Lists)
}

fn split_top_level(text: &str, mode: SplitMode) -> Vec<String> {
    fn flush(parts: &mut Vec<String>, current: &mut String) {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_owned());
        }
        current.clear();
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut single = false;
    let mut double = false;
    let mut backtick = false;
    let mut depth: usize = 0;
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        if single {
            current.push(c);
            if c == '\'' {
                single = false;
            }
            prev = Some(c);
            continue;
        }

        let top_level = !double && !backtick && depth == 0;
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                prev = None;
                continue;
            },
            '\'' if !double => single = true,
            '"' => double = !double,
            '`' => backtick = !backtick,
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                current.push_str("$(");
                depth = depth.saturating_add(1);
                prev = Some('(');
                continue;
            },
            '(' if depth > 0 => depth = depth.saturating_add(1),
            ')' if depth > 0 => depth = depth.saturating_sub(1),
            '|' if top_level && mode == SplitMode::Pipes => {
                if chars.next_if_eq(&'|').is_some() {
                    current.push_str("||");
                    prev = Some('|');
                    continue;
                }
                chars.next_if_eq(&'&');
                flush(&mut parts, &mut current);
                prev = None;
                continue;
            },
            '|' if top_level && mode == SplitMode::Lists => {
                if chars.next_if_eq(&'|').is_some() {
                    flush(&mut parts, &mut current);
                    prev = None;
                    continue;
                }
            },
            '&' if top_level && mode == SplitMode::Lists => {
                if chars.next_if_eq(&'&').is_some() {
                    flush(&mut parts, &mut current);
                    prev = None;
                    continue;
                }
                // `2>&1`, `<&3` and `&>file` are redirections.
                let redirect = matches!(prev, Some('>' | '<')) || chars.peek() == Some(&'>');
                if !redirect {
                    flush(&mut parts, &mut current);
                    prev = None;
                    continue;
                }
            },
            ';' | '\n' if top_level && mode == SplitMode::Lists => {
                flush(&mut parts, &mut current);
                prev = None;
                continue;
            },
            _ => {},
        }
        current.push(c);
        prev = Some(c);
    }
    flush(&mut parts, &mut current);
    parts
}

/// Extract the outermost `$(...)` and backtick spans of a command.
///
/// Only one level is extracted: a substitution nested inside another stays
/// part of its parent's text. Spans inside single quotes are ignored and an
/// unterminated span yields nothing.
#[must_use]
pub fn extract_command_substitutions(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = cap(command).chars().peekable();
    let mut single = false;
    let mut double = false;

    while let Some(c) = chars.next() {
        if single {
            if c == '\'' {
                single = false;
            }
            continue;
        }
        let span = match c {
            '\\' => {
                chars.next();
                continue;
            },
            '\'' if !double => {
                single = true;
                continue;
            },
            '"' => {
                double = !double;
                continue;
            },
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                take_paren_span(&mut chars)
            },
            '`' => take_backtick_span(&mut chars),
            _ => continue,
        };
        let Some(inner) = span else {
            break;
        };
        let trimmed = inner.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_owned());
        }
    }
    out
}

fn take_paren_span(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut inner = String::new();
    let mut depth: usize = 1;
    let mut single = false;

    while let Some(c) = chars.next() {
        if single {
            inner.push(c);
            if c == '\'' {
                single = false;
            }
            continue;
        }
        match c {
            '\\' => {
                inner.push(c);
                if let Some(next) = chars.next() {
                    inner.push(next);
                }
                continue;
            },
            '\'' => single = true,
            '(' => depth = depth.saturating_add(1),
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(inner);
                }
            },
            _ => {},
        }
        inner.push(c);
    }
    None
}

fn take_backtick_span(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut inner = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                inner.push(c);
                if let Some(next) = chars.next() {
                    inner.push(next);
                }
            },
            '`' => return Some(inner),
            _ => inner.push(c),
        }
    }
    None
}

/// The texts the detectors look at: the command plus each extracted
/// substitution.
#[must_use]
pub fn analysis_units(command: &str) -> Vec<String> {
    let capped = cap(command);
    let mut units = vec![capped.to_owned()];
    units.extend(extract_command_substitutions(capped));
    units
}

/// Split text into words, honoring single quotes, double quotes, and
/// backslash escapes. Quotes are removed.
#[must_use]
pub fn shell_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut single = false;
    let mut double = false;
    let mut chars = cap(text).chars().peekable();

    while let Some(c) = chars.next() {
        if single {
            if c == '\'' {
                single = false;
            } else {
                current.push(c);
            }
            continue;
        }
        if double {
            match c {
                '"' => double = false,
                '\\' => match chars.next_if(|n| matches!(n, '"' | '\\' | '$' | '`')) {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                _ => current.push(c),
            }
            continue;
        }
        match c {
            '\'' => {
                single = true;
                in_word = true;
            },
            '"' => {
                double = true;
                in_word = true;
            },
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            },
            _ => {
                current.push(c);
                in_word = true;
            },
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// The executable of a simple command.
///
/// Leading `sudo` (and its flags), `env` (and its flags) and `NAME=value`
/// assignments are skipped; quotes are removed. Returns `None` when no word
/// remains.
#[must_use]
pub fn parse_executable(command: &str) -> Option<String> {
    let words = shell_words(command);
    let mut rest: &[String] = &words;

    loop {
        let (first, tail) = rest.split_first()?;
        if is_assignment(first) {
            rest = tail;
            continue;
        }
        match first.as_str() {
            "sudo" => rest = skip_flags(tail, SUDO_ARG_FLAGS),
            "env" => rest = skip_flags(tail, ENV_ARG_FLAGS),
            "" => return None,
            _ => return Some(first.clone()),
        }
    }
}

fn skip_flags<'a>(words: &'a [String], arg_flags: &[&str]) -> &'a [String] {
    let mut rest = words;
    while let Some((word, tail)) = rest.split_first() {
        if word == "--" {
            return tail;
        }
        if !word.starts_with('-') {
            break;
        }
        rest = if arg_flags.contains(&word.as_str()) {
            tail.get(1..).unwrap_or_default()
        } else {
            tail
        };
    }
    rest
}

/// Whether a word is a `NAME=value` assignment.
#[must_use]
pub fn is_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The last path component of an executable (`/usr/bin/curl` → `curl`).
#[must_use]
pub fn basename(executable: &str) -> &str {
    executable.rsplit('/').next().unwrap_or(executable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_simple() {
        assert_eq!(
            split_pipeline_stages("cat file | grep x | wc -l"),
            vec!["cat file", "grep x", "wc -l"]
        );
    }

    #[test]
    fn test_double_pipe_is_not_a_pipe() {
        assert_eq!(
            split_pipeline_stages("make || echo failed"),
            vec!["make || echo failed"]
        );
    }

    #[test]
    fn test_pipe_ampersand_is_a_pipe() {
        assert_eq!(
            split_pipeline_stages("build |& tee log"),
            vec!["build", "tee log"]
        );
    }

    #[test]
    fn test_quoted_and_escaped_pipes_ignored() {
        assert_eq!(
            split_pipeline_stages(r#"echo 'a|b' "c|d" e\|f"#),
            vec![r#"echo 'a|b' "c|d" e\|f"#]
        );
    }

    #[test]
    fn test_pipe_inside_substitution_stays_in_stage() {
        assert_eq!(
            split_pipeline_stages("echo $(cat x | base64) | nc host 80"),
            vec!["echo $(cat x | base64)", "nc host 80"]
        );
        assert_eq!(
            split_pipeline_stages("echo `ls | head` | sh"),
            vec!["echo `ls | head`", "sh"]
        );
    }

    #[test]
    fn test_empty_stages_dropped() {
        assert_eq!(split_pipeline_stages("  | ls |  "), vec!["ls"]);
    }

    #[test]
    fn test_command_list_split() {
        assert_eq!(
            split_command_list("cd /tmp && curl x; ls || true & wait"),
            vec!["cd /tmp", "curl x", "ls", "true", "wait"]
        );
    }

    #[test]
    fn test_command_list_keeps_redirections() {
        assert_eq!(
            split_command_list("make 2>&1 &>log"),
            vec!["make 2>&1 &>log"]
        );
    }

    #[test]
    fn test_substitutions_one_level() {
        assert_eq!(
            extract_command_substitutions("echo $(cat $(ls ~/.ssh)) `whoami`"),
            vec!["cat $(ls ~/.ssh)", "whoami"]
        );
    }

    #[test]
    fn test_substitution_in_double_quotes() {
        assert_eq!(
            extract_command_substitutions(r#"curl -H "X: $(cat token)" x"#),
            vec!["cat token"]
        );
    }

    #[test]
    fn test_substitution_in_single_quotes_ignored() {
        assert!(extract_command_substitutions("echo '$(rm -rf /)'").is_empty());
    }

    #[test]
    fn test_unterminated_substitution_yields_nothing() {
        assert!(extract_command_substitutions("echo $(cat x").is_empty());
        assert!(extract_command_substitutions("echo `cat x").is_empty());
        assert_eq!(
            extract_command_substitutions("echo $(a) $(b"),
            vec!["a"]
        );
    }

    #[test]
    fn test_shell_words_quotes() {
        assert_eq!(
            shell_words(r#"git commit -m "fix: a \"b\"" 'c d' e\ f"#),
            vec!["git", "commit", "-m", r#"fix: a "b""#, "c d", "e f"]
        );
        assert_eq!(shell_words("echo ''"), vec!["echo", ""]);
    }

    #[test]
    fn test_parse_executable_plain() {
        assert_eq!(parse_executable("ls -la"), Some("ls".to_owned()));
        assert_eq!(
            parse_executable("/usr/bin/curl x"),
            Some("/usr/bin/curl".to_owned())
        );
    }

    #[test]
    fn test_parse_executable_strips_prefixes() {
        assert_eq!(
            parse_executable("sudo -u root -E git push"),
            Some("git".to_owned())
        );
        assert_eq!(
            parse_executable("env -i FOO=1 BAR=2 python3 x.py"),
            Some("python3".to_owned())
        );
        assert_eq!(
            parse_executable("RUST_LOG=debug cargo test"),
            Some("cargo".to_owned())
        );
        assert_eq!(
            parse_executable("sudo -- 'rm' -rf x"),
            Some("rm".to_owned())
        );
    }

    #[test]
    fn test_parse_executable_none() {
        assert_eq!(parse_executable(""), None);
        assert_eq!(parse_executable("FOO=bar"), None);
        assert_eq!(parse_executable("sudo -u"), None);
        assert_eq!(parse_executable("   "), None);
    }

    #[test]
    fn test_assignment_and_basename() {
        assert!(is_assignment("A_1=x"));
        assert!(!is_assignment("1A=x"));
        assert!(!is_assignment("--data=x"));
        assert_eq!(basename("/bin/bash"), "bash");
        assert_eq!(basename("sh"), "sh");
    }

    #[test]
    fn test_oversized_input_is_capped() {
        let long = format!("echo {}", "a|".repeat(MAX_ANALYZED_LEN));
        let stages = split_pipeline_stages(&long);
        assert!(stages.len() <= MAX_ANALYZED_LEN);
        assert!(analysis_units(&long)[0].len() <= MAX_ANALYZED_LEN);
    }
}
