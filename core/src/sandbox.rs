//! Pure validation of working directories and free-text prompts.
//!
//! Nothing here has side effects: both checks produce either a cleaned
//! value or a typed rejection, and the caller decides what to do with it.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::PathRejection;
use crate::error::PromptRejection;

/// Literal command that clears the context document. Matched upstream on
/// the raw prompt before sanitization, so it never reaches
/// [`sanitize_prompt`].
pub const RESET_KEYWORD: &str = "/clear";

/// Stripped from prompts wholesale. The prompt is data for the assistant's
/// stdin, never a shell string, so this is defense in depth rather than
/// quoting.
const SHELL_METACHARACTERS: &[char] = &[
    '`', '$', '|', '&', ';', '<', '>', '(', ')', '{', '}', '[', ']', '\\',
];

/// Destructive-verb denylist. Every pattern ends on a word boundary so
/// substrings like "formatting" or "executed" do not trip it.
const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf", r"(?i)\brm\s+-rf\b"),
    ("delete", r"(?i)\bdelete\b"),
    ("format", r"(?i)\bformat\b"),
    ("shutdown", r"(?i)\bshutdown\b"),
    ("reboot", r"(?i)\breboot\b"),
    ("restart", r"(?i)\brestart\b"),
    ("exec", r"(?i)\bexec\b"),
    ("eval", r"(?i)\beval\b"),
    ("system", r"(?i)\bsystem\b"),
];

static BLOCKED_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .map(|(name, pattern)| {
            #[expect(clippy::expect_used)]
            let regex = Regex::new(pattern).expect("static denylist pattern must compile");
            (*name, regex)
        })
        .collect()
});

/// Resolve `path` to a canonical absolute directory, rejecting traversal
/// segments, home-directory shorthand, and anything under `denied_roots`.
pub fn validate_directory(path: &Path, denied_roots: &[PathBuf]) -> Result<PathBuf, PathRejection> {
    if !path.is_absolute() {
        return Err(PathRejection::PathTraversal(path.to_path_buf()));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(PathRejection::PathTraversal(path.to_path_buf()));
            }
            Component::Normal(part) => {
                if part.to_string_lossy().starts_with('~') {
                    return Err(PathRejection::PathTraversal(path.to_path_buf()));
                }
            }
            _ => {}
        }
    }

    let resolved = path
        .canonicalize()
        .map_err(|_| PathRejection::NotFound(path.to_path_buf()))?;
    if !resolved.is_dir() {
        return Err(PathRejection::NotFound(path.to_path_buf()));
    }

    for root in denied_roots {
        if resolved.starts_with(root) {
            return Err(PathRejection::SystemDirectory(resolved));
        }
    }

    Ok(resolved)
}

/// Clean a free-text prompt: strip shell metacharacters, collapse
/// whitespace runs, enforce `max_len`, and reject destructive verbs.
pub fn sanitize_prompt(text: &str, max_len: usize) -> Result<String, PromptRejection> {
    if text.trim().is_empty() {
        return Err(PromptRejection::Empty);
    }

    let stripped: String = text
        .chars()
        .filter(|c| !SHELL_METACHARACTERS.contains(c))
        .collect();
    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.is_empty() {
        return Err(PromptRejection::Empty);
    }
    if cleaned.chars().count() > max_len {
        return Err(PromptRejection::TooLong {
            actual: cleaned.chars().count(),
            max: max_len,
        });
    }

    for (name, regex) in BLOCKED_REGEXES.iter() {
        if regex.is_match(&cleaned) {
            return Err(PromptRejection::BlockedPattern(name));
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn denied() -> Vec<PathBuf> {
        vec![PathBuf::from("/etc"), PathBuf::from("/usr")]
    }

    #[test]
    fn rejects_relative_and_traversal_paths() {
        assert_eq!(
            validate_directory(Path::new("projects/demo"), &denied()),
            Err(PathRejection::PathTraversal(PathBuf::from("projects/demo")))
        );
        assert_eq!(
            validate_directory(Path::new("/home/user/../../etc"), &denied()),
            Err(PathRejection::PathTraversal(PathBuf::from(
                "/home/user/../../etc"
            )))
        );
        assert_eq!(
            validate_directory(Path::new("/data/~alice"), &denied()),
            Err(PathRejection::PathTraversal(PathBuf::from("/data/~alice")))
        );
    }

    #[test]
    fn rejects_system_directories() {
        assert_eq!(
            validate_directory(Path::new("/etc"), &denied()),
            Err(PathRejection::SystemDirectory(PathBuf::from("/etc")))
        );
    }

    #[test]
    fn rejects_missing_directories() {
        let missing = Path::new("/no/such/directory/anywhere");
        assert_eq!(
            validate_directory(missing, &denied()),
            Err(PathRejection::NotFound(missing.to_path_buf()))
        );
    }

    #[test]
    fn accepts_and_canonicalizes_real_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved = validate_directory(tmp.path(), &denied()).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.is_dir());
    }

    #[test]
    fn strips_metacharacters_and_collapses_whitespace() {
        let cleaned = sanitize_prompt("add   a `README`  $(now) please", 2000).unwrap();
        assert_eq!(cleaned, "add a README now please");
    }

    #[test]
    fn rejects_empty_prompts() {
        assert_eq!(sanitize_prompt("   ", 2000), Err(PromptRejection::Empty));
        // Nothing but metacharacters is empty after stripping.
        assert_eq!(sanitize_prompt("$();", 2000), Err(PromptRejection::Empty));
    }

    #[test]
    fn rejects_overlong_prompts() {
        let long = "word ".repeat(500);
        assert_eq!(
            sanitize_prompt(&long, 100),
            Err(PromptRejection::TooLong {
                actual: 2499,
                max: 100
            })
        );
    }

    #[test]
    fn rejects_destructive_patterns() {
        assert_eq!(
            sanitize_prompt("please rm -rf the build dir", 2000),
            Err(PromptRejection::BlockedPattern("rm -rf"))
        );
        assert_eq!(
            sanitize_prompt("DELETE everything", 2000),
            Err(PromptRejection::BlockedPattern("delete"))
        );
    }

    #[test]
    fn blocked_verbs_require_a_word_boundary() {
        assert!(sanitize_prompt("improve the formatting of main.rs", 2000).is_ok());
        assert!(sanitize_prompt("summarize the executed plan", 2000).is_ok());
        assert!(sanitize_prompt("evaluate the test suite", 2000).is_ok());
    }
}
