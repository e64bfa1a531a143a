//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production sources of the workspace:
//! - No blocking I/O inside async code
//! - No sleeping in production code
//! - No panicking shortcuts (`unwrap`/`expect`) outside tests
//!
//! The helpers here label every line of a source file with the context it sits
//! in (test code, async body), so the rules in `tests/` can be simple substring
//! checks on the code part of a line.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["chatstream/core/src", "chatstream/cli/src"];

/// Workspace root
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files below `dir`
#[must_use]
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// All production `.rs` files of the workspace
#[must_use]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_sources(&root.join(dir)))
        .collect()
}

/// One line of an analyzed source file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number
    pub number: usize,
    /// The line as written
    pub text: String,
    /// The line without its comment, string contents blanked
    pub code: String,
    /// Inside a `#[cfg(test)]` item or a test function
    pub in_test: bool,
    /// Inside an `async fn` body or an `async` block
    pub in_async: bool,
}

/// A rule violation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Offending file
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was violated
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Run `check` over every line of every production file
///
/// `check` returns the violated rule for a line, if any.
#[must_use]
pub fn scan_production(check: impl Fn(&Line) -> Option<&'static str>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_sources() {
        let Ok(source) = fs::read_to_string(&path) else {
            continue;
        };
        for line in analyze(&source) {
            if let Some(rule) = check(&line) {
                violations.push(Violation {
                    path: path.clone(),
                    line: line.number,
                    rule,
                    text: line.text.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Label every line of `source` with its context
///
/// Brace tracking is line based: comments and string contents are skipped,
/// which is enough for rustfmt-formatted code.
#[must_use]
pub fn analyze(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut depth = 0usize;
    let mut test_depth: Option<usize> = None;
    let mut async_depths: Vec<usize> = Vec::new();
    let mut pending_test = false;
    let mut pending_async = false;

    for (idx, text) in source.lines().enumerate() {
        let code = code_part(text);
        let mut in_test = test_depth.is_some();
        let mut in_async = !async_depths.is_empty();

        if code.contains("#[cfg(test)]") || code.contains("#[test]") || code.contains("#[tokio::test")
        {
            pending_test = true;
            in_test = true;
        }
        if has_async_keyword(&code) {
            pending_async = true;
        }

        for c in code.chars() {
            match c {
                '{' => {
                    if pending_test {
                        test_depth.get_or_insert(depth);
                        pending_test = false;
                    }
                    if pending_async {
                        async_depths.push(depth);
                        pending_async = false;
                        in_async = true;
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if test_depth == Some(depth) {
                        test_depth = None;
                    }
                    while async_depths.last() == Some(&depth) {
                        async_depths.pop();
                    }
                }
                ';' => {
                    pending_test = false;
                    pending_async = false;
                }
                _ => {}
            }
        }

        lines.push(Line {
            number: idx + 1,
            text: text.to_string(),
            code,
            in_test: in_test || test_depth.is_some(),
            in_async: in_async || !async_depths.is_empty(),
        });
    }
    lines
}

/// The line without its `//` comment and with string contents blanked
#[must_use]
pub fn code_part(line: &str) -> String {
    let mut code = String::with_capacity(line.len());
    let mut in_string = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_string => {
                chars.next();
                code.push_str("  ");
            }
            '"' => {
                in_string = !in_string;
                code.push('"');
            }
            '/' if !in_string && chars.peek() == Some(&'/') => break,
            '\'' if !in_string && chars.clone().nth(1) == Some('\'') => {
                // Char literal such as '{'
                chars.next();
                chars.next();
                code.push_str("' '");
            }
            _ if in_string => code.push(' '),
            _ => code.push(c),
        }
    }
    code
}

fn has_async_keyword(code: &str) -> bool {
    code.match_indices("async").any(|(pos, _)| {
        let before = code[..pos].chars().next_back();
        let after = code[pos + "async".len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_skips_strings_and_comments() {
        let code = code_part("let a = \"std::fs::read {\"; // std::net");
        assert!(!code.contains("std::fs"));
        assert!(!code.contains("std::net"));
        assert!(!code.contains('{'));

        assert!(!code_part("let b = '{';").contains('{'));
        assert!(code_part("let url = \"http://x\"; let c = 1;").contains("let c = 1;"));
    }

    #[test]
    fn test_lifetimes_survive() {
        let code = code_part("fn f<'a>(x: &'a str) -> &'a str { x }");
        assert!(code.contains("<'a>"));
        assert!(code.contains('{'));
    }

    #[test]
    fn test_async_context() {
        let source = "\
fn sync_fn() {
    let a = 1;
}

async fn async_fn() {
    let b = 2;
}

fn spawner() {
    tokio::spawn(async move {
        let c = 3;
    });
    let d = 4;
}
";
        let lines = analyze(source);
        let line = |needle: &str| lines.iter().find(|l| l.text.contains(needle)).unwrap();

        assert!(!line("let a").in_async);
        assert!(line("let b").in_async);
        assert!(line("let c").in_async);
        assert!(!line("let d").in_async);
    }

    #[test]
    fn test_trait_method_without_body_is_not_async_context() {
        let source = "\
trait T {
    async fn open(&self) -> u8;
}
fn after() {
    let x = 1;
}
";
        let lines = analyze(source);
        assert!(lines.iter().all(|l| !l.in_async));
    }

    #[test]
    fn test_test_module_context() {
        let source = "\
fn prod() {
    let a = 1;
}

#[cfg(test)]
mod tests {
    fn helper() {
        let b = 2;
    }
}

fn more_prod() {
    let c = 3;
}
";
        let lines = analyze(source);
        let line = |needle: &str| lines.iter().find(|l| l.text.contains(needle)).unwrap();

        assert!(!line("let a").in_test);
        assert!(line("let b").in_test);
        assert!(!line("let c").in_test);
    }
}
