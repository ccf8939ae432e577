//! Keyword candidates from an external text-search tool (ripgrep).

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{IndexError, Result};

/// Per-file match cap passed to the search tool.
pub const DEFAULT_MAX_COUNT: usize = 200;

/// Query terms shorter than this are not searched.
const MIN_TERM_LEN: usize = 2;

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalHit {
    pub file: PathBuf,
    /// 1-indexed.
    pub line: usize,
    pub text: String,
}

pub trait LexicalSource: Send + Sync {
    /// Line-level keyword hits for `query` under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ToolUnavailable`] if the tool cannot be run or
    /// exits abnormally. Callers treat that as zero candidates.
    fn search(
        &self,
        root: &Path,
        query: &str,
    ) -> impl Future<Output = Result<Vec<LexicalHit>>> + Send;
}

/// Runs `rg` with each query term as a fixed-string, case-insensitive pattern.
#[derive(Debug, Clone)]
pub struct RipgrepSource {
    command: String,
    max_count: usize,
}

impl Default for RipgrepSource {
    fn default() -> Self {
        Self::new("rg", DEFAULT_MAX_COUNT)
    }
}

impl RipgrepSource {
    #[must_use]
    pub fn new(command: impl Into<String>, max_count: usize) -> Self {
        Self {
            command: command.into(),
            max_count: max_count.max(1),
        }
    }
}

impl LexicalSource for RipgrepSource {
    async fn search(&self, root: &Path, query: &str) -> Result<Vec<LexicalHit>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut command = Command::new(&self.command);
        command
            .arg("--line-number")
            .arg("--no-heading")
            .arg("--with-filename")
            .arg("--color")
            .arg("never")
            .arg("--fixed-strings")
            .arg("--ignore-case")
            .arg("--max-count")
            .arg(self.max_count.to_string());
        for term in &terms {
            command.arg("-e").arg(term);
        }
        command.arg("--").arg(root);

        let output = command
            .output()
            .await
            .map_err(|e| IndexError::ToolUnavailable(format!("{}: {e}", self.command)))?;

        let hits = interpret_output(
            &self.command,
            output.status.code(),
            &output.stdout,
            &output.stderr,
        )?;
        tracing::debug!(root = %root.display(), terms = terms.len(), hits = hits.len(), "lexical search");
        Ok(hits)
    }
}

/// Exit code 1 means no matches. Exit code 2 with output means some files
/// could not be searched; the hits that were found are still used.
fn interpret_output(
    command: &str,
    code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Vec<LexicalHit>> {
    let stderr = String::from_utf8_lossy(stderr);
    match code {
        Some(0) => Ok(parse_output(&String::from_utf8_lossy(stdout))),
        Some(1) => Ok(Vec::new()),
        Some(2) if !stdout.is_empty() => {
            tracing::warn!(command, "lexical search partially failed: {}", stderr.trim());
            Ok(parse_output(&String::from_utf8_lossy(stdout)))
        }
        _ => {
            let status = code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            Err(IndexError::ToolUnavailable(format!(
                "{command} exited with {status}: {}",
                stderr.trim()
            )))
        }
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace() {
        let term = term.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
        if term.chars().count() >= MIN_TERM_LEN && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

/// Parse `path:line:text` lines. Malformed lines are skipped.
fn parse_output(stdout: &str) -> Vec<LexicalHit> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let path = parts.next()?;
            let line_number = parts.next()?.parse::<usize>().ok()?;
            let text = parts.next().unwrap_or_default();
            Some(LexicalHit {
                file: PathBuf::from(path),
                line: line_number,
                text: text.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rg_lines() {
        let out = "/r/src/a.rs:12:fn parse_config() {\n/r/b.py:3:x = 'a:b'\n";
        let hits = parse_output(out);
        assert_eq!(
            hits,
            vec![
                LexicalHit {
                    file: PathBuf::from("/r/src/a.rs"),
                    line: 12,
                    text: "fn parse_config() {".into(),
                },
                LexicalHit {
                    file: PathBuf::from("/r/b.py"),
                    line: 3,
                    text: "x = 'a:b'".into(),
                },
            ]
        );
    }

    #[test]
    fn skips_malformed_lines() {
        let hits = parse_output("garbage\n/r/a.rs:notanumber:x\n/r/a.rs:7:\n");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 7);
        assert!(hits[0].text.is_empty());
    }

    #[test]
    fn query_terms_dedup_and_trim() {
        assert_eq!(
            query_terms("where is `parse_config` parse_config? a"),
            vec!["where", "is", "parse_config"]
        );
        assert!(query_terms("  ? ! ").is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let source = RipgrepSource::new("codescope-no-such-tool-xyz", 10);
        let err = source
            .search(Path::new("."), "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_query_skips_tool() {
        let source = RipgrepSource::new("codescope-no-such-tool-xyz", 10);
        assert!(source.search(Path::new("."), " ").await.unwrap().is_empty());
    }

    #[test]
    fn partial_failure_keeps_found_hits() {
        let hits = interpret_output(
            "rg",
            Some(2),
            b"/r/a.rs:3:fn parse() {}\n",
            b"/r/secret: Permission denied (os error 13)",
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, PathBuf::from("/r/a.rs"));
    }

    #[test]
    fn exit_status_mapping() {
        assert!(interpret_output("rg", Some(1), b"", b"").unwrap().is_empty());
        assert!(matches!(
            interpret_output("rg", Some(2), b"", b"bad regex"),
            Err(IndexError::ToolUnavailable(msg)) if msg.contains("bad regex")
        ));
        assert!(matches!(
            interpret_output("rg", None, b"", b""),
            Err(IndexError::ToolUnavailable(_))
        ));
    }
}
