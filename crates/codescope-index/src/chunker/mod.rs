//! Language-aware chunking with a guaranteed line-window fallback.
//!
//! A boundary detector picked by file extension proposes definition spans.
//! Non-blank stretches the detector leaves unclaimed are covered by line
//! windows, so every non-trivial line lands in exactly one chunk. When the
//! detector finds nothing the whole file is windowed.

pub mod boundary;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::ignore_rules::IgnoreRuleSet;
use crate::languages::{Lang, detect_language};
use boundary::{Span, WindowedDetector, detector_for, last_nonblank_line};

/// Files larger than this are skipped as unlikely to be source.
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Bytes inspected for NUL when sniffing binary content.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// What a chunk's span was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Lines,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Lines => "lines",
        }
    }
}

/// A contiguous span of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Absolute path of the owning file.
    pub file: PathBuf,
    /// First line, 1-indexed.
    pub start: usize,
    /// Last line, inclusive.
    pub end: usize,
    pub snippet: String,
    pub kind: ChunkKind,
    pub language: Lang,
    pub content_hash: String,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Lines per window in the fallback pass (default: 120).
    pub window_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { window_lines: 120 }
    }
}

/// Chunk in-memory source text belonging to `file`.
#[must_use]
pub fn chunk_source(file: &Path, source: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    let Some(last) = last_nonblank_line(&lines) else {
        return Vec::new();
    };

    let lang = detect_language(file);
    let windows = WindowedDetector::new(config.window_lines);
    let semantic = detector_for(lang, config.window_lines).detect(&lines);

    let spans = if semantic.is_empty() {
        windows.windows(1, last)
    } else {
        fill_gaps(&semantic, &lines, last, &windows)
    };

    spans
        .into_iter()
        .map(|span| make_chunk(file, &lines, span, lang))
        .collect()
}

/// Cover non-blank gaps between semantic spans with line windows.
fn fill_gaps(
    semantic: &[Span],
    lines: &[&str],
    last: usize,
    windows: &WindowedDetector,
) -> Vec<Span> {
    let mut out = Vec::with_capacity(semantic.len() * 2);
    let mut next = 1;

    for span in semantic {
        if span.start > next {
            push_gap(&mut out, lines, next, span.start - 1, windows);
        }
        out.push(*span);
        next = span.end + 1;
    }
    if next <= last {
        push_gap(&mut out, lines, next, last, windows);
    }
    out
}

fn push_gap(out: &mut Vec<Span>, lines: &[&str], from: usize, to: usize, w: &WindowedDetector) {
    let is_blank = |n: usize| lines[n - 1].trim().is_empty();
    let mut start = from;
    let mut end = to;
    while start <= end && is_blank(start) {
        start += 1;
    }
    while end >= start && is_blank(end) {
        end -= 1;
    }
    if start <= end {
        out.extend(w.windows(start, end));
    }
}

fn make_chunk(file: &Path, lines: &[&str], span: Span, language: Lang) -> Chunk {
    let snippet = lines[span.start - 1..span.end].join("\n");
    Chunk {
        content_hash: blake3_hex(&snippet),
        file: file.to_path_buf(),
        start: span.start,
        end: span.end,
        kind: span.kind,
        language,
        snippet,
    }
}

fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Read and chunk a file from disk.
///
/// # Errors
///
/// Returns [`IndexError::UnreadableFile`] if the file cannot be read, is too
/// large, or is not UTF-8 text.
pub fn chunk_file(path: &Path, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    let unreadable = |reason: String| IndexError::UnreadableFile {
        path: path.to_path_buf(),
        reason,
    };

    let meta = std::fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
    if meta.len() > MAX_FILE_BYTES {
        return Err(unreadable(format!("file too large ({} bytes)", meta.len())));
    }
    let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    if bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0) {
        return Err(unreadable("binary content".into()));
    }
    let source = String::from_utf8(bytes).map_err(|_| unreadable("not valid UTF-8".into()))?;

    Ok(chunk_source(path, &source, config))
}

/// A file left out of a repository-wide chunking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Output of a repository walk.
#[derive(Debug, Default)]
pub struct ChunkedRepository {
    pub chunks: Vec<Chunk>,
    pub files_scanned: usize,
    pub files_chunked: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Walk every eligible file under `root` and chunk it.
///
/// Unreadable files are logged and recorded in `skipped`; the walk never
/// fails because of a single file. Files are visited in name order.
#[must_use]
pub fn chunk_repository(
    root: &Path,
    rules: &IgnoreRuleSet,
    config: &ChunkerConfig,
) -> ChunkedRepository {
    chunk_subtree(root, root, rules, config)
}

/// Like [`chunk_repository`], but walks only `dir`, a directory inside
/// `root`. Ignore rules are still evaluated relative to `root`.
#[must_use]
pub fn chunk_subtree(
    root: &Path,
    dir: &Path,
    rules: &IgnoreRuleSet,
    config: &ChunkerConfig,
) -> ChunkedRepository {
    let mut out = ChunkedRepository::default();

    let filter_rules = rules.clone();
    let filter_root = root.to_path_buf();
    let walker = ignore::WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if is_dir {
                !filter_rules.should_ignore_dir(entry.path(), &filter_root)
            } else {
                !filter_rules.should_ignore(entry.path(), &filter_root)
            }
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        out.files_scanned += 1;
        match chunk_file(entry.path(), config) {
            Ok(chunks) => {
                if !chunks.is_empty() {
                    out.files_chunked += 1;
                }
                out.chunks.extend(chunks);
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), "skipping file: {e}");
                out.skipped.push(SkippedFile {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    out
}
