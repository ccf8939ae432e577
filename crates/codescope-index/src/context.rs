//! Text rendering around chunks: the embedding input and the display block.
//!
//! Embedding raw code alone retrieves poorly for conceptual queries, so the
//! file path and language tag are prepended before the snippet.

use std::fmt::Write;

use crate::chunker::Chunk;
use crate::fusion::RankedResult;

/// Text fed to the embedder for `chunk` (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let path = chunk.file.display().to_string();
    let mut text = String::with_capacity(chunk.snippet.len() + path.len() + 32);

    text.push_str("# ");
    text.push_str(&path);
    text.push('\n');

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    text.push_str(&chunk.snippet);
    text
}

/// Short header for a result line.
#[must_use]
pub fn chunk_display_header(chunk: &Chunk) -> String {
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file.display(),
        chunk.kind.as_str(),
        chunk.start,
        chunk.end
    )
}

/// Render ranked results as a `<code_context>` block. Empty input renders as
/// an empty string.
#[must_use]
pub fn format_as_context(results: &[RankedResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for result in results {
        let chunk = &result.chunk;
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" kind=\"{}\" score=\"{:.2}\">",
            chunk.file.display(),
            chunk.start,
            chunk.end,
            chunk.kind.as_str(),
            result.score,
        );
        out.push_str(&chunk.snippet);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}
