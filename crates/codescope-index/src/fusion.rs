//! Combine vector hits with lexical evidence into one ranked list.

use std::collections::HashSet;
use std::path::Path;

use crate::chunker::Chunk;
use crate::lexical::LexicalHit;
use crate::store::ScoredChunk;

/// Score bonus for a vector hit whose file also appears in the lexical hits.
pub const DEFAULT_LEXICAL_BONUS: f32 = 0.1;

/// One fused search result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub chunk: Chunk,
    /// Vector score plus the lexical bonus, if earned.
    pub score: f32,
    /// Whether the chunk's file also matched lexically.
    pub lexical_match: bool,
}

impl RankedResult {
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.chunk.file
    }
}

/// Fuse vector and lexical results.
///
/// Every vector hit keeps its score, plus `bonus` when any lexical hit names
/// the same file. Results are sorted by descending score; equal scores keep
/// their vector order. Files that only matched lexically are not surfaced.
#[must_use]
pub fn fuse(
    lexical: &[LexicalHit],
    vector: Vec<ScoredChunk>,
    top_k: usize,
    bonus: f32,
) -> Vec<RankedResult> {
    let lexical_files: HashSet<&Path> = lexical.iter().map(|h| h.file.as_path()).collect();

    let mut ranked: Vec<RankedResult> = vector
        .into_iter()
        .map(|hit| {
            let lexical_match = lexical_files.contains(hit.chunk.file.as_path());
            let score = if lexical_match {
                hit.score + bonus
            } else {
                hit.score
            };
            RankedResult {
                chunk: hit.chunk,
                score,
                lexical_match,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_k);
    ranked
}
