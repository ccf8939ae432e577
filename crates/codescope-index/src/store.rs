//! Embedding index: ANN slots plus the slot-aligned chunk metadata.
//!
//! `metadata[i]` always describes the vector in ANN slot `i`. Removal marks
//! slots dead instead of rebuilding; dead slots are filtered from query
//! results and reclaimed by compaction once they exceed the configured ratio.
//!
//! Every mutation builds a complete replacement [`IndexState`] and swaps it
//! in, so readers see either the old or the new state, never a partial one.
//! Writers are serialized by an async mutex.

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::ann::{AnnIndex, FlatIndex};
use crate::chunker::Chunk;
use crate::context::contextualize_for_embedding;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};

/// Dead-slot ratio above which removal triggers compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.25;

/// A query hit mapped back to its chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Raw ANN similarity; scale depends on the embedding model.
    pub score: f32,
}

/// Counters describing an index snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub slots: usize,
    pub live: usize,
    pub dead: usize,
    pub dim: usize,
}

/// One immutable, fully consistent index generation.
#[derive(Debug, Clone)]
pub struct IndexState<A = FlatIndex> {
    ann: A,
    metadata: Vec<Chunk>,
    dead: Vec<bool>,
    dead_count: usize,
}

impl<A: AnnIndex> IndexState<A> {
    #[must_use]
    pub fn empty(dim: usize) -> Self {
        Self {
            ann: A::new(dim),
            metadata: Vec::new(),
            dead: Vec::new(),
            dead_count: 0,
        }
    }

    /// Reassemble a state from persisted parts.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IndexCorrupt`] if the three parts disagree in length.
    pub fn from_parts(ann: A, metadata: Vec<Chunk>, dead: Vec<bool>) -> Result<Self> {
        if ann.len() != metadata.len() || dead.len() != metadata.len() {
            return Err(IndexError::IndexCorrupt(format!(
                "{} vectors, {} metadata records, {} tombstone flags",
                ann.len(),
                metadata.len(),
                dead.len()
            )));
        }
        let dead_count = dead.iter().filter(|d| **d).count();
        Ok(Self {
            ann,
            metadata,
            dead,
            dead_count,
        })
    }

    #[must_use]
    pub fn ann(&self) -> &A {
        &self.ann
    }

    /// Slot-aligned metadata, tombstoned entries included.
    #[must_use]
    pub fn metadata(&self) -> &[Chunk] {
        &self.metadata
    }

    #[must_use]
    pub fn tombstones(&self) -> &[bool] {
        &self.dead
    }

    #[must_use]
    pub fn is_dead(&self, slot: usize) -> bool {
        self.dead.get(slot).copied().unwrap_or(true)
    }

    /// Live chunks in slot order.
    pub fn live_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.metadata
            .iter()
            .zip(&self.dead)
            .filter(|(_, dead)| !**dead)
            .map(|(chunk, _)| chunk)
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            slots: self.metadata.len(),
            live: self.metadata.len() - self.dead_count,
            dead: self.dead_count,
            dim: self.ann.dim(),
        }
    }

    #[must_use]
    pub fn dead_ratio(&self) -> f32 {
        if self.metadata.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.dead_count as f32 / self.metadata.len() as f32;
        ratio
    }

    fn append(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        self.ann.add(vectors)?;
        self.dead.extend(std::iter::repeat_n(false, chunks.len()));
        self.metadata.extend(chunks);
        debug_assert_eq!(self.ann.len(), self.metadata.len());
        Ok(())
    }

    fn tombstone_where(&mut self, pred: impl Fn(&Path) -> bool) -> usize {
        let mut removed = 0;
        for (chunk, dead) in self.metadata.iter().zip(self.dead.iter_mut()) {
            if !*dead && pred(&chunk.file) {
                *dead = true;
                removed += 1;
            }
        }
        self.dead_count += removed;
        removed
    }

    fn count_live_where(&self, pred: impl Fn(&Path) -> bool) -> usize {
        self.live_chunks().filter(|c| pred(&c.file)).count()
    }

    /// Top `k` live chunks for a query vector.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if the query vector was
    /// produced by a different model than the stored vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.ann.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.ann.dim(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .ann
            .search(query, k.saturating_add(self.dead_count))
            .into_iter()
            .filter(|(slot, _)| !self.is_dead(*slot))
            .take(k)
            .filter_map(|(slot, score)| {
                self.metadata.get(slot).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect())
    }
}

/// Repository embedding index with copy-on-write state swaps.
pub struct EmbeddingIndex<E, A = FlatIndex> {
    label: String,
    embedder: Arc<E>,
    state: RwLock<Option<Arc<IndexState<A>>>>,
    writer: tokio::sync::Mutex<()>,
    compaction_threshold: f32,
}

impl<E, A> std::fmt::Debug for EmbeddingIndex<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("label", &self.label)
            .field("compaction_threshold", &self.compaction_threshold)
            .finish_non_exhaustive()
    }
}

impl<E: Embedder, A: AnnIndex> EmbeddingIndex<E, A> {
    /// Unbuilt index. Queries fail with [`IndexError::NotIndexed`] until
    /// [`build`](Self::build) runs.
    #[must_use]
    pub fn new(label: impl Into<String>, embedder: Arc<E>, compaction_threshold: f32) -> Self {
        Self {
            label: label.into(),
            embedder,
            state: RwLock::new(None),
            writer: tokio::sync::Mutex::new(()),
            compaction_threshold,
        }
    }

    /// Index wrapping a previously persisted state.
    #[must_use]
    pub fn with_state(
        label: impl Into<String>,
        embedder: Arc<E>,
        compaction_threshold: f32,
        state: IndexState<A>,
    ) -> Self {
        let index = Self::new(label, embedder, compaction_threshold);
        *index
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(state));
        index
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.current().is_ok_and(|s| s.is_some())
    }

    /// The last fully swapped-in state.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the index was never built.
    pub fn snapshot(&self) -> Result<Arc<IndexState<A>>> {
        self.current()?
            .ok_or_else(|| IndexError::NotIndexed(self.label.clone()))
    }

    /// Live chunks in slot order, cloned out of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the index was never built.
    pub fn live_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.snapshot()?.live_chunks().cloned().collect())
    }

    /// Embed all chunks and replace the index wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding fails; the previous state is kept.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let state = self.fresh_state(chunks).await?;
        let count = state.metadata.len();
        self.swap(state)?;
        tracing::debug!(index = %self.label, chunks = count, "index built");
        Ok(count)
    }

    /// Embed and append chunks.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build, or an
    /// embedding error; on error the index is unchanged.
    pub async fn add_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot()?;
        let added = chunks.len();
        let vectors = self.embed_all(&chunks).await?;
        let mut next = (*current).clone();
        next.append(chunks, vectors)?;
        self.swap(next)?;
        tracing::debug!(index = %self.label, added, "chunks added");
        Ok(added)
    }

    /// Retire every chunk of `file`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build, or an
    /// embedding error if the removal triggers compaction.
    pub async fn remove_chunks_by_file(&self, file: &Path) -> Result<usize> {
        self.remove_where(|f| f == file).await
    }

    /// Retire every chunk whose file lies under `dir` (or is `dir`).
    ///
    /// # Errors
    ///
    /// Same as [`remove_chunks_by_file`](Self::remove_chunks_by_file).
    pub async fn remove_chunks_under(&self, dir: &Path) -> Result<usize> {
        self.remove_where(|f| f.starts_with(dir)).await
    }

    async fn remove_where(&self, pred: impl Fn(&Path) -> bool) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot()?;
        if current.count_live_where(&pred) == 0 {
            return Ok(0);
        }
        let mut next = (*current).clone();
        let removed = next.tombstone_where(&pred);
        let next = self.maybe_compact(next).await?;
        self.swap(next)?;
        tracing::debug!(index = %self.label, removed, "chunks removed");
        Ok(removed)
    }

    /// Replace `file`'s chunks with `chunks` in a single swap.
    ///
    /// Equivalent to removing the file then adding `chunks`; calling it twice
    /// with the same chunks leaves the same live metadata. Returns how many
    /// chunks were retired.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build, or an
    /// embedding error; on error the index is unchanged.
    pub async fn update_file_chunks(&self, file: &Path, chunks: Vec<Chunk>) -> Result<usize> {
        self.replace_where(|f| f == file, chunks).await
    }

    /// Replace every chunk under `dir` with `chunks` in a single swap.
    ///
    /// # Errors
    ///
    /// Same as [`update_file_chunks`](Self::update_file_chunks).
    pub async fn replace_under(&self, dir: &Path, chunks: Vec<Chunk>) -> Result<usize> {
        self.replace_where(|f| f.starts_with(dir), chunks).await
    }

    async fn replace_where(
        &self,
        pred: impl Fn(&Path) -> bool,
        chunks: Vec<Chunk>,
    ) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot()?;
        let mut next = (*current).clone();
        let removed = next.tombstone_where(&pred);

        let next = if next.dead_ratio() > self.compaction_threshold {
            let mut survivors: Vec<Chunk> = next.live_chunks().cloned().collect();
            survivors.extend(chunks);
            self.fresh_state(survivors).await?
        } else {
            let vectors = self.embed_all(&chunks).await?;
            let mut next = next;
            next.append(chunks, vectors)?;
            next
        };

        let stats = next.stats();
        self.swap(next)?;
        tracing::debug!(
            index = %self.label,
            removed,
            live = stats.live,
            dead = stats.dead,
            "chunks replaced"
        );
        Ok(removed)
    }

    /// Drop tombstoned slots by re-embedding survivors into a fresh ANN index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build, or an
    /// embedding error; on error the index is unchanged.
    pub async fn compact(&self) -> Result<IndexStats> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot()?;
        if current.dead_count == 0 {
            return Ok(current.stats());
        }
        let next = self
            .fresh_state(current.live_chunks().cloned().collect())
            .await?;
        let stats = next.stats();
        self.swap(next)?;
        tracing::debug!(index = %self.label, live = stats.live, "index compacted");
        Ok(stats)
    }

    /// Embed `text` and return the `k` most similar live chunks.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build, or an
    /// embedding error.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.snapshot()?;
        let vector = self.embedder.embed(text).await?;
        state.search(&vector, k)
    }

    /// Check that the embedder still produces vectors of the stored
    /// dimension. Used after loading a persisted generation.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] before the first build and
    /// [`IndexError::DimensionMismatch`] when the model changed.
    pub async fn check_dimension(&self) -> Result<()> {
        let state = self.snapshot()?;
        let actual = self.embedder.embed("probe").await?.len();
        let expected = state.ann.dim();
        if actual != expected {
            return Err(IndexError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    async fn maybe_compact(&self, state: IndexState<A>) -> Result<IndexState<A>> {
        if state.dead_ratio() <= self.compaction_threshold {
            return Ok(state);
        }
        tracing::debug!(
            index = %self.label,
            dead = state.dead_count,
            slots = state.metadata.len(),
            "dead ratio over threshold, compacting"
        );
        self.fresh_state(state.live_chunks().cloned().collect())
            .await
    }

    async fn fresh_state(&self, chunks: Vec<Chunk>) -> Result<IndexState<A>> {
        let vectors = self.embed_all(&chunks).await?;
        let dim = match vectors.first() {
            Some(v) => v.len(),
            None => self.embedder.embed("probe").await?.len(),
        };
        let mut state = IndexState::empty(dim);
        state.append(chunks, vectors)?;
        Ok(state)
    }

    async fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let text = contextualize_for_embedding(chunk);
            vectors.push(self.embedder.embed(&text).await?);
        }
        Ok(vectors)
    }

    fn current(&self) -> Result<Option<Arc<IndexState<A>>>> {
        let guard = self
            .state
            .read()
            .map_err(|e| IndexError::Other(format!("index state lock poisoned: {e}")))?;
        Ok(guard.clone())
    }

    fn swap(&self, next: IndexState<A>) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|e| IndexError::Other(format!("index state lock poisoned: {e}")))?;
        *guard = Some(Arc::new(next));
        Ok(())
    }
}
