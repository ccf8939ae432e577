//! Repository-level operations: index, query, watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunker::{ChunkerConfig, SkippedFile, chunk_repository};
use crate::config::Config;
use crate::embedder::{AnyEmbedder, Embedder};
use crate::error::{IndexError, Result};
use crate::fusion::{DEFAULT_LEXICAL_BONUS, RankedResult, fuse};
use crate::ignore_rules::IgnoreRuleSet;
use crate::lexical::{LexicalHit, LexicalSource, RipgrepSource};
use crate::registry::IndexRegistry;
use crate::sync::{SyncConfig, SyncEvent, SyncManager, WatchTarget};

/// Search and indexing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chunker: ChunkerConfig,
    pub top_k: usize,
    pub lexical_bonus: f32,
    /// ANN hits fetched before fusion; at least `k` are always fetched.
    pub vector_candidates: usize,
    pub lexical_enabled: bool,
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            top_k: 10,
            lexical_bonus: DEFAULT_LEXICAL_BONUS,
            vector_candidates: 50,
            lexical_enabled: true,
            sync: SyncConfig::default(),
        }
    }
}

/// Summary of a full repository build.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub repo_id: String,
    pub root: PathBuf,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunk_count: usize,
    pub skipped: Vec<SkippedFile>,
    pub duration_ms: u64,
}

pub struct CodeSearchEngine<E, L = RipgrepSource> {
    registry: Arc<IndexRegistry<E>>,
    lexical: L,
    sync: SyncManager<E>,
    config: EngineConfig,
}

impl CodeSearchEngine<AnyEmbedder, RipgrepSource> {
    /// Engine wired from a loaded [`Config`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let registry = IndexRegistry::new(
            Arc::new(config.embedder()),
            config.index.data_dir.clone(),
            config.index.compaction_threshold,
        );
        let lexical = RipgrepSource::new(config.lexical.command.clone(), config.lexical.max_count);
        let engine_config = EngineConfig {
            chunker: config.chunker_config(),
            top_k: config.search.top_k,
            lexical_bonus: config.search.lexical_bonus,
            vector_candidates: config.search.vector_candidates,
            lexical_enabled: config.lexical.enabled,
            sync: config.sync_config(),
        };
        Self::new(Arc::new(registry), lexical, engine_config)
    }
}

impl<E: Embedder + 'static, L: LexicalSource> CodeSearchEngine<E, L> {
    #[must_use]
    pub fn new(registry: Arc<IndexRegistry<E>>, lexical: L, config: EngineConfig) -> Self {
        let sync = SyncManager::new(config.sync.clone());
        Self {
            registry,
            lexical,
            sync,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<IndexRegistry<E>> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Chunk and embed every eligible file under `path`, replacing any
    /// previous index for the repository.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RepositoryNotFound`] if `path` is not a
    /// directory, or an embedding/persistence error. Unreadable files are
    /// skipped and listed in the report.
    pub async fn index_repository(&self, path: &Path) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let (repo_id, root) = self.registry.resolve(path)?;
        tracing::info!(repo_id, root = %root.display(), "indexing started");

        let walk_root = root.clone();
        let chunker = self.config.chunker.clone();
        let chunked = tokio::task::spawn_blocking(move || {
            let rules = IgnoreRuleSet::load(&walk_root);
            chunk_repository(&walk_root, &rules, &chunker)
        })
        .await
        .map_err(|e| IndexError::Other(format!("chunking task failed: {e}")))?;

        let index = self.registry.get_or_create(&repo_id, Some(&root))?;
        let chunk_count = index.build(chunked.chunks).await?;
        self.registry.save(&repo_id).await?;

        let report = IndexReport {
            repo_id,
            root,
            files_scanned: chunked.files_scanned,
            files_indexed: chunked.files_chunked,
            chunk_count,
            skipped: chunked.skipped,
            duration_ms: start.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        };
        tracing::info!(
            repo_id = %report.repo_id,
            files = report.files_indexed,
            chunks = report.chunk_count,
            skipped = report.skipped.len(),
            elapsed_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Register `path` for a repository whose index was persisted earlier.
    /// Returns the repository id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RepositoryNotFound`], [`IndexError::NotIndexed`]
    /// if nothing was persisted, or [`IndexError::IndexCorrupt`].
    pub async fn open_repository(&self, path: &Path) -> Result<String> {
        let (repo_id, root) = self.registry.resolve(path)?;
        self.registry.open(&repo_id).await?;
        self.registry.set_root(&repo_id, &root)?;
        Ok(repo_id)
    }

    /// Hybrid search: vector and lexical candidates fetched concurrently,
    /// then fused. `k` of `None` uses the configured `top_k`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the repository was never
    /// indexed, or an embedding error. Lexical failures only degrade the
    /// ranking.
    pub async fn query(
        &self,
        repo_id: &str,
        text: &str,
        k: Option<usize>,
    ) -> Result<Vec<RankedResult>> {
        let k = k.unwrap_or(self.config.top_k);
        let index = self.registry.open(repo_id).await?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let root = self.registry.root_of(repo_id);
        let candidates = self.config.vector_candidates.max(k);

        let (lexical, vector) = tokio::join!(
            self.lexical_candidates(root.as_deref(), text),
            index.query(text, candidates)
        );
        let fused = fuse(&lexical, vector?, k, self.config.lexical_bonus);
        tracing::debug!(
            repo_id,
            lexical = lexical.len(),
            results = fused.len(),
            "query complete"
        );
        Ok(fused)
    }

    async fn lexical_candidates(&self, root: Option<&Path>, text: &str) -> Vec<LexicalHit> {
        if !self.config.lexical_enabled {
            return Vec::new();
        }
        let Some(root) = root else {
            tracing::warn!("repository root unknown, lexical search skipped");
            return Vec::new();
        };
        match self.lexical.search(root, text).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("lexical search unavailable, using vector results only: {e}");
                Vec::new()
            }
        }
    }

    /// Keep `repo_id`'s index in sync with the files under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the repository has no index yet,
    /// [`IndexError::RepositoryNotFound`], or a watcher setup error.
    pub async fn watch_repository(&self, path: &Path, repo_id: &str) -> Result<()> {
        let root = path
            .canonicalize()
            .map_err(|_| IndexError::RepositoryNotFound(path.to_path_buf()))?;
        let index = self.registry.open(repo_id).await?;
        self.registry.set_root(repo_id, &root)?;

        let rules_root = root.clone();
        let rules = tokio::task::spawn_blocking(move || IgnoreRuleSet::load(&rules_root))
            .await
            .map_err(|e| IndexError::Other(format!("rule loading task failed: {e}")))?;

        self.sync.watch(WatchTarget {
            repo_id: repo_id.to_string(),
            root,
            index,
            rules,
        })
    }

    /// Stop syncing `repo_id`. Returns `false` if it was not watched.
    pub fn unwatch_repository(&self, repo_id: &str) -> bool {
        self.sync.unwatch(repo_id)
    }

    #[must_use]
    pub fn is_watching(&self, repo_id: &str) -> bool {
        self.sync.is_watching(repo_id)
    }

    /// Notifications for every change applied by a watcher.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }
}
