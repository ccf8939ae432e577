//! Incremental synchronization: filesystem watcher → debounce → index update.
//!
//! One worker task per watched repository drains that repository's events,
//! so every index mutation for a repository is applied by a single writer.
//! Repositories are watched independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::chunker::{Chunk, ChunkerConfig, chunk_file, chunk_subtree};
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::ignore_rules::IgnoreRuleSet;
use crate::persist;
use crate::store::EmbeddingIndex;
use crate::watch_state::{DEFAULT_DEBOUNCE, FsEventKind, WatchState, classify};

/// What a sync step did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// File re-chunked; `chunks` is the new chunk count for the file.
    Updated { chunks: usize },
    /// New directory walked; `chunks` is the chunk count under it.
    DirectoryIndexed { files: usize, chunks: usize },
    /// File or directory gone; `chunks` were retired.
    Removed { chunks: usize },
    /// Path exists but is not a regular file.
    Skipped,
}

/// Notification published after each debounced path is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Applied {
        repo_id: String,
        path: PathBuf,
        action: SyncAction,
    },
    Failed {
        repo_id: String,
        path: PathBuf,
        error: String,
    },
}

impl SyncEvent {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Applied { path, .. } | Self::Failed { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub debounce: Duration,
    /// Capacity of the raw event channel and the notification channel.
    pub channel_capacity: usize,
    pub chunker: ChunkerConfig,
    /// When set, each applied batch is persisted under this directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            channel_capacity: 256,
            chunker: ChunkerConfig::default(),
            data_dir: None,
        }
    }
}

/// A repository to keep in sync.
pub struct WatchTarget<E> {
    pub repo_id: String,
    /// Canonical repository root.
    pub root: PathBuf,
    pub index: Arc<EmbeddingIndex<E>>,
    pub rules: IgnoreRuleSet,
}

struct RepoWatcher {
    _watcher: notify::RecommendedWatcher,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RepoWatcher {
    fn drop(&mut self) {
        // Pending debounce entries and queued events die with the task.
        self.handle.abort();
    }
}

/// Owns one watcher and one worker per repository.
pub struct SyncManager<E> {
    config: SyncConfig,
    watchers: Mutex<HashMap<String, RepoWatcher>>,
    events: broadcast::Sender<SyncEvent>,
    _embedder: std::marker::PhantomData<fn() -> E>,
}

impl<E: Embedder + 'static> SyncManager<E> {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            watchers: Mutex::new(HashMap::new()),
            events,
            _embedder: std::marker::PhantomData,
        }
    }

    /// Receive a [`SyncEvent`] for every handled path.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Start watching `target.root`. Replaces an existing watcher for the
    /// same repository. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RepositoryNotFound`] if the root is not a
    /// directory, or [`IndexError::Watcher`] if the OS watch cannot be set up.
    pub fn watch(&self, target: WatchTarget<E>) -> Result<()> {
        if !target.root.is_dir() {
            return Err(IndexError::RepositoryNotFound(target.root));
        }

        let capacity = self.config.channel_capacity.max(1);
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Event>(capacity);

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = notify_tx.blocking_send(event);
                }
                Err(e) => tracing::warn!("repository watcher error: {e}"),
            })?;
        watcher.watch(&target.root, RecursiveMode::Recursive)?;

        let repo_id = target.repo_id.clone();
        let root = target.root.clone();
        let worker = Worker {
            target,
            chunker: self.config.chunker.clone(),
            data_dir: self.config.data_dir.clone(),
            events: self.events.clone(),
        };
        let handle = tokio::spawn(worker.run(notify_rx, self.config.debounce));

        let previous = self.lock_watchers()?.insert(
            repo_id.clone(),
            RepoWatcher {
                _watcher: watcher,
                handle,
            },
        );
        if previous.is_some() {
            tracing::debug!(repo_id, "replaced existing watcher");
        }
        tracing::info!(repo_id, root = %root.display(), "watching repository");
        Ok(())
    }

    /// Stop watching. Returns `false` if the repository was not watched.
    /// Events not yet applied are discarded.
    pub fn unwatch(&self, repo_id: &str) -> bool {
        let removed = match self.lock_watchers() {
            Ok(mut watchers) => watchers.remove(repo_id),
            Err(e) => {
                tracing::warn!(repo_id, "unwatch failed: {e}");
                None
            }
        };
        if removed.is_some() {
            tracing::info!(repo_id, "stopped watching repository");
        }
        removed.is_some()
    }

    #[must_use]
    pub fn is_watching(&self, repo_id: &str) -> bool {
        self.lock_watchers()
            .is_ok_and(|watchers| watchers.contains_key(repo_id))
    }

    /// Watched repository ids, sorted.
    #[must_use]
    pub fn watched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_watchers()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn lock_watchers(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RepoWatcher>>> {
        self.watchers
            .lock()
            .map_err(|e| IndexError::Other(format!("watcher table lock poisoned: {e}")))
    }
}

struct Worker<E> {
    target: WatchTarget<E>,
    chunker: ChunkerConfig,
    data_dir: Option<PathBuf>,
    events: broadcast::Sender<SyncEvent>,
}

impl<E: Embedder + 'static> Worker<E> {
    async fn run(self, mut rx: mpsc::Receiver<notify::Event>, debounce: Duration) {
        let mut state = WatchState::new(debounce);
        loop {
            let deadline = state.next_deadline();
            tokio::select! {
                received = rx.recv() => {
                    let Some(event) = received else { break };
                    let now = Instant::now();
                    for (path, kind) in classify(&event) {
                        if self.accepts(&path, kind) {
                            state.record(path, kind, now);
                        }
                    }
                }
                () = sleep_until(deadline) => {
                    let due = state.drain_expired(Instant::now());
                    let mut changed = false;
                    for (path, kind) in due {
                        changed |= self.apply(path, kind).await;
                    }
                    if changed {
                        self.persist().await;
                    }
                }
            }
        }
        tracing::debug!(repo_id = %self.target.repo_id, "sync worker stopped");
    }

    /// Directories only matter when they appear (e.g. moved in) or vanish;
    /// their own modify events carry nothing to index.
    fn accepts(&self, path: &Path, kind: FsEventKind) -> bool {
        let rules = &self.target.rules;
        let root = &self.target.root;
        if path.is_dir() {
            kind == FsEventKind::Created && !rules.should_ignore_dir(path, root)
        } else {
            !rules.should_ignore(path, root)
        }
    }

    /// Apply one debounced event. Returns whether the index changed.
    async fn apply(&self, path: PathBuf, kind: FsEventKind) -> bool {
        let repo_id = &self.target.repo_id;
        let outcome = self.execute(&path, kind).await;

        match outcome {
            Ok(action) => {
                tracing::debug!(repo_id, path = %path.display(), %kind, ?action, "sync applied");
                let changed = !matches!(
                    action,
                    SyncAction::Skipped | SyncAction::Removed { chunks: 0 }
                );
                let _ = self.events.send(SyncEvent::Applied {
                    repo_id: repo_id.clone(),
                    path,
                    action,
                });
                changed
            }
            Err(e) => {
                tracing::warn!(repo_id, path = %path.display(), %kind, "sync failed, index unchanged: {e}");
                let _ = self.events.send(SyncEvent::Failed {
                    repo_id: repo_id.clone(),
                    path,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// The filesystem is the source of truth: a path that no longer exists
    /// is removed whatever the last event said, and one that exists is
    /// re-chunked.
    async fn execute(&self, path: &Path, kind: FsEventKind) -> Result<SyncAction> {
        let index = &self.target.index;
        if !path.exists() {
            let chunks = index.remove_chunks_under(path).await?;
            return Ok(SyncAction::Removed { chunks });
        }
        if path.is_dir() {
            let (files, chunks) = self.chunk_dir(path).await?;
            let count = chunks.len();
            index.replace_under(path, chunks).await?;
            return Ok(SyncAction::DirectoryIndexed {
                files,
                chunks: count,
            });
        }
        if !path.is_file() {
            tracing::debug!(path = %path.display(), %kind, "not a regular file");
            return Ok(SyncAction::Skipped);
        }
        let chunks = self.rechunk(path).await?;
        let count = chunks.len();
        index.update_file_chunks(path, chunks).await?;
        Ok(SyncAction::Updated { chunks: count })
    }

    async fn chunk_dir(&self, dir: &Path) -> Result<(usize, Vec<Chunk>)> {
        let root = self.target.root.clone();
        let dir = dir.to_path_buf();
        let rules = self.target.rules.clone();
        let config = self.chunker.clone();
        let walked =
            tokio::task::spawn_blocking(move || chunk_subtree(&root, &dir, &rules, &config))
                .await
                .map_err(|e| IndexError::Other(format!("chunking task failed: {e}")))?;
        Ok((walked.files_chunked, walked.chunks))
    }

    async fn rechunk(&self, path: &Path) -> Result<Vec<Chunk>> {
        let path = path.to_path_buf();
        let config = self.chunker.clone();
        tokio::task::spawn_blocking(move || chunk_file(&path, &config))
            .await
            .map_err(|e| IndexError::Other(format!("chunking task failed: {e}")))?
    }

    async fn persist(&self) {
        let Some(data_dir) = self.data_dir.clone() else {
            return;
        };
        let repo_id = self.target.repo_id.clone();
        let state = match self.target.index.snapshot() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(repo_id, "cannot persist index: {e}");
                return;
            }
        };
        let result = tokio::task::spawn_blocking(move || {
            persist::save(&data_dir, &repo_id, &*state).map(|_| ())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(repo_id = %self.target.repo_id, "persist failed: {e}"),
            Err(e) => tracing::warn!(repo_id = %self.target.repo_id, "persist task failed: {e}"),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
