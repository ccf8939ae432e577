//! Process-wide table of repository indexes.
//!
//! Repositories are keyed by `repo_id`, the basename of the canonical
//! repository root. Two repositories with the same directory name collide
//! and share one index; [`IndexRegistry::resolve`] logs when a different
//! root claims an id already in use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::ann::FlatIndex;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::persist;
use crate::store::{DEFAULT_COMPACTION_THRESHOLD, EmbeddingIndex};

struct Entry<E> {
    root: Option<PathBuf>,
    index: Arc<EmbeddingIndex<E, FlatIndex>>,
}

pub struct IndexRegistry<E> {
    embedder: Arc<E>,
    data_dir: Option<PathBuf>,
    compaction_threshold: f32,
    entries: RwLock<HashMap<String, Entry<E>>>,
}

impl<E: Embedder + 'static> IndexRegistry<E> {
    /// In-memory registry: nothing touches disk.
    #[must_use]
    pub fn in_memory(embedder: Arc<E>) -> Self {
        Self::new(embedder, None, DEFAULT_COMPACTION_THRESHOLD)
    }

    #[must_use]
    pub fn new(embedder: Arc<E>, data_dir: Option<PathBuf>, compaction_threshold: f32) -> Self {
        Self {
            embedder,
            data_dir,
            compaction_threshold,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    /// Canonicalize `path` and derive its repository id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RepositoryNotFound`] if `path` is not an
    /// existing directory.
    pub fn resolve(&self, path: &Path) -> Result<(String, PathBuf)> {
        let root = path
            .canonicalize()
            .map_err(|_| IndexError::RepositoryNotFound(path.to_path_buf()))?;
        if !root.is_dir() {
            return Err(IndexError::RepositoryNotFound(path.to_path_buf()));
        }
        let repo_id = repo_id_for(&root);

        if let Ok(entries) = self.entries.read()
            && let Some(Entry {
                root: Some(existing),
                ..
            }) = entries.get(&repo_id)
            && *existing != root
        {
            tracing::warn!(
                repo_id,
                existing = %existing.display(),
                incoming = %root.display(),
                "repository id collision, both roots share one index"
            );
        }
        Ok((repo_id, root))
    }

    /// Index for `repo_id`, created empty (unbuilt) if absent. `root`, when
    /// given, becomes the repository's recorded root.
    ///
    /// # Errors
    ///
    /// Fails only if the registry lock is poisoned.
    pub fn get_or_create(
        &self,
        repo_id: &str,
        root: Option<&Path>,
    ) -> Result<Arc<EmbeddingIndex<E>>> {
        let mut entries = self.write()?;
        let entry = entries.entry(repo_id.to_string()).or_insert_with(|| Entry {
            root: None,
            index: Arc::new(EmbeddingIndex::new(
                repo_id,
                Arc::clone(&self.embedder),
                self.compaction_threshold,
            )),
        });
        if let Some(root) = root {
            entry.root = Some(root.to_path_buf());
        }
        Ok(Arc::clone(&entry.index))
    }

    /// The built index for `repo_id`, loading the persisted generation if
    /// it is not in memory yet.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the index was never built (and
    /// nothing is persisted), [`IndexError::IndexCorrupt`] if the
    /// persisted generation is inconsistent, or
    /// [`IndexError::DimensionMismatch`] if it was built with a different
    /// embedding model.
    pub async fn open(&self, repo_id: &str) -> Result<Arc<EmbeddingIndex<E>>> {
        if let Some(index) = self.get(repo_id)
            && index.is_built()
        {
            return Ok(index);
        }

        let Some(data_dir) = self.data_dir.clone() else {
            return Err(IndexError::NotIndexed(repo_id.to_string()));
        };
        let id = repo_id.to_string();
        let (state, root) = tokio::task::spawn_blocking(move || {
            persist::load::<FlatIndex>(&data_dir, &id)
                .map(|state| (state, persist::load_root(&data_dir, &id)))
        })
        .await
        .map_err(|e| IndexError::Other(format!("index load task failed: {e}")))??;

        let loaded = Arc::new(EmbeddingIndex::with_state(
            repo_id,
            Arc::clone(&self.embedder),
            self.compaction_threshold,
            state,
        ));
        loaded.check_dimension().await?;
        let mut entries = self.write()?;
        let entry = entries.entry(repo_id.to_string()).or_insert_with(|| Entry {
            root: None,
            index: Arc::clone(&loaded),
        });
        // A concurrent build may have won the race.
        if !entry.index.is_built() {
            entry.index = Arc::clone(&loaded);
        }
        if entry.root.is_none() {
            entry.root = root;
        }
        tracing::info!(repo_id, root = ?entry.root, "index loaded from disk");
        Ok(Arc::clone(&entry.index))
    }

    #[must_use]
    pub fn get(&self, repo_id: &str) -> Option<Arc<EmbeddingIndex<E>>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(repo_id).map(|e| Arc::clone(&e.index)))
    }

    /// Last root registered for `repo_id`.
    #[must_use]
    pub fn root_of(&self, repo_id: &str) -> Option<PathBuf> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(repo_id).and_then(|e| e.root.clone()))
    }

    /// # Errors
    ///
    /// Fails only if the registry lock is poisoned.
    pub fn set_root(&self, repo_id: &str, root: &Path) -> Result<()> {
        if let Some(entry) = self.write()?.get_mut(repo_id) {
            entry.root = Some(root.to_path_buf());
        }
        Ok(())
    }

    /// Persist the current state of `repo_id`, and its root when known.
    /// No-op in memory mode.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the index was never built, or an
    /// I/O error from the write.
    pub async fn save(&self, repo_id: &str) -> Result<()> {
        let Some(data_dir) = self.data_dir.clone() else {
            return Ok(());
        };
        let index = self
            .get(repo_id)
            .ok_or_else(|| IndexError::NotIndexed(repo_id.to_string()))?;
        let state = index.snapshot()?;
        let root = self.root_of(repo_id);
        let id = repo_id.to_string();
        tokio::task::spawn_blocking(move || {
            persist::save(&data_dir, &id, &*state)?;
            match root {
                Some(root) => persist::save_root(&data_dir, &id, &root),
                None => Ok(()),
            }
        })
        .await
            .map_err(|e| IndexError::Other(format!("index save task failed: {e}")))??;
        Ok(())
    }

    /// Drop the in-memory index. Persisted generations are kept.
    pub fn remove(&self, repo_id: &str) -> bool {
        self.write().is_ok_and(|mut entries| entries.remove(repo_id).is_some())
    }

    /// Registered repository ids, sorted.
    #[must_use]
    pub fn repo_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry<E>>>> {
        self.entries
            .write()
            .map_err(|e| IndexError::Other(format!("registry lock poisoned: {e}")))
    }
}

/// Repository id for a canonical root: its final path component.
#[must_use]
pub fn repo_id_for(root: &Path) -> String {
    root.file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_source};
    use crate::embedder::HashEmbedder;

    fn registry(data_dir: Option<PathBuf>) -> IndexRegistry<HashEmbedder> {
        IndexRegistry::new(Arc::new(HashEmbedder::new(32)), data_dir, 0.25)
    }

    #[test]
    fn repo_id_is_basename() {
        assert_eq!(repo_id_for(Path::new("/home/u/projects/demo")), "demo");
        assert_eq!(repo_id_for(Path::new("/")), "root");
    }

    #[test]
    fn resolve_missing_path() {
        let err = registry(None)
            .resolve(Path::new("/nonexistent/codescope/xyz"))
            .unwrap_err();
        assert!(matches!(err, IndexError::RepositoryNotFound(_)));
    }

    #[test]
    fn resolve_file_is_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            registry(None).resolve(&file),
            Err(IndexError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn get_or_create_returns_same_index() {
        let reg = registry(None);
        let a = reg.get_or_create("demo", None).unwrap();
        let b = reg.get_or_create("demo", Some(Path::new("/r/demo"))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.root_of("demo"), Some(PathBuf::from("/r/demo")));
        assert_eq!(reg.repo_ids(), vec!["demo".to_string()]);
        assert!(reg.remove("demo"));
        assert!(reg.get("demo").is_none());
    }

    #[tokio::test]
    async fn open_unbuilt_in_memory_is_not_indexed() {
        let reg = registry(None);
        reg.get_or_create("demo", None).unwrap();
        assert!(matches!(
            reg.open("demo").await,
            Err(IndexError::NotIndexed(_))
        ));
    }

    #[tokio::test]
    async fn save_and_reopen_from_disk() {
        let data = tempfile::tempdir().unwrap();
        let reg = registry(Some(data.path().to_path_buf()));
        let index = reg
            .get_or_create("demo", Some(Path::new("/r/demo")))
            .unwrap();
        let chunks = chunk_source(
            Path::new("/r/demo/a.py"),
            "def alpha():\n    return 1\n",
            &ChunkerConfig::default(),
        );
        index.build(chunks.clone()).await.unwrap();
        reg.save("demo").await.unwrap();

        let fresh = registry(Some(data.path().to_path_buf()));
        let reopened = fresh.open("demo").await.unwrap();
        assert_eq!(fresh.root_of("demo"), Some(PathBuf::from("/r/demo")));
        assert_eq!(reopened.live_chunks().unwrap(), chunks);
        let hits = reopened.query("alpha", 1).await.unwrap();
        assert_eq!(hits[0].chunk.file, PathBuf::from("/r/demo/a.py"));
    }

    #[tokio::test]
    async fn save_in_memory_is_noop() {
        let reg = registry(None);
        assert!(reg.save("never-built").await.is_ok());
    }

    #[tokio::test]
    async fn reopen_with_other_model_dimension_fails() {
        let data = tempfile::tempdir().unwrap();
        let reg = registry(Some(data.path().to_path_buf()));
        let index = reg.get_or_create("demo", None).unwrap();
        let chunks = chunk_source(
            Path::new("/r/demo/a.py"),
            "def alpha():\n    return 1\n",
            &ChunkerConfig::default(),
        );
        index.build(chunks).await.unwrap();
        reg.save("demo").await.unwrap();

        let other = IndexRegistry::new(
            Arc::new(HashEmbedder::new(64)),
            Some(data.path().to_path_buf()),
            0.25,
        );
        assert!(matches!(
            other.open("demo").await,
            Err(IndexError::DimensionMismatch {
                expected: 32,
                actual: 64
            })
        ));
        assert!(other.get("demo").is_none());
    }
}
