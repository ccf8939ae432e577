mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use crate::chunker::ChunkerConfig;
use crate::embedder::{AnyEmbedder, HashEmbedder, OllamaEmbedder};
use crate::error::{IndexError, Result};
use crate::sync::SyncConfig;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if the file exists but cannot be read
    /// or parsed, or if the resulting values are invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                IndexError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            toml::from_str::<Self>(&content).map_err(|e| {
                IndexError::Config(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.chunker.window_lines == 0 {
            return Err(IndexError::Config("chunker.window_lines must be > 0".into()));
        }
        if self.sync.debounce_ms == 0 {
            return Err(IndexError::Config("sync.debounce_ms must be > 0".into()));
        }
        if self.sync.channel_capacity == 0 {
            return Err(IndexError::Config("sync.channel_capacity must be > 0".into()));
        }
        let threshold = self.index.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(IndexError::Config(format!(
                "index.compaction_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if !self.search.lexical_bonus.is_finite() || self.search.lexical_bonus < 0.0 {
            return Err(IndexError::Config(format!(
                "search.lexical_bonus must be >= 0, got {}",
                self.search.lexical_bonus
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(IndexError::Config("embedding.dimension must be > 0".into()));
        }
        if self.lexical.enabled && self.lexical.command.trim().is_empty() {
            return Err(IndexError::Config("lexical.command must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            window_lines: self.chunker.window_lines,
        }
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            channel_capacity: self.sync.channel_capacity,
            chunker: self.chunker_config(),
            data_dir: self.index.data_dir.clone(),
        }
    }

    /// Embedder selected by `[embedding]`.
    #[must_use]
    pub fn embedder(&self) -> AnyEmbedder {
        match self.embedding.provider {
            EmbeddingProvider::Hash => {
                AnyEmbedder::Hash(HashEmbedder::new(self.embedding.dimension))
            }
            EmbeddingProvider::Ollama => AnyEmbedder::Ollama(OllamaEmbedder::new(
                &self.embedding.base_url,
                self.embedding.model.clone(),
            )),
        }
    }
}
