use std::path::PathBuf;

use super::{Config, EmbeddingProvider};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODESCOPE_DATA_DIR") {
            self.index.data_dir = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Ok(v) = std::env::var("CODESCOPE_COMPACTION_THRESHOLD") {
            if let Ok(threshold) = v.parse::<f32>() {
                self.index.compaction_threshold = threshold;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_COMPACTION_THRESHOLD value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_CHUNK_WINDOW") {
            if let Ok(lines) = v.parse::<usize>() {
                self.chunker.window_lines = lines;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_CHUNK_WINDOW value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_TOP_K") {
            if let Ok(top_k) = v.parse::<usize>() {
                self.search.top_k = top_k;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_LEXICAL_BONUS") {
            if let Ok(bonus) = v.parse::<f32>() {
                self.search.lexical_bonus = bonus;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_LEXICAL_BONUS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_DEBOUNCE_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.sync.debounce_ms = ms;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_DEBOUNCE_MS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_LEXICAL_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.lexical.enabled = enabled;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_LEXICAL_ENABLED value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_LEXICAL_COMMAND") {
            self.lexical.command = v;
        }
        if let Ok(v) = std::env::var("CODESCOPE_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value::<EmbeddingProvider>(serde_json::Value::String(
                v.to_lowercase(),
            )) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODESCOPE_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESCOPE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("CODESCOPE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
    }
}
