use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chunker: ChunkerSection,
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub lexical: LexicalSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
}

fn default_window_lines() -> usize {
    120
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChunkerSection {
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
}

impl Default for ChunkerSection {
    fn default() -> Self {
        Self {
            window_lines: default_window_lines(),
        }
    }
}

fn default_compaction_threshold() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexSection {
    /// Persist indexes here. Unset means in-memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_lexical_bonus() -> f32 {
    0.1
}

fn default_vector_candidates() -> usize {
    50
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_lexical_bonus")]
    pub lexical_bonus: f32,
    /// ANN hits fetched before fusion.
    #[serde(default = "default_vector_candidates")]
    pub vector_candidates: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            lexical_bonus: default_lexical_bonus(),
            vector_candidates: default_vector_candidates(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_channel_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SyncSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lexical_command() -> String {
    "rg".into()
}

fn default_max_count() -> usize {
    200
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LexicalSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lexical_command")]
    pub command: String,
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

impl Default for LexicalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_lexical_command(),
            max_count: default_max_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    Ollama,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_dimension() -> usize {
    384
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector size for the hash provider; remote models report their own.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: default_base_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}
