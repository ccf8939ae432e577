use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;

use super::*;
use crate::embedder::Embedder;

const ENV_KEYS: [&str; 11] = [
    "CODESCOPE_DATA_DIR",
    "CODESCOPE_COMPACTION_THRESHOLD",
    "CODESCOPE_CHUNK_WINDOW",
    "CODESCOPE_TOP_K",
    "CODESCOPE_LEXICAL_BONUS",
    "CODESCOPE_DEBOUNCE_MS",
    "CODESCOPE_LEXICAL_ENABLED",
    "CODESCOPE_LEXICAL_COMMAND",
    "CODESCOPE_EMBEDDING_PROVIDER",
    "CODESCOPE_EMBEDDING_BASE_URL",
    "CODESCOPE_EMBEDDING_MODEL",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("codescope.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.chunker.window_lines, 120);
    assert!(config.index.data_dir.is_none());
    assert!((config.index.compaction_threshold - 0.25).abs() < f32::EPSILON);
    assert_eq!(config.search.top_k, 10);
    assert!((config.search.lexical_bonus - 0.1).abs() < f32::EPSILON);
    assert_eq!(config.search.vector_candidates, 50);
    assert_eq!(config.sync.debounce_ms, 2000);
    assert!(config.lexical.enabled);
    assert_eq!(config.lexical.command, "rg");
    assert_eq!(config.embedding.provider, EmbeddingProvider::Hash);
    assert_eq!(config.embedding.dimension, 384);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear_env();
    let config = Config::load(std::path::Path::new("/nonexistent/codescope.toml")).unwrap();
    assert_eq!(config.search.top_k, 10);
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[chunker]
window_lines = 60

[index]
data_dir = "/var/lib/codescope"

[search]
top_k = 5

[sync]
debounce_ms = 500

[embedding]
provider = "ollama"
model = "mxbai-embed-large"
"#,
    );

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.chunker.window_lines, 60);
    assert_eq!(
        config.index.data_dir,
        Some(PathBuf::from("/var/lib/codescope"))
    );
    assert_eq!(config.search.top_k, 5);
    assert!((config.search.lexical_bonus - 0.1).abs() < f32::EPSILON);
    assert_eq!(config.sync.debounce_ms, 500);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.model, "mxbai-embed-large");
    assert_eq!(config.embedding.base_url, "http://localhost:11434");
    assert_eq!(config.embedder().name(), "ollama");
}

#[test]
#[serial]
fn invalid_toml_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[chunker\nwindow_lines = ");
    clear_env();
    assert!(matches!(Config::load(&path), Err(IndexError::Config(_))));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    unsafe {
        std::env::set_var("CODESCOPE_DATA_DIR", "/tmp/cs-data");
        std::env::set_var("CODESCOPE_CHUNK_WINDOW", "40");
        std::env::set_var("CODESCOPE_TOP_K", "3");
        std::env::set_var("CODESCOPE_LEXICAL_BONUS", "0.2");
        std::env::set_var("CODESCOPE_DEBOUNCE_MS", "100");
        std::env::set_var("CODESCOPE_LEXICAL_ENABLED", "false");
        std::env::set_var("CODESCOPE_EMBEDDING_PROVIDER", "Ollama");
        std::env::set_var("CODESCOPE_EMBEDDING_MODEL", "all-minilm");
    }

    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.index.data_dir, Some(PathBuf::from("/tmp/cs-data")));
    assert_eq!(config.chunker.window_lines, 40);
    assert_eq!(config.search.top_k, 3);
    assert!((config.search.lexical_bonus - 0.2).abs() < f32::EPSILON);
    assert_eq!(config.sync.debounce_ms, 100);
    assert!(!config.lexical.enabled);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.model, "all-minilm");
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("CODESCOPE_CHUNK_WINDOW", "many");
        std::env::set_var("CODESCOPE_EMBEDDING_PROVIDER", "openai");
        std::env::set_var("CODESCOPE_LEXICAL_ENABLED", "maybe");
    }

    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.chunker.window_lines, 120);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Hash);
    assert!(config.lexical.enabled);
}

#[derive(Clone, Default)]
struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
#[serial]
fn invalid_search_and_lexical_env_values_warn() {
    clear_env();
    unsafe {
        std::env::set_var("CODESCOPE_TOP_K", "ten");
        std::env::set_var("CODESCOPE_LEXICAL_BONUS", "high");
        std::env::set_var("CODESCOPE_LEXICAL_ENABLED", "maybe");
    }

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let mut config = Config::default();
    tracing::subscriber::with_default(subscriber, || config.apply_env_overrides());
    clear_env();

    assert_eq!(config.search.top_k, 10);
    assert!((config.search.lexical_bonus - 0.1).abs() < f32::EPSILON);
    assert!(config.lexical.enabled);

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    for key in [
        "CODESCOPE_TOP_K",
        "CODESCOPE_LEXICAL_BONUS",
        "CODESCOPE_LEXICAL_ENABLED",
    ] {
        assert!(output.contains(key), "no warning for {key}: {output}");
    }
}

#[test]
#[serial]
fn empty_data_dir_env_means_in_memory() {
    clear_env();
    unsafe { std::env::set_var("CODESCOPE_DATA_DIR", "") };
    let mut config = Config::default();
    config.index.data_dir = Some(PathBuf::from("/somewhere"));
    config.apply_env_overrides();
    clear_env();
    assert!(config.index.data_dir.is_none());
}

#[test]
fn validate_rejects_bad_values() {
    let mut config = Config::default();
    config.chunker.window_lines = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.compaction_threshold = 0.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.compaction_threshold = 1.5;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.sync.debounce_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.search.lexical_bonus = -0.1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.embedding.dimension = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.lexical.command = "  ".into();
    assert!(config.validate().is_err());
    config.lexical.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn derived_configs() {
    let mut config = Config::default();
    config.sync.debounce_ms = 750;
    config.chunker.window_lines = 30;
    let sync = config.sync_config();
    assert_eq!(sync.debounce, std::time::Duration::from_millis(750));
    assert_eq!(sync.chunker.window_lines, 30);
    assert_eq!(config.embedder().name(), "hash");
}
