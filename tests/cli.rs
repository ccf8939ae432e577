use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn codescope(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_codescope"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("CODESCOPE_DATA_DIR")
        .env_remove("CODESCOPE_EMBEDDING_PROVIDER")
        .env_remove("CODESCOPE_LEXICAL_ENABLED")
        .env("RUST_LOG", "warn")
        .output()
        .expect("run codescope binary")
}

fn setup() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(
        repo.join("main.py"),
        "def greet(name):\n    return 'hello ' + name\n",
    )
    .unwrap();

    let data = tmp.path().join("data");
    let config = tmp.path().join("codescope.toml");
    std::fs::write(
        &config,
        format!(
            "[index]\ndata_dir = {:?}\n\n[lexical]\nenabled = false\n\n[embedding]\nprovider = \"hash\"\ndimension = 64\n",
            data.display().to_string()
        ),
    )
    .unwrap();
    (tmp, repo, config)
}

#[test]
fn index_reports_chunks_and_persists() {
    let (tmp, repo, config) = setup();
    let out = codescope(&config, &["index", repo.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("demo: 1 chunks"), "{stdout}");
    assert!(tmp.path().join("data/demo/CURRENT").exists());
}

#[test]
fn query_uses_persisted_index() {
    let (_tmp, repo, config) = setup();
    let out = codescope(&config, &["index", repo.to_str().unwrap()]);
    assert!(out.status.success());

    let out = codescope(&config, &["query", repo.to_str().unwrap(), "greet"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("main.py:1-2"), "{stdout}");
}

#[test]
fn query_context_block() {
    let (_tmp, repo, config) = setup();
    let out = codescope(
        &config,
        &["query", repo.to_str().unwrap(), "greet", "--context"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("<code_context>"), "{stdout}");
    assert!(stdout.contains("lines=\"1-2\""), "{stdout}");
}

#[test]
fn missing_repository_fails() {
    let (tmp, _repo, config) = setup();
    let missing = tmp.path().join("nope");
    let out = codescope(&config, &["index", missing.to_str().unwrap()]);
    assert!(!out.status.success());
}
