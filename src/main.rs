use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use codescope_index::embedder::AnyEmbedder;
use codescope_index::lexical::RipgrepSource;
use codescope_index::persist;
use codescope_index::{CodeSearchEngine, Config, IndexError, SyncEvent, format_as_context};

/// Index a repository and search it with hybrid lexical + vector ranking.
#[derive(Parser)]
#[command(name = "codescope", version)]
struct Cli {
    /// Path to configuration file (TOML). Falls back to `CODESCOPE_CONFIG`,
    /// then `codescope.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index for a repository.
    Index { path: PathBuf },

    /// Search a repository. Uses the persisted index when one exists,
    /// otherwise indexes first.
    Query {
        path: PathBuf,
        text: String,
        /// Number of results.
        #[arg(short, long)]
        k: Option<usize>,
        /// Print a `<code_context>` block instead of a result list.
        #[arg(long)]
        context: bool,
    },

    /// Index a repository, then keep the index in sync until Ctrl-C.
    Watch { path: PathBuf },
}

type Engine = CodeSearchEngine<AnyEmbedder, RipgrepSource>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "config loaded");

    let engine = CodeSearchEngine::from_config(&config);

    match cli.command {
        Command::Index { path } => run_index(&engine, &path).await,
        Command::Query {
            path,
            text,
            k,
            context,
        } => run_query(&engine, &config, &path, &text, k, context).await,
        Command::Watch { path } => run_watch(&engine, &path).await,
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CODESCOPE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("codescope.toml")
}

async fn run_index(engine: &Engine, path: &std::path::Path) -> anyhow::Result<()> {
    let report = engine
        .index_repository(path)
        .await
        .with_context(|| format!("failed to index {}", path.display()))?;

    println!(
        "{}: {} chunks from {}/{} files in {} ms",
        report.repo_id,
        report.chunk_count,
        report.files_indexed,
        report.files_scanned,
        report.duration_ms
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    Ok(())
}

async fn run_query(
    engine: &Engine,
    config: &Config,
    path: &std::path::Path,
    text: &str,
    k: Option<usize>,
    as_context: bool,
) -> anyhow::Result<()> {
    let repo_id = open_or_index(engine, config, path).await?;
    let results = engine
        .query(&repo_id, text, k)
        .await
        .with_context(|| format!("query against {repo_id} failed"))?;

    if as_context {
        println!("{}", format_as_context(&results));
        return Ok(());
    }
    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        let marker = if result.lexical_match { "*" } else { " " };
        println!(
            "{:>2}. {:.3}{marker} {}:{}-{} ({})",
            rank + 1,
            result.score,
            chunk.file.display(),
            chunk.start,
            chunk.end,
            chunk.kind.as_str()
        );
        if let Some(first) = chunk.snippet.lines().find(|l| !l.trim().is_empty()) {
            println!("      {}", first.trim());
        }
    }
    Ok(())
}

async fn open_or_index(
    engine: &Engine,
    config: &Config,
    path: &std::path::Path,
) -> anyhow::Result<String> {
    if let Some(data_dir) = &config.index.data_dir {
        let (repo_id, _) = engine.registry().resolve(path)?;
        if persist::is_persisted(data_dir, &repo_id) {
            match engine.open_repository(path).await {
                Ok(repo_id) => return Ok(repo_id),
                Err(e @ (IndexError::IndexCorrupt(_) | IndexError::DimensionMismatch { .. })) => {
                    tracing::warn!(repo_id, "persisted index unusable, rebuilding: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    let report = engine
        .index_repository(path)
        .await
        .with_context(|| format!("failed to index {}", path.display()))?;
    Ok(report.repo_id)
}

async fn run_watch(engine: &Engine, path: &std::path::Path) -> anyhow::Result<()> {
    let report = engine
        .index_repository(path)
        .await
        .with_context(|| format!("failed to index {}", path.display()))?;
    let mut events = engine.subscribe();
    engine
        .watch_repository(&report.root, &report.repo_id)
        .await
        .context("failed to start watcher")?;
    println!(
        "watching {} ({} chunks), Ctrl-C to stop",
        report.root.display(),
        report.chunk_count
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Applied { path, action, .. }) => {
                    println!("{action:?} {}", path.display());
                }
                Ok(SyncEvent::Failed { path, error, .. }) => {
                    println!("failed {}: {error}", path.display());
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "sync notifications dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.unwatch_repository(&report.repo_id);
    Ok(())
}
