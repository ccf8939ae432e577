use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use codescope_index::embedder::HashEmbedder;
use codescope_index::engine::{CodeSearchEngine, EngineConfig};
use codescope_index::lexical::RipgrepSource;
use codescope_index::sync::SyncConfig;
use codescope_index::{IndexRegistry, SyncAction, SyncEvent};
use tokio::sync::broadcast;

const DEBOUNCE: Duration = Duration::from_millis(300);
const WAIT: Duration = Duration::from_secs(10);

type Engine = CodeSearchEngine<HashEmbedder, RipgrepSource>;

fn engine() -> Engine {
    let registry = IndexRegistry::in_memory(Arc::new(HashEmbedder::new(256)));
    let config = EngineConfig {
        lexical_enabled: false,
        sync: SyncConfig {
            debounce: DEBOUNCE,
            ..SyncConfig::default()
        },
        ..EngineConfig::default()
    };
    CodeSearchEngine::new(Arc::new(registry), RipgrepSource::default(), config)
}

async fn watched_repo(engine: &Engine) -> (tempfile::TempDir, String, PathBuf) {
    let repo = tempfile::tempdir().unwrap();
    fs::write(repo.path().join("a.py"), "def f():\n    return 1\n").unwrap();
    fs::write(repo.path().join("b.py"), "def keep_me():\n    return 2\n").unwrap();
    let report = engine.index_repository(repo.path()).await.unwrap();
    engine
        .watch_repository(&report.root, &report.repo_id)
        .await
        .unwrap();
    // Let the OS watch settle before generating events.
    tokio::time::sleep(Duration::from_millis(100)).await;
    (repo, report.repo_id, report.root)
}

async fn wait_for(
    rx: &mut broadcast::Receiver<SyncEvent>,
    mut pred: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("sync event not observed in time")
}

fn spans_of(engine: &Engine, repo_id: &str, file: &Path) -> Vec<(usize, usize)> {
    engine
        .registry()
        .get(repo_id)
        .unwrap()
        .live_chunks()
        .unwrap()
        .iter()
        .filter(|c| c.file == file)
        .map(|c| (c.start, c.end))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_is_picked_up_after_debounce() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    let a = root.join("a.py");

    fs::write(
        &a,
        "def f():\n    return 1\n\ndef zebra_quantum():\n    return 'zebra_quantum'\n",
    )
    .unwrap();

    let event = wait_for(&mut rx, |e| e.path() == a).await;
    assert_eq!(
        event,
        SyncEvent::Applied {
            repo_id: repo_id.clone(),
            path: a.clone(),
            action: SyncAction::Updated { chunks: 2 },
        }
    );

    assert_eq!(spans_of(&engine, &repo_id, &a), vec![(1, 2), (4, 5)]);
    let results = engine
        .query(&repo_id, "zebra_quantum", Some(1))
        .await
        .unwrap();
    assert_eq!((results[0].chunk.start, results[0].chunk.end), (4, 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rapid_writes_coalesce_into_one_update() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    let a = root.join("a.py");

    for i in 0..5 {
        fs::write(&a, format!("def f():\n    return {i}\n")).unwrap();
    }

    wait_for(&mut rx, |e| e.path() == a).await;
    tokio::time::sleep(DEBOUNCE * 3).await;
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    let live = engine
        .registry()
        .get(&repo_id)
        .unwrap()
        .live_chunks()
        .unwrap();
    let a_chunks: Vec<_> = live.iter().filter(|c| c.file == a).collect();
    assert_eq!(a_chunks.len(), 1);
    assert!(a_chunks[0].snippet.contains("return 4"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_removes_only_that_file() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    let a = root.join("a.py");
    let b = root.join("b.py");
    let b_before = spans_of(&engine, &repo_id, &b);

    fs::remove_file(&a).unwrap();

    let event = wait_for(&mut rx, |e| e.path() == a).await;
    assert!(matches!(
        event,
        SyncEvent::Applied {
            action: SyncAction::Removed { chunks: 1 },
            ..
        }
    ));
    assert!(spans_of(&engine, &repo_id, &a).is_empty());
    assert_eq!(spans_of(&engine, &repo_id, &b), b_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_moves_chunks_to_new_path() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    let a = root.join("a.py");
    let c = root.join("c.py");

    fs::rename(&a, &c).unwrap();

    let mut seen_old = false;
    let mut seen_new = false;
    wait_for(&mut rx, |e| {
        seen_old |= e.path() == a;
        seen_new |= e.path() == c;
        seen_old && seen_new
    })
    .await;

    assert!(spans_of(&engine, &repo_id, &a).is_empty());
    assert_eq!(spans_of(&engine, &repo_id, &c), vec![(1, 2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ignored_paths_do_not_touch_the_index() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    let before = engine
        .registry()
        .get(&repo_id)
        .unwrap()
        .live_chunks()
        .unwrap();

    fs::create_dir_all(root.join("node_modules")).unwrap();
    fs::write(root.join("node_modules/x.js"), "function x() {}\n").unwrap();
    fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

    tokio::time::sleep(DEBOUNCE * 3).await;
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    let after = engine
        .registry()
        .get(&repo_id)
        .unwrap()
        .live_chunks()
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unwatch_stops_updates() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let (_repo, repo_id, root) = watched_repo(&engine).await;
    assert!(engine.unwatch_repository(&repo_id));

    fs::write(root.join("a.py"), "def changed():\n    pass\n").unwrap();
    tokio::time::sleep(DEBOUNCE * 3).await;

    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert!(
        engine
            .registry()
            .get(&repo_id)
            .unwrap()
            .live_chunks()
            .unwrap()
            .iter()
            .any(|c| c.snippet.contains("return 1"))
    );
}
