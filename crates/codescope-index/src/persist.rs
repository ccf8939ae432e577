//! On-disk index generations.
//!
//! Layout per repository:
//!
//! ```text
//! <data_dir>/<repo_id>/CURRENT            -> "gen-<uuid>"
//! <data_dir>/<repo_id>/gen-<uuid>/vectors.json
//! <data_dir>/<repo_id>/gen-<uuid>/chunks.json
//! ```
//!
//! A save writes a complete new generation directory, then atomically
//! replaces `CURRENT` (temp file + rename). Readers follow `CURRENT`, so the
//! vector file and the metadata file are always replaced as a pair.
//!
//! Saves for one repository are serialized within the process. Across
//! processes, a save only prunes the generation it replaced plus
//! generations older than [`STALE_GENERATION_AGE`], so it never deletes a
//! generation another writer is still producing.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ann::AnnIndex;
use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::store::IndexState;

const CURRENT_FILE: &str = "CURRENT";
const VECTORS_FILE: &str = "vectors.json";
const CHUNKS_FILE: &str = "chunks.json";
const ROOT_FILE: &str = "ROOT";
const GENERATION_PREFIX: &str = "gen-";

/// Non-current generations younger than this may belong to a save in
/// another process and are left alone.
pub const STALE_GENERATION_AGE: Duration = Duration::from_secs(600);

static SAVE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn save_lock(root: &Path) -> Result<Arc<Mutex<()>>> {
    let mut locks = SAVE_LOCKS
        .lock()
        .map_err(|e| IndexError::Other(format!("save lock table poisoned: {e}")))?;
    Ok(Arc::clone(locks.entry(root.to_path_buf()).or_default()))
}

#[derive(Serialize, Deserialize)]
struct MetadataFile {
    chunks: Vec<Chunk>,
    tombstones: Vec<bool>,
}

#[must_use]
pub fn repo_dir(data_dir: &Path, repo_id: &str) -> PathBuf {
    data_dir.join(repo_id)
}

/// Whether a committed generation exists for `repo_id`.
#[must_use]
pub fn is_persisted(data_dir: &Path, repo_id: &str) -> bool {
    repo_dir(data_dir, repo_id).join(CURRENT_FILE).is_file()
}

/// Write `state` as a new generation and make it current.
///
/// # Errors
///
/// Returns an I/O or serialization error; the previous generation stays
/// current in that case.
pub fn save<A>(data_dir: &Path, repo_id: &str, state: &IndexState<A>) -> Result<PathBuf>
where
    A: AnnIndex + Serialize,
{
    let root = repo_dir(data_dir, repo_id);
    let lock = save_lock(&root)?;
    let _guard = lock
        .lock()
        .map_err(|e| IndexError::Other(format!("save lock poisoned: {e}")))?;

    let generation = format!("{GENERATION_PREFIX}{}", uuid::Uuid::new_v4());
    let gen_dir = root.join(&generation);
    fs::create_dir_all(&gen_dir)?;

    write_json(&gen_dir.join(VECTORS_FILE), state.ann())?;
    write_json(
        &gen_dir.join(CHUNKS_FILE),
        &MetadataFile {
            chunks: state.metadata().to_vec(),
            tombstones: state.tombstones().to_vec(),
        },
    )?;

    let previous = read_pointer(&root);
    write_atomic(&root, CURRENT_FILE, &generation)?;

    prune_generations(&root, &generation, previous.as_deref());
    tracing::debug!(
        repo_id,
        generation = %generation,
        slots = state.metadata().len(),
        "index generation saved"
    );
    Ok(gen_dir)
}

/// Load the current generation for `repo_id`.
///
/// # Errors
///
/// Returns [`IndexError::NotIndexed`] if nothing was saved, and
/// [`IndexError::IndexCorrupt`] if the generation is unreadable or its
/// vector and metadata counts disagree.
pub fn load<A>(data_dir: &Path, repo_id: &str) -> Result<IndexState<A>>
where
    A: AnnIndex + DeserializeOwned,
{
    let root = repo_dir(data_dir, repo_id);
    let generation = match fs::read_to_string(root.join(CURRENT_FILE)) {
        Ok(g) => g.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::NotIndexed(repo_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    if !generation.starts_with(GENERATION_PREFIX) || generation.contains(['/', '\\']) {
        return Err(IndexError::IndexCorrupt(format!(
            "{repo_id}: invalid generation pointer {generation:?}"
        )));
    }

    let gen_dir = root.join(&generation);
    let ann: A = read_json(&gen_dir.join(VECTORS_FILE), repo_id)?;
    let meta: MetadataFile = read_json(&gen_dir.join(CHUNKS_FILE), repo_id)?;
    let state = IndexState::from_parts(ann, meta.chunks, meta.tombstones)
        .map_err(|e| IndexError::IndexCorrupt(format!("{repo_id}: {e}")))?;

    tracing::debug!(repo_id, generation = %generation, "index generation loaded");
    Ok(state)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Write `contents` to `root/name` through a uniquely named temp file and
/// a rename, so concurrent writers never share a temp path.
fn write_atomic(root: &Path, name: &str, contents: &str) -> Result<()> {
    let tmp = root.join(format!("{name}.{}.tmp", uuid::Uuid::new_v4()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, root.join(name)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn read_pointer(root: &Path) -> Option<String> {
    fs::read_to_string(root.join(CURRENT_FILE))
        .ok()
        .map(|g| g.trim().to_string())
}

/// Record the repository root next to its generations.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn save_root(data_dir: &Path, repo_id: &str, repo_root: &Path) -> Result<()> {
    let root = repo_dir(data_dir, repo_id);
    fs::create_dir_all(&root)?;
    write_atomic(&root, ROOT_FILE, &repo_root.to_string_lossy())
}

/// The repository root recorded by [`save_root`], if any.
#[must_use]
pub fn load_root(data_dir: &Path, repo_id: &str) -> Option<PathBuf> {
    let raw = fs::read_to_string(repo_dir(data_dir, repo_id).join(ROOT_FILE)).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn read_json<T: DeserializeOwned>(path: &Path, repo_id: &str) -> Result<T> {
    let file = fs::File::open(path).map_err(|e| {
        IndexError::IndexCorrupt(format!("{repo_id}: cannot open {}: {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        IndexError::IndexCorrupt(format!("{repo_id}: cannot parse {}: {e}", path.display()))
    })
}

/// Remove the generation `replaced` and any stale generation that is
/// neither `keep` nor the one `CURRENT` points at now. Failures only warn.
fn prune_generations(root: &Path, keep: &str, replaced: Option<&str>) {
    let current = read_pointer(root);
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(GENERATION_PREFIX)
            || name == keep
            || current.as_deref() == Some(&*name)
        {
            continue;
        }
        if replaced != Some(&*name) && !is_stale(&entry) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), "failed to prune old generation: {e}");
            }
        }
    }
}

fn is_stale(entry: &fs::DirEntry) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= STALE_GENERATION_AGE)
}
