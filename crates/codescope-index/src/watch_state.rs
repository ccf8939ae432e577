//! Per-path debounce table for filesystem events.
//!
//! Every path has at most one pending event. A new event for the same path
//! replaces the old one and restarts its window; the event is released only
//! once its window elapses with no further events for that path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use tokio::time::Instant;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
}

impl FsEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: FsEventKind,
    deadline: Instant,
}

#[derive(Debug)]
pub struct WatchState {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl WatchState {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event; the most recent event for a path wins.
    pub fn record(&mut self, path: PathBuf, kind: FsEventKind, now: Instant) {
        self.pending.insert(
            path,
            Pending {
                kind,
                deadline: now + self.window,
            },
        );
    }

    /// Remove and return every event whose window has elapsed, in deadline
    /// order (path order among equal deadlines).
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(PathBuf, FsEventKind)> {
        let mut expired: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, p)| (p.deadline, path.clone()))
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|(_, path)| {
                self.pending
                    .remove(&path)
                    .map(|pending| (path, pending.kind))
            })
            .collect()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Map a raw `notify` event to per-path events. A two-path rename becomes
/// a delete of the old path plus a create of the new one.
#[must_use]
pub fn classify(event: &notify::Event) -> Vec<(PathBuf, FsEventKind)> {
    let all = |kind: FsEventKind| -> Vec<(PathBuf, FsEventKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match event.kind {
        EventKind::Create(_) => all(FsEventKind::Created),
        EventKind::Remove(_) => all(FsEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                (from.clone(), FsEventKind::Deleted),
                (to.clone(), FsEventKind::Created),
            ],
            _ => all(FsEventKind::Modified),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(FsEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(FsEventKind::Created),
        EventKind::Modify(_) | EventKind::Any => all(FsEventKind::Modified),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
