//! Code chunking, incremental vector indexing, and hybrid retrieval.
//!
//! Source files are split into function/class chunks (with a line-window
//! fallback), embedded into a per-repository index, and searched with vector
//! similarity boosted by lexical hits from ripgrep. A filesystem watcher keeps
//! each index in step with edits, one debounced file at a time.

pub mod ann;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod ignore_rules;
pub mod languages;
pub mod lexical;
pub mod persist;
pub mod registry;
pub mod store;
pub mod sync;
pub mod watch_state;

pub use chunker::{Chunk, ChunkKind};
pub use config::Config;
pub use context::format_as_context;
pub use engine::{CodeSearchEngine, EngineConfig, IndexReport};
pub use error::{IndexError, Result};
pub use fusion::RankedResult;
pub use registry::IndexRegistry;
pub use sync::{SyncAction, SyncEvent};
