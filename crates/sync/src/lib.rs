//! The ingest pipeline: change stream in, indexed objects out.
//!
//! ```text
//! input stream → parser → shard fan-out → N workers → vector store
//!                                             │
//!                                   checkpoint commits
//! ```
//!
//! Each worker pulls parsed records from its bounded channel, skips lines
//! the checkpoint store already knows, resolves content, embeds, batches,
//! and commits line numbers together with the downstream side effect.

pub mod analyze;
pub mod batcher;
pub mod coordinator;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod shard;
pub mod worker;

use thiserror::Error;

pub use analyze::{AnalyzeReport, analyze_stream};
pub use coordinator::{InputSource, SyncOptions, SyncOutcome, run_sync};
pub use progress::SyncStats;
pub use resolver::Resolver;

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("checkpoint error: {0}")]
  Checkpoint(#[from] checkpoint::StoreError),
  #[error("vector store error: {0}")]
  Store(#[from] vectorstore::StoreError),
  #[error("worker panicked: {0}")]
  WorkerPanic(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
