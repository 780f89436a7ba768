//! Durable progress store for the sync pipeline.
//!
//! One SQLite file in WAL mode holds three relations: runs, completed
//! lines, and failed lines. All side-effect bookkeeping lives here; a
//! batch of line numbers is committed in a single transaction so a kill
//! at any point leaves either all of them or none of them visible.

mod store;

pub use store::{CheckpointStore, FailedLine, RunRecord, RunStatus, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;
