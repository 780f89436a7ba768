//! Client interface to the vector store.
//!
//! The store is an external HTTP service; this crate is the only place
//! that knows its wire dialect. Everything upstream works against the
//! [`VectorStore`] trait, which is what lets dry-run swap in
//! [`NoopVectorStore`] and tests swap in an in-memory double.

pub mod http;
pub mod noop;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;
use vecsync_core::ErrorCategory;

pub use http::HttpVectorStore;
pub use noop::NoopVectorStore;

/// One object to upsert: identifier, payload properties, vector.
#[derive(Debug, Clone)]
pub struct UpsertObject {
  pub id: Uuid,
  pub repo: String,
  pub path: String,
  pub content: String,
  pub vector: Vec<f32>,
}

/// Per-item outcome of a batch call.
#[derive(Debug, Clone)]
pub enum ItemStatus {
  Ok,
  Failed { message: String, category: ErrorCategory },
}

impl ItemStatus {
  pub fn is_ok(&self) -> bool {
    matches!(self, ItemStatus::Ok)
  }
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("request failed: {0}")]
  Request(String),
  #[error("request timed out")]
  Timeout,
  #[error("rate limited")]
  RateLimited,
  #[error("server error (status {status}): {message}")]
  Server { status: u16, message: String },
  #[error("rejected (status {status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("invalid response: {0}")]
  InvalidResponse(String),
}

impl StoreError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      StoreError::Request(_) => ErrorCategory::Network,
      StoreError::Timeout => ErrorCategory::Timeout,
      StoreError::RateLimited => ErrorCategory::RateLimit,
      StoreError::Server { .. } => ErrorCategory::VectorStore,
      StoreError::Rejected { .. } => ErrorCategory::Validation,
      StoreError::InvalidResponse(_) => ErrorCategory::VectorStore,
    }
  }

  pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      StoreError::Timeout
    } else {
      StoreError::Request(err.to_string())
    }
  }
}

/// Batch-oriented vector store operations.
///
/// Upserts replace by identifier; deletes are delete-if-exists; schema
/// creation is idempotent.
#[async_trait]
pub trait VectorStore: Send + Sync {
  fn name(&self) -> &str;

  /// Create the collection if absent; tolerate "already exists".
  async fn ensure_schema(&self, collection: &str) -> Result<(), StoreError>;

  /// Upsert a batch, returning one status per input object, in order.
  async fn batch_upsert(&self, collection: &str, objects: &[UpsertObject]) -> Result<Vec<ItemStatus>, StoreError>;

  /// Delete a batch of identifiers; absent identifiers are not errors.
  async fn batch_delete(&self, collection: &str, ids: &[Uuid]) -> Result<Vec<ItemStatus>, StoreError>;

  async fn health(&self) -> bool;
}
