//! No-op store backing dry-run mode.

use crate::{ItemStatus, StoreError, UpsertObject, VectorStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Accepts every submission without touching anything; counts what it
/// would have written so dry-run can report it.
#[derive(Debug, Default)]
pub struct NoopVectorStore {
  upserts: AtomicU64,
  deletes: AtomicU64,
}

impl NoopVectorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn upserts(&self) -> u64 {
    self.upserts.load(Ordering::Relaxed)
  }

  pub fn deletes(&self) -> u64 {
    self.deletes.load(Ordering::Relaxed)
  }
}

#[async_trait]
impl VectorStore for NoopVectorStore {
  fn name(&self) -> &str {
    "noop"
  }

  async fn ensure_schema(&self, collection: &str) -> Result<(), StoreError> {
    debug!(collection, "Dry run: skipping schema ensure");
    Ok(())
  }

  async fn batch_upsert(&self, _collection: &str, objects: &[UpsertObject]) -> Result<Vec<ItemStatus>, StoreError> {
    self.upserts.fetch_add(objects.len() as u64, Ordering::Relaxed);
    Ok(objects.iter().map(|_| ItemStatus::Ok).collect())
  }

  async fn batch_delete(&self, _collection: &str, ids: &[Uuid]) -> Result<Vec<ItemStatus>, StoreError> {
    self.deletes.fetch_add(ids.len() as u64, Ordering::Relaxed);
    Ok(ids.iter().map(|_| ItemStatus::Ok).collect())
  }

  async fn health(&self) -> bool {
    true
  }
}
