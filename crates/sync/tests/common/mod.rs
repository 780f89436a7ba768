//! Test doubles for the pipeline: an in-memory vector store that records
//! every call, and embedders with controllable behavior.

use async_trait::async_trait;
use embedding::{EmbeddingError, EmbeddingProvider};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;
use vectorstore::{ItemStatus, StoreError, UpsertObject, VectorStore};

#[derive(Debug, Clone)]
pub struct StoredObject {
  pub path: String,
  pub content: String,
  pub vector: Vec<f32>,
}

/// In-memory store double. Records objects, per-identifier upsert call
/// counts, and can fail a configurable number of leading batch calls.
#[derive(Debug, Default)]
pub struct RecordingStore {
  objects: Mutex<HashMap<Uuid, StoredObject>>,
  upsert_calls: Mutex<HashMap<Uuid, u32>>,
  pub fail_next: AtomicU32,
  pub upsert_batches: AtomicU64,
  pub delete_batches: AtomicU64,
}

impl RecordingStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn object(&self, id: &Uuid) -> Option<StoredObject> {
    self.objects.lock().unwrap().get(id).cloned()
  }

  pub fn object_count(&self) -> usize {
    self.objects.lock().unwrap().len()
  }

  pub fn contents(&self) -> HashMap<Uuid, String> {
    self
      .objects
      .lock()
      .unwrap()
      .iter()
      .map(|(id, obj)| (*id, obj.content.clone()))
      .collect()
  }

  pub fn upsert_calls_for(&self, id: &Uuid) -> u32 {
    self.upsert_calls.lock().unwrap().get(id).copied().unwrap_or(0)
  }

  fn take_failure(&self) -> bool {
    self
      .fail_next
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }
}

#[async_trait]
impl VectorStore for RecordingStore {
  fn name(&self) -> &str {
    "recording"
  }

  async fn ensure_schema(&self, _collection: &str) -> Result<(), StoreError> {
    Ok(())
  }

  async fn batch_upsert(&self, _collection: &str, objects: &[UpsertObject]) -> Result<Vec<ItemStatus>, StoreError> {
    if self.take_failure() {
      return Err(StoreError::Server {
        status: 503,
        message: "injected failure".into(),
      });
    }
    self.upsert_batches.fetch_add(1, Ordering::SeqCst);
    let mut map = self.objects.lock().unwrap();
    let mut calls = self.upsert_calls.lock().unwrap();
    for object in objects {
      *calls.entry(object.id).or_insert(0) += 1;
      map.insert(
        object.id,
        StoredObject {
          path: object.path.clone(),
          content: object.content.clone(),
          vector: object.vector.clone(),
        },
      );
    }
    Ok(objects.iter().map(|_| ItemStatus::Ok).collect())
  }

  async fn batch_delete(&self, _collection: &str, ids: &[Uuid]) -> Result<Vec<ItemStatus>, StoreError> {
    if self.take_failure() {
      return Err(StoreError::Server {
        status: 503,
        message: "injected failure".into(),
      });
    }
    self.delete_batches.fetch_add(1, Ordering::SeqCst);
    let mut map = self.objects.lock().unwrap();
    for id in ids {
      map.remove(id);
    }
    Ok(ids.iter().map(|_| ItemStatus::Ok).collect())
  }

  async fn health(&self) -> bool {
    true
  }
}

/// Embedder returning a constant vector.
pub struct StaticEmbedder {
  pub dim: usize,
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
  fn name(&self) -> &str {
    "static"
  }

  fn model_id(&self) -> &str {
    "static-test"
  }

  fn dimensions(&self) -> usize {
    self.dim
  }

  async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
    Ok(vec![0.5; self.dim])
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(texts.iter().map(|_| vec![0.5; self.dim]).collect())
  }

  async fn is_available(&self) -> bool {
    true
  }
}

/// Embedder that always fails, forcing the fallback vector path.
pub struct DownEmbedder {
  pub dim: usize,
}

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
  fn name(&self) -> &str {
    "down"
  }

  fn model_id(&self) -> &str {
    "down-test"
  }

  fn dimensions(&self) -> usize {
    self.dim
  }

  async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
    Err(EmbeddingError::Network("connection refused".into()))
  }

  async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Err(EmbeddingError::Network("connection refused".into()))
  }

  async fn is_available(&self) -> bool {
    false
  }
}
