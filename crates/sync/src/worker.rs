//! A single pipeline worker.
//!
//! Pulls parsed records from its channel in line order, skips lines the
//! checkpoint store already committed, resolves content, embeds, batches,
//! and submits. A batch's line numbers are committed only after the store
//! accepted the corresponding items, which is what makes an interrupted
//! run resumable without double work.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use checkpoint::CheckpointStore;
use embedding::{EmbeddingProvider, fallback_vector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use vecsync_core::{BreakerDecision, ChangeOp, CircuitBreaker, ErrorCategory, RetryPolicies, object_id};
use vectorstore::{ItemStatus, UpsertObject, VectorStore};

use crate::batcher::{Batch, Batcher, DeleteItem, UpsertItem};
use crate::parser::LineRecord;
use crate::progress::SyncStats;
use crate::resolver::{Resolution, Resolver};

/// Everything a worker needs, cloneable per shard.
#[derive(Clone)]
pub struct WorkerContext {
  pub run_id: String,
  pub collection: String,
  pub checkpoint: CheckpointStore,
  pub store: Arc<dyn VectorStore>,
  pub embedder: Arc<dyn EmbeddingProvider>,
  pub resolver: Arc<Resolver>,
  pub policies: Arc<RetryPolicies>,
  pub breaker: Arc<CircuitBreaker>,
  pub stats: Arc<SyncStats>,
  pub batch_items: usize,
  pub batch_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
  Clean,
  Fatal,
}

/// Escalations that end the worker instead of one line.
#[derive(Debug)]
enum WorkerError {
  /// The checkpoint store is unusable; nothing can be marked done.
  Checkpoint(checkpoint::StoreError),
  /// A fatal category (memory) surfaced while processing.
  Fatal(ErrorCategory),
}

/// Run one worker until its channel drains or it is cancelled.
pub async fn worker_loop(
  worker_id: usize,
  mut rx: mpsc::Receiver<LineRecord>,
  ctx: WorkerContext,
  cancel: CancellationToken,
) -> WorkerExit {
  trace!(worker_id, "Worker starting");
  let mut worker = Worker::new(ctx);

  loop {
    let msg = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        debug!(worker_id, "Worker cancelled, draining in-flight batch");
        break;
      }
      msg = rx.recv() => msg,
    };

    let Some(record) = msg else {
      trace!(worker_id, "Worker input exhausted");
      break;
    };

    if let Err(e) = worker.process(record).await {
      return worker.escalate(worker_id, e);
    }
  }

  // Drain: close the open batch and commit whatever completed.
  if let Err(e) = worker.drain().await {
    return worker.escalate(worker_id, e);
  }
  trace!(worker_id, "Worker finished");
  WorkerExit::Clean
}

struct Worker {
  ctx: WorkerContext,
  batcher: Batcher,
  /// Policy-skipped lines waiting to ride the next checkpoint commit.
  pending_completed: Vec<u64>,
}

impl Worker {
  fn new(ctx: WorkerContext) -> Self {
    let batcher = Batcher::new(ctx.batch_items, ctx.batch_bytes);
    Self {
      ctx,
      batcher,
      pending_completed: Vec::new(),
    }
  }

  fn escalate(&self, worker_id: usize, e: WorkerError) -> WorkerExit {
    match e {
      WorkerError::Checkpoint(err) => error!(worker_id, error = %err, "Checkpoint store failed, aborting worker"),
      WorkerError::Fatal(cat) => error!(worker_id, category = %cat, "Fatal failure, aborting worker"),
    }
    WorkerExit::Fatal
  }

  async fn process(&mut self, record: LineRecord) -> Result<(), WorkerError> {
    let line = record.line;
    let already = self
      .ctx
      .checkpoint
      .is_completed(&self.ctx.run_id, line)
      .await
      .map_err(WorkerError::Checkpoint)?;
    if already {
      trace!(line, "Line already committed, skipping");
      self.ctx.stats.skipped_resume.fetch_add(1, Ordering::Relaxed);
      return Ok(());
    }

    match record.record.op {
      ChangeOp::Delete => {
        let id = object_id(&self.ctx.collection, &record.record.repo, &record.record.path);
        let ready = self.batcher.push_delete(DeleteItem {
          line: Some(line),
          raw: record.raw,
          id,
        });
        self.submit_all(ready).await
      }
      ChangeOp::Rename => {
        // Lowered to delete-old + upsert-new. The line number rides the
        // upsert; the delete is best-effort under the same identifiers.
        let old_id = object_id(&self.ctx.collection, &record.record.repo, &record.record.path);
        let ready = self.batcher.push_delete(DeleteItem {
          line: None,
          raw: record.raw.clone(),
          id: old_id,
        });
        self.submit_all(ready).await?;
        self.index_record(record).await
      }
      ChangeOp::Add | ChangeOp::Modify => self.index_record(record).await,
    }
  }

  async fn index_record(&mut self, record: LineRecord) -> Result<(), WorkerError> {
    let line = record.line;
    match self.ctx.resolver.resolve(&record.record).await {
      Ok(Resolution::Skip(reason)) => {
        debug!(line, path = %record.record.target_path(), reason = reason.as_str(), "Skipping by policy");
        self.ctx.stats.skipped_policy.fetch_add(1, Ordering::Relaxed);
        self.pending_completed.push(line);
        if self.pending_completed.len() >= self.ctx.batch_items {
          self.commit_lines(Vec::new(), 0).await?;
        }
        Ok(())
      }
      Ok(Resolution::Indexable(text)) => {
        self.ctx.stats.bytes_in.fetch_add(text.len() as u64, Ordering::Relaxed);
        let vector = self.embed(&text).await;
        let path = record.record.target_path().to_string();
        let id = object_id(&self.ctx.collection, &record.record.repo, &path);
        let ready = self.batcher.push_upsert(UpsertItem {
          line: Some(line),
          raw: record.raw,
          object: UpsertObject {
            id,
            repo: record.record.repo.clone(),
            path,
            content: text,
            vector,
          },
        });
        self.submit_all(ready).await
      }
      Err(e) => {
        let category = e.category();
        if category.is_fatal() {
          return Err(WorkerError::Fatal(category));
        }
        warn!(line, category = %category, error = %e, "Failed to resolve content");
        self
          .ctx
          .checkpoint
          .record_failure(&self.ctx.run_id, line, &record.raw, category, &e.to_string())
          .await
          .map_err(WorkerError::Checkpoint)?;
        self.ctx.stats.record_failure(category);
        Ok(())
      }
    }
  }

  async fn embed(&self, text: &str) -> Vec<f32> {
    match self.ctx.embedder.embed(text).await {
      Ok(vector) => vector,
      Err(e) => {
        warn!(error = %e, "Embedder unavailable, using fallback vector");
        self.ctx.stats.embed_fallbacks.fetch_add(1, Ordering::Relaxed);
        fallback_vector(text, self.ctx.embedder.dimensions())
      }
    }
  }

  async fn drain(&mut self) -> Result<(), WorkerError> {
    let ready = self.batcher.flush();
    self.submit_all(ready).await?;
    // Commit any trailing policy skips.
    self.commit_lines(Vec::new(), 0).await
  }

  async fn submit_all(&mut self, batches: Vec<Batch>) -> Result<(), WorkerError> {
    for batch in batches {
      self.ctx.stats.batches.fetch_add(1, Ordering::Relaxed);
      match batch {
        Batch::Upserts(items) => self.submit_upserts(items).await?,
        Batch::Deletes(items) => self.submit_deletes(items).await?,
      }
    }
    Ok(())
  }

  /// Submit upserts with per-item retry. Whole-call failures retry the
  /// batch; per-item failures retry just those items. Exhausted items are
  /// recorded as failed lines and the pipeline moves on.
  async fn submit_upserts(&mut self, items: Vec<UpsertItem>) -> Result<(), WorkerError> {
    let mut remaining = items;
    let mut gate = ErrorCategory::VectorStore;
    let mut attempt: u32 = 0;

    loop {
      if let Some(wait) = self.breaker_wait(gate, attempt) {
        match wait {
          Some(delay) => {
            attempt += 1;
            self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            continue;
          }
          None => {
            return self.fail_items_upsert(remaining, gate, "circuit breaker open").await;
          }
        }
      }

      let objects: Vec<UpsertObject> = remaining.iter().map(|i| i.object.clone()).collect();
      match self.ctx.store.batch_upsert(&self.ctx.collection, &objects).await {
        Err(e) => {
          let category = e.category();
          self.ctx.breaker.record(category, false);
          let policy = self.ctx.policies.for_category(category);
          if attempt + 1 < policy.max_attempts {
            let backoff = policy.backoff_for_attempt(attempt);
            warn!(category = %category, attempt = attempt + 1, error = %e, "Upsert batch failed, retrying");
            attempt += 1;
            gate = category;
            self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(backoff).await;
            continue;
          }
          return self.fail_items_upsert(remaining, category, &e.to_string()).await;
        }
        Ok(statuses) => {
          let mut ok_lines = Vec::new();
          let mut retry_items = Vec::new();
          let mut had_failure = false;

          for (item, status) in remaining.into_iter().zip(statuses) {
            match status {
              ItemStatus::Ok => {
                if let Some(line) = item.line {
                  ok_lines.push(line);
                }
              }
              ItemStatus::Failed { message, category } => {
                had_failure = true;
                let policy = self.ctx.policies.for_category(category);
                if category.retryable_in_run() && attempt + 1 < policy.max_attempts {
                  retry_items.push(item);
                } else {
                  self.record_item_failure(item.line, &item.raw, category, &message).await?;
                }
              }
            }
          }

          self.ctx.breaker.record(ErrorCategory::VectorStore, !had_failure);
          let indexed = ok_lines.len() as u64;
          self.commit_lines(ok_lines, indexed).await?;

          if retry_items.is_empty() {
            return Ok(());
          }
          let backoff = self
            .ctx
            .policies
            .for_category(ErrorCategory::VectorStore)
            .backoff_for_attempt(attempt);
          attempt += 1;
          self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
          remaining = retry_items;
          tokio::time::sleep(backoff).await;
        }
      }
    }
  }

  async fn submit_deletes(&mut self, items: Vec<DeleteItem>) -> Result<(), WorkerError> {
    let mut remaining = items;
    let mut gate = ErrorCategory::VectorStore;
    let mut attempt: u32 = 0;

    loop {
      if let Some(wait) = self.breaker_wait(gate, attempt) {
        match wait {
          Some(delay) => {
            attempt += 1;
            self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            continue;
          }
          None => {
            return self.fail_items_delete(remaining, gate, "circuit breaker open").await;
          }
        }
      }

      let ids: Vec<uuid::Uuid> = remaining.iter().map(|i| i.id).collect();
      match self.ctx.store.batch_delete(&self.ctx.collection, &ids).await {
        Err(e) => {
          let category = e.category();
          self.ctx.breaker.record(category, false);
          let policy = self.ctx.policies.for_category(category);
          if attempt + 1 < policy.max_attempts {
            let backoff = policy.backoff_for_attempt(attempt);
            warn!(category = %category, attempt = attempt + 1, error = %e, "Delete batch failed, retrying");
            attempt += 1;
            gate = category;
            self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(backoff).await;
            continue;
          }
          return self.fail_items_delete(remaining, category, &e.to_string()).await;
        }
        Ok(statuses) => {
          let mut ok_lines = Vec::new();
          let mut retry_items = Vec::new();
          let mut had_failure = false;

          for (item, status) in remaining.into_iter().zip(statuses) {
            match status {
              ItemStatus::Ok => {
                if let Some(line) = item.line {
                  ok_lines.push(line);
                }
              }
              ItemStatus::Failed { message, category } => {
                had_failure = true;
                let policy = self.ctx.policies.for_category(category);
                if category.retryable_in_run() && attempt + 1 < policy.max_attempts {
                  retry_items.push(item);
                } else {
                  self.record_item_failure(item.line, &item.raw, category, &message).await?;
                }
              }
            }
          }

          self.ctx.breaker.record(ErrorCategory::VectorStore, !had_failure);
          let indexed = ok_lines.len() as u64;
          self.commit_lines(ok_lines, indexed).await?;

          if retry_items.is_empty() {
            return Ok(());
          }
          let backoff = self
            .ctx
            .policies
            .for_category(ErrorCategory::VectorStore)
            .backoff_for_attempt(attempt);
          attempt += 1;
          self.ctx.stats.retries.fetch_add(1, Ordering::Relaxed);
          remaining = retry_items;
          tokio::time::sleep(backoff).await;
        }
      }
    }
  }

  /// Breaker gate. `None` means proceed; `Some(Some(delay))` means wait
  /// and re-check; `Some(None)` means give up on this batch.
  fn breaker_wait(&self, gate: ErrorCategory, attempt: u32) -> Option<Option<std::time::Duration>> {
    match self.ctx.breaker.check(gate) {
      BreakerDecision::Allow | BreakerDecision::Probe => None,
      BreakerDecision::Open(remaining) => {
        let policy = self.ctx.policies.for_category(gate);
        if attempt + 1 < policy.max_attempts {
          Some(Some(remaining))
        } else {
          Some(None)
        }
      }
    }
  }

  async fn fail_items_upsert(
    &mut self,
    items: Vec<UpsertItem>,
    category: ErrorCategory,
    message: &str,
  ) -> Result<(), WorkerError> {
    if category.is_fatal() {
      return Err(WorkerError::Fatal(category));
    }
    for item in items {
      self.record_item_failure(item.line, &item.raw, category, message).await?;
    }
    Ok(())
  }

  async fn fail_items_delete(
    &mut self,
    items: Vec<DeleteItem>,
    category: ErrorCategory,
    message: &str,
  ) -> Result<(), WorkerError> {
    if category.is_fatal() {
      return Err(WorkerError::Fatal(category));
    }
    for item in items {
      self.record_item_failure(item.line, &item.raw, category, message).await?;
    }
    Ok(())
  }

  async fn record_item_failure(
    &self,
    line: Option<u64>,
    raw: &str,
    category: ErrorCategory,
    message: &str,
  ) -> Result<(), WorkerError> {
    let Some(line) = line else {
      // Rename-side delete with no line of its own; the upsert half
      // still owns the checkpoint state.
      warn!(category = %category, error = message, "Auxiliary delete failed");
      return Ok(());
    };
    warn!(line, category = %category, error = message, "Line failed");
    self
      .ctx
      .checkpoint
      .record_failure(&self.ctx.run_id, line, raw, category, message)
      .await
      .map_err(WorkerError::Checkpoint)?;
    self.ctx.stats.record_failure(category);
    Ok(())
  }

  /// Commit store-confirmed lines plus any pending policy skips in one
  /// atomic batch.
  async fn commit_lines(&mut self, mut lines: Vec<u64>, indexed: u64) -> Result<(), WorkerError> {
    lines.append(&mut self.pending_completed);
    if lines.is_empty() {
      return Ok(());
    }
    self
      .ctx
      .checkpoint
      .commit_batch(&self.ctx.run_id, &lines)
      .await
      .map_err(WorkerError::Checkpoint)?;
    self.ctx.stats.indexed.fetch_add(indexed, Ordering::Relaxed);
    Ok(())
  }
}
