//! Lock-free pipeline counters and the periodic reporter.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use vecsync_core::ErrorCategory;

/// Shared counters. Workers only ever touch atomics here, so the
/// reporter can read a snapshot without taking any lock.
#[derive(Debug, Default)]
pub struct SyncStats {
  /// Lines whose store side effect committed.
  pub indexed: AtomicU64,
  /// Lines completed by policy skip (no store write).
  pub skipped_policy: AtomicU64,
  /// Lines skipped because a previous attempt already committed them.
  pub skipped_resume: AtomicU64,
  pub failed: AtomicU64,
  pub malformed: AtomicU64,
  pub markers: AtomicU64,
  pub batches: AtomicU64,
  pub bytes_in: AtomicU64,
  pub retries: AtomicU64,
  pub embed_fallbacks: AtomicU64,
  failures_by_category: [AtomicU64; ErrorCategory::ALL.len()],
}

impl SyncStats {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn record_failure(&self, category: ErrorCategory) {
    self.failed.fetch_add(1, Ordering::Relaxed);
    self.failures_by_category[category.index()].fetch_add(1, Ordering::Relaxed);
  }

  pub fn failures_for(&self, category: ErrorCategory) -> u64 {
    self.failures_by_category[category.index()].load(Ordering::Relaxed)
  }

  /// Lines that reached the completed terminal state so far.
  pub fn completed(&self) -> u64 {
    self.indexed.load(Ordering::Relaxed)
      + self.skipped_policy.load(Ordering::Relaxed)
      + self.skipped_resume.load(Ordering::Relaxed)
  }

  pub fn snapshot(&self) -> ProgressSnapshot {
    ProgressSnapshot {
      processed: self.completed(),
      indexed: self.indexed.load(Ordering::Relaxed),
      skipped_policy: self.skipped_policy.load(Ordering::Relaxed),
      skipped_resume: self.skipped_resume.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
      malformed: self.malformed.load(Ordering::Relaxed),
      batches: self.batches.load(Ordering::Relaxed),
      bytes_in: self.bytes_in.load(Ordering::Relaxed),
      retries: self.retries.load(Ordering::Relaxed),
      embed_fallbacks: self.embed_fallbacks.load(Ordering::Relaxed),
      failures_by_category: ErrorCategory::ALL
        .iter()
        .filter_map(|cat| {
          let count = self.failures_for(*cat);
          (count > 0).then(|| (cat.as_str().to_string(), count))
        })
        .collect(),
    }
  }
}

/// Machine-readable progress record.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
  pub processed: u64,
  pub indexed: u64,
  pub skipped_policy: u64,
  pub skipped_resume: u64,
  pub failed: u64,
  pub malformed: u64,
  pub batches: u64,
  pub bytes_in: u64,
  pub retries: u64,
  pub embed_fallbacks: u64,
  pub failures_by_category: Vec<(String, u64)>,
}

/// Periodic reporter task. Reads atomics only; never blocks a worker.
pub async fn progress_reporter(stats: Arc<SyncStats>, interval: Duration, cancel: CancellationToken) {
  let started = Instant::now();
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  // The first tick fires immediately; skip it.
  ticker.tick().await;

  let mut last_processed = 0u64;
  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => {}
    }

    let snapshot = stats.snapshot();
    let rate = (snapshot.processed.saturating_sub(last_processed)) as f64 / interval.as_secs_f64();
    last_processed = snapshot.processed;

    info!(
      processed = snapshot.processed,
      failed = snapshot.failed,
      skipped = snapshot.skipped_policy + snapshot.skipped_resume,
      batches = snapshot.batches,
      rate = format!("{rate:.1}/s"),
      elapsed_secs = started.elapsed().as_secs(),
      "Sync progress"
    );
    if let Ok(json) = serde_json::to_string(&snapshot) {
      info!(target: "vecsync::progress", "{json}");
    }
  }
}

/// One-shot final summary.
pub fn log_summary(stats: &SyncStats, elapsed: Duration, export_path: Option<&std::path::Path>) {
  let snapshot = stats.snapshot();
  info!(
    processed = snapshot.processed,
    indexed = snapshot.indexed,
    skipped_policy = snapshot.skipped_policy,
    skipped_resume = snapshot.skipped_resume,
    failed = snapshot.failed,
    malformed = snapshot.malformed,
    retries = snapshot.retries,
    embed_fallbacks = snapshot.embed_fallbacks,
    elapsed_secs = elapsed.as_secs(),
    "Sync finished"
  );
  for (category, count) in &snapshot.failures_by_category {
    info!(category, count, "Failures by category");
  }
  if let Some(path) = export_path
    && snapshot.failed > 0
  {
    info!(path = %path.display(), "Unresolved failures exported");
  }
}
