//! Shard coordinator: owns the input stream, fans records out to
//! workers, joins their completion, and settles the run.
//!
//! Workers communicate with the coordinator only through the shared
//! checkpoint store and the stats counters. On a worker's fatal
//! escalation the coordinator cancels the shared token; the other workers
//! stop pulling, drain their in-flight batch to a commit boundary, and
//! exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use checkpoint::{CheckpointStore, FailedLine, RunStatus};
use embedding::EmbeddingProvider;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vecsync_core::{CircuitBreaker, Config, ErrorCategory, RetryPolicies, RetryPolicy};
use vectorstore::VectorStore;

use crate::parser::{Parsed, parse_line};
use crate::progress::{SyncStats, log_summary, progress_reporter};
use crate::resolver::Resolver;
use crate::shard::shard_for_line;
use crate::worker::{WorkerContext, WorkerExit, worker_loop};
use crate::{Result, SyncError};

/// Where the change stream comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
  Stdin,
  Path(PathBuf),
}

impl InputSource {
  /// Stable label stored in run metadata; resume matches on it.
  pub fn label(&self) -> String {
    match self {
      InputSource::Stdin => "-".to_string(),
      InputSource::Path(p) => p.to_string_lossy().into_owned(),
    }
  }

  pub async fn open(&self) -> std::io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match self {
      InputSource::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
      InputSource::Path(p) => Ok(Box::new(BufReader::new(tokio::fs::File::open(p).await?))),
    }
  }
}

/// Per-invocation options the CLI resolves from flags.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub input: InputSource,
  pub collection: String,
  pub checkpoint_path: PathBuf,
  pub dry_run: bool,
  pub resume: bool,
  pub export_failures: Option<PathBuf>,
}

/// Terminal result of one invocation.
#[derive(Debug)]
pub struct SyncOutcome {
  pub run_id: String,
  pub status: RunStatus,
  pub processed: u64,
  pub failed: u64,
  pub skipped_policy: u64,
  pub skipped_resume: u64,
  pub export_path: Option<PathBuf>,
}

impl SyncOutcome {
  pub fn exit_code(&self) -> i32 {
    self.status.exit_code()
  }
}

/// Run the full pipeline over one input stream.
///
/// The store and embedder are injected so dry-run and tests can swap
/// them; `cancel` is the drain signal (first interrupt). A second
/// interrupt is expected to abort the process outright at the CLI layer.
pub async fn run_sync(
  config: &Config,
  opts: SyncOptions,
  store: Arc<dyn VectorStore>,
  embedder: Arc<dyn EmbeddingProvider>,
  cancel: CancellationToken,
) -> Result<SyncOutcome> {
  let started = Instant::now();
  let checkpoint = CheckpointStore::open(&opts.checkpoint_path).await?;

  store.ensure_schema(&opts.collection).await?;

  let input_label = opts.input.label();
  let run = if opts.resume
    && let Some(existing) = checkpoint.resume_run(&input_label).await?
  {
    info!(run = %existing.id, input = %input_label, "Resuming unfinished run");
    existing
  } else {
    let run = checkpoint.start_run(&input_label).await?;
    info!(run = %run.id, input = %input_label, "Starting run");
    run
  };

  let stats = SyncStats::new();
  let resolver = Arc::new(Resolver::new(&config.resolver));
  let policies = Arc::new(RetryPolicies::with_transient_policy(RetryPolicy {
    max_attempts: config.retry.max_attempts,
    base_delay: Duration::from_millis(config.retry.base_delay_ms),
    max_delay: Duration::from_millis(config.retry.max_delay_ms),
    jitter: config.retry.jitter,
  }));
  let breaker = Arc::new(CircuitBreaker::new(vecsync_core::retry::BreakerConfig {
    window: Duration::from_secs(config.breaker.window_secs),
    threshold: config.breaker.threshold,
    min_samples: config.breaker.min_samples,
    cooldown: Duration::from_secs(config.breaker.cooldown_secs),
  }));

  let base_ctx = WorkerContext {
    run_id: run.id.clone(),
    collection: opts.collection.clone(),
    checkpoint: checkpoint.clone(),
    store: store.clone(),
    embedder: embedder.clone(),
    resolver: resolver.clone(),
    policies: policies.clone(),
    breaker: breaker.clone(),
    stats: stats.clone(),
    batch_items: config.sync.batch_size,
    batch_bytes: config.sync.batch_bytes,
  };

  // Optional pre-pass: replay failures persisted by an earlier run.
  if config.sync.retry_failed && !opts.dry_run {
    replay_failures(&checkpoint, &input_label, &base_ctx, &cancel).await?;
  }

  // Progress reporter on its own token so stopping it does not cancel
  // the workers.
  let reporter_cancel = cancel.child_token();
  let reporter = tokio::spawn(progress_reporter(
    stats.clone(),
    Duration::from_secs(config.sync.progress_interval_secs.max(1)),
    reporter_cancel.clone(),
  ));

  let workers = config.sync.workers.max(1);
  let mut senders = Vec::with_capacity(workers);
  let mut join_set: JoinSet<(usize, WorkerExit)> = JoinSet::new();
  for worker_id in 0..workers {
    let (tx, rx) = mpsc::channel(config.sync.channel_capacity.max(1));
    senders.push(tx);
    let ctx = base_ctx.clone();
    let worker_cancel = cancel.clone();
    join_set.spawn(async move { (worker_id, worker_loop(worker_id, rx, ctx, worker_cancel).await) });
  }

  // Reader loop: assign line numbers, parse, route by shard.
  let read_result = read_input(&opts.input, workers, &senders, &base_ctx, &cancel).await;
  drop(senders);

  let mut fatal = false;
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((worker_id, WorkerExit::Clean)) => debug!(worker_id, "Worker exited cleanly"),
      Ok((worker_id, WorkerExit::Fatal)) => {
        error!(worker_id, "Worker escalated, draining remaining workers");
        fatal = true;
        cancel.cancel();
      }
      Err(e) => {
        error!(error = %e, "Worker task panicked");
        fatal = true;
        cancel.cancel();
      }
    }
  }

  reporter_cancel.cancel();
  let _ = reporter.await;

  if let Err(e) = read_result {
    error!(error = %e, "Input stream failed");
    fatal = true;
  }

  let failed = checkpoint.failed_count(&run.id).await?;
  let processed = checkpoint.completed_count(&run.id).await?;
  let status = if fatal {
    RunStatus::Fatal
  } else if failed > 0 {
    RunStatus::Partial
  } else {
    RunStatus::Ok
  };

  let export_path = if failed > 0
    && let Some(path) = &opts.export_failures
  {
    match export_failures(&checkpoint, &run.id, path).await {
      Ok(()) => Some(path.clone()),
      Err(e) => {
        warn!(error = %e, path = %path.display(), "Failed to export failures");
        None
      }
    }
  } else {
    None
  };

  checkpoint.finish_run(&run.id, status, processed, failed).await?;

  if status == RunStatus::Ok && !config.sync.archive_checkpoints && !opts.dry_run {
    checkpoint.reset(&run.id).await?;
  }

  log_summary(&stats, started.elapsed(), export_path.as_deref());

  Ok(SyncOutcome {
    run_id: run.id,
    status,
    processed,
    failed,
    skipped_policy: stats.skipped_policy.load(Ordering::Relaxed),
    skipped_resume: stats.skipped_resume.load(Ordering::Relaxed),
    export_path,
  })
}

async fn read_input(
  input: &InputSource,
  workers: usize,
  senders: &[mpsc::Sender<crate::parser::LineRecord>],
  ctx: &WorkerContext,
  cancel: &CancellationToken,
) -> Result<()> {
  let reader = input.open().await?;
  let mut lines = reader.lines();
  let mut line_no = 0u64;

  loop {
    if cancel.is_cancelled() {
      info!(line = line_no, "Interrupted, stopped accepting input");
      break;
    }
    let Some(raw) = lines.next_line().await? else {
      break;
    };
    line_no += 1;

    match parse_line(&raw, line_no) {
      Parsed::Marker => {
        ctx.stats.markers.fetch_add(1, Ordering::Relaxed);
      }
      Parsed::Malformed { line, raw } => {
        warn!(line, "Malformed input line");
        ctx.stats.malformed.fetch_add(1, Ordering::Relaxed);
        ctx
          .checkpoint
          .record_failure(&ctx.run_id, line, &raw, ErrorCategory::Validation, "malformed input line")
          .await?;
        ctx.stats.record_failure(ErrorCategory::Validation);
      }
      Parsed::Change(record) => {
        let shard = shard_for_line(line_no, workers);
        // A full channel blocks here, pacing the reader to the slowest
        // worker.
        tokio::select! {
          biased;
          _ = cancel.cancelled() => {
            info!(line = line_no, "Interrupted during fan-out");
            break;
          }
          sent = senders[shard].send(*record) => {
            if sent.is_err() {
              // Worker gone (fatal escalation); stop feeding.
              return Err(SyncError::WorkerPanic(format!("worker {shard} stopped accepting records")));
            }
          }
        }
      }
    }
  }

  debug!(lines = line_no, "Input exhausted");
  Ok(())
}

/// Replay failed lines persisted by the most recent partial run of the
/// same input, using their payload snapshots. Lines that now succeed have
/// their failure rows cleared by the commit; lines that fail again get
/// their retry counter bumped.
async fn replay_failures(
  checkpoint: &CheckpointStore,
  input_label: &str,
  base_ctx: &WorkerContext,
  cancel: &CancellationToken,
) -> Result<()> {
  let Some(prev) = checkpoint.latest_partial_run(input_label).await? else {
    return Ok(());
  };
  let failures = checkpoint.failed(&prev.id).await?;
  if failures.is_empty() {
    return Ok(());
  }
  info!(run = %prev.id, count = failures.len(), "Replaying failed lines from previous run");

  let mut ctx = base_ctx.clone();
  ctx.run_id = prev.id.clone();

  let (tx, rx) = mpsc::channel(failures.len().max(1));
  let replay_cancel = cancel.clone();
  let handle = tokio::spawn(worker_loop(0, rx, ctx.clone(), replay_cancel));

  for FailedLine { line, payload, .. } in failures {
    match parse_line(&payload, line) {
      Parsed::Change(record) => {
        if tx.send(*record).await.is_err() {
          break;
        }
      }
      _ => {
        // Snapshot no longer parseable; leave the failure row as is.
        warn!(line, run = %prev.id, "Skipping unparseable failure payload");
      }
    }
  }
  drop(tx);

  match handle.await {
    Ok(WorkerExit::Clean) => {}
    Ok(WorkerExit::Fatal) => return Err(SyncError::WorkerPanic("replay worker escalated".to_string())),
    Err(e) => return Err(SyncError::WorkerPanic(e.to_string())),
  }

  let remaining = checkpoint.failed_count(&prev.id).await?;
  info!(run = %prev.id, remaining, "Replay finished");
  Ok(())
}

/// Write unresolved failures as JSONL: the original payload plus error
/// context, in the same shape as the input so the producer can
/// regenerate.
async fn export_failures(checkpoint: &CheckpointStore, run_id: &str, path: &PathBuf) -> Result<()> {
  let failures = checkpoint.failed(run_id).await?;
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent).await?;
  }
  let mut file = tokio::fs::File::create(path).await?;

  for failure in &failures {
    let mut value = match serde_json::from_str::<serde_json::Value>(&failure.payload) {
      Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
      // Legacy plain-path payloads export as an object too
      _ => serde_json::json!({ "op": "modify", "path": failure.payload.trim() }),
    };
    if let Some(map) = value.as_object_mut() {
      map.insert("line".to_string(), serde_json::json!(failure.line));
      map.insert("error".to_string(), serde_json::json!(failure.error));
      map.insert("category".to_string(), serde_json::json!(failure.category.as_str()));
      map.insert("retries".to_string(), serde_json::json!(failure.retries));
    }
    let mut line = serde_json::to_string(&value).map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
  }
  file.flush().await?;
  info!(path = %path.display(), count = failures.len(), "Exported unresolved failures");
  Ok(())
}
