//! End-to-end pipeline scenarios against an in-memory store double.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use checkpoint::{CheckpointStore, RunStatus};
use common::{DownEmbedder, RecordingStore, StaticEmbedder};
use embedding::{EmbeddingProvider, fallback_vector};
use sync::{InputSource, SyncOptions, run_sync};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vecsync_core::{Config, ErrorCategory, object_id};
use vectorstore::VectorStore;

const COLLECTION: &str = "code";

struct Harness {
  _temp: TempDir,
  input_path: PathBuf,
  checkpoint_path: PathBuf,
  config: Config,
}

impl Harness {
  fn new(input: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let input_path = temp.path().join("delta.jsonl");
    std::fs::write(&input_path, input).unwrap();
    let checkpoint_path = temp.path().join("checkpoint.db");

    let mut config = Config::default();
    config.sync.workers = 1;
    config.sync.batch_size = 4;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    // High floor keeps the breaker out of tests that do not target it
    config.breaker.min_samples = 1000;

    Self {
      _temp: temp,
      input_path,
      checkpoint_path,
      config,
    }
  }

  fn options(&self) -> SyncOptions {
    SyncOptions {
      input: InputSource::Path(self.input_path.clone()),
      collection: COLLECTION.to_string(),
      checkpoint_path: self.checkpoint_path.clone(),
      dry_run: false,
      resume: true,
      export_failures: None,
    }
  }

  async fn run(&self, store: Arc<dyn VectorStore>) -> sync::SyncOutcome {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StaticEmbedder { dim: 8 });
    run_sync(&self.config, self.options(), store, embedder, CancellationToken::new())
      .await
      .unwrap()
  }
}

#[tokio::test]
async fn test_simple_add() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n");
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.exit_code(), 0);
  assert_eq!(outcome.processed, 1);
  assert_eq!(outcome.failed, 0);

  let id = object_id(COLLECTION, "R", "a.txt");
  let object = store.object(&id).expect("object should be upserted");
  assert_eq!(object.content, "hello");
  assert_eq!(object.path, "a.txt");
}

#[tokio::test]
async fn test_delete_then_readd_single_worker() {
  let input = concat!(
    "{\"repo\":\"R\",\"op\":\"delete\",\"path\":\"a.txt\"}\n",
    "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"v2\"}\n",
  );
  let harness = Harness::new(input);
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.processed, 2);
  let id = object_id(COLLECTION, "R", "a.txt");
  assert_eq!(store.object(&id).unwrap().content, "v2");
}

#[tokio::test]
async fn test_base64_content() {
  let harness = Harness::new(
    "{\"repo\":\"R\",\"op\":\"modify\",\"path\":\"m.py\",\"content_base64\":\"ZGVmIGYoKTogcmV0dXJuIDE=\"}\n",
  );
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  let id = object_id(COLLECTION, "R", "m.py");
  assert_eq!(store.object(&id).unwrap().content, "def f(): return 1");
}

#[tokio::test]
async fn test_skip_index_completes_without_write() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"x\",\"skip_index\":true}\n");
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.processed, 1);
  assert_eq!(outcome.skipped_policy, 1);
  assert_eq!(store.object_count(), 0);
  assert_eq!(store.upsert_batches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_content_ref_is_filesystem_failure() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"modify\",\"path\":\"g.py\",\"content_ref\":\"/does/not/exist\"}\n");
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Partial);
  assert_eq!(outcome.exit_code(), 1);
  assert_eq!(outcome.failed, 1);
  assert_eq!(store.upsert_batches.load(Ordering::SeqCst), 0);

  let checkpoint = CheckpointStore::open(&harness.checkpoint_path).await.unwrap();
  let failed = checkpoint.failed(&outcome.run_id).await.unwrap();
  assert_eq!(failed.len(), 1);
  assert_eq!(failed[0].line, 1);
  assert_eq!(failed[0].category, ErrorCategory::Filesystem);
  assert!(failed[0].payload.contains("/does/not/exist"));
}

#[tokio::test]
async fn test_malformed_line_does_not_halt() {
  let input = concat!(
    "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"a\"}\n",
    "{\"repo\":\"R\",\"op\":\n",
    "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"b.txt\",\"content\":\"b\"}\n",
  );
  let harness = Harness::new(input);
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Partial);
  assert_eq!(outcome.failed, 1);
  assert_eq!(outcome.processed, 2);
  assert!(store.object(&object_id(COLLECTION, "R", "a.txt")).is_some());
  assert!(store.object(&object_id(COLLECTION, "R", "b.txt")).is_some());
}

#[tokio::test]
async fn test_changeset_marker_is_ignored() {
  let input = concat!(
    "{\"repo\":\"R\",\"new_changeset\":\"abc123\"}\n",
    "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"x\"}\n",
  );
  let harness = Harness::new(input);
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.processed, 1);
  assert_eq!(store.object_count(), 1);
}

#[tokio::test]
async fn test_resume_does_no_downstream_work_for_committed_lines() {
  let mut input = String::new();
  for i in 1..=6 {
    input.push_str(&format!("{{\"repo\":\"R\",\"op\":\"add\",\"path\":\"f{i}.txt\",\"content\":\"c{i}\"}}\n"));
  }
  let harness = Harness::new(&input);

  // Simulate a prior interrupted attempt that committed lines 1-3.
  let input_label = harness.input_path.to_string_lossy().into_owned();
  {
    let checkpoint = CheckpointStore::open(&harness.checkpoint_path).await.unwrap();
    let run = checkpoint.start_run(&input_label).await.unwrap();
    checkpoint.commit_batch(&run.id, &[1, 2, 3]).await.unwrap();
  }

  let store = Arc::new(RecordingStore::new());
  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.skipped_resume, 3);
  // Only the un-committed half reached the store
  for i in 1..=3 {
    assert_eq!(store.upsert_calls_for(&object_id(COLLECTION, "R", &format!("f{i}.txt"))), 0);
  }
  for i in 4..=6 {
    assert_eq!(store.upsert_calls_for(&object_id(COLLECTION, "R", &format!("f{i}.txt"))), 1);
  }
}

#[tokio::test]
async fn test_rerun_after_success_is_idempotent() {
  let input = "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n";
  let harness = Harness::new(input);
  let store = Arc::new(RecordingStore::new());

  let first = harness.run(store.clone()).await;
  let second = harness.run(store.clone()).await;

  assert_eq!(first.status, RunStatus::Ok);
  assert_eq!(second.status, RunStatus::Ok);
  // Same identifier both times: the second run upserts, not duplicates
  assert_eq!(store.object_count(), 1);
  assert_eq!(store.object(&object_id(COLLECTION, "R", "a.txt")).unwrap().content, "hello");
}

#[tokio::test]
async fn test_shard_count_invariance() {
  let mut input = String::new();
  for i in 1..=40 {
    input.push_str(&format!("{{\"repo\":\"R\",\"op\":\"add\",\"path\":\"f{i}.txt\",\"content\":\"c{i}\"}}\n"));
  }

  let mut final_states = Vec::new();
  for workers in [1usize, 4] {
    let mut harness = Harness::new(&input);
    harness.config.sync.workers = workers;
    let store = Arc::new(RecordingStore::new());
    let outcome = harness.run(store.clone()).await;
    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.processed, 40);
    final_states.push(store.contents());
  }

  assert_eq!(final_states[0], final_states[1]);
}

#[tokio::test]
async fn test_transient_store_failure_retries_through() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n");
  let store = Arc::new(RecordingStore::new());
  store.fail_next.store(2, Ordering::SeqCst);

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.failed, 0);
  assert!(store.object(&object_id(COLLECTION, "R", "a.txt")).is_some());
}

#[tokio::test]
async fn test_persistent_store_failure_records_failed_lines() {
  let mut harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n");
  harness.config.retry.max_attempts = 2;
  let store = Arc::new(RecordingStore::new());
  store.fail_next.store(u32::MAX, Ordering::SeqCst);

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Partial);
  assert_eq!(outcome.failed, 1);

  let checkpoint = CheckpointStore::open(&harness.checkpoint_path).await.unwrap();
  let failed = checkpoint.failed(&outcome.run_id).await.unwrap();
  assert_eq!(failed[0].category, ErrorCategory::VectorStore);
}

#[tokio::test]
async fn test_rename_moves_object() {
  // Seed the old path first, then rename it with new content.
  let input = concat!(
    "{\"repo\":\"R\",\"op\":\"add\",\"path\":\"old.rs\",\"content\":\"v1\"}\n",
    "{\"repo\":\"R\",\"op\":\"rename\",\"path\":\"old.rs\",\"new_path\":\"new.rs\",\"content\":\"v1\"}\n",
  );
  let harness = Harness::new(input);
  let store = Arc::new(RecordingStore::new());

  let outcome = harness.run(store.clone()).await;

  assert_eq!(outcome.status, RunStatus::Ok);
  assert!(store.object(&object_id(COLLECTION, "R", "old.rs")).is_none());
  assert_eq!(store.object(&object_id(COLLECTION, "R", "new.rs")).unwrap().content, "v1");
}

#[tokio::test]
async fn test_embedder_outage_uses_fallback_vector() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n");
  let store = Arc::new(RecordingStore::new());
  let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DownEmbedder { dim: 8 });

  let outcome = run_sync(
    &harness.config,
    harness.options(),
    store.clone(),
    embedder,
    CancellationToken::new(),
  )
  .await
  .unwrap();

  assert_eq!(outcome.status, RunStatus::Ok);
  let object = store.object(&object_id(COLLECTION, "R", "a.txt")).unwrap();
  assert_eq!(object.vector, fallback_vector("hello", 8));
}

#[tokio::test]
async fn test_failure_export_written() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"modify\",\"path\":\"g.py\",\"content_ref\":\"/does/not/exist\"}\n");
  let export_path = harness._temp.path().join("failures.jsonl");
  let store = Arc::new(RecordingStore::new());
  let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StaticEmbedder { dim: 8 });

  let mut opts = harness.options();
  opts.export_failures = Some(export_path.clone());
  let outcome = run_sync(&harness.config, opts, store, embedder, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, RunStatus::Partial);
  assert_eq!(outcome.export_path.as_deref(), Some(export_path.as_path()));

  let exported = std::fs::read_to_string(&export_path).unwrap();
  let value: serde_json::Value = serde_json::from_str(exported.lines().next().unwrap()).unwrap();
  assert_eq!(value["path"], "g.py");
  assert_eq!(value["category"], "filesystem");
  assert_eq!(value["line"], 1);
  assert!(value["error"].as_str().unwrap().contains("/does/not/exist"));
}

#[tokio::test]
async fn test_retry_failed_replays_previous_run() {
  let temp = TempDir::new().unwrap();
  let missing = temp.path().join("late.py");
  let input = format!(
    "{{\"repo\":\"R\",\"op\":\"modify\",\"path\":\"late.py\",\"content_ref\":\"{}\"}}\n",
    missing.to_string_lossy()
  );
  let mut harness = Harness::new(&input);

  let store = Arc::new(RecordingStore::new());
  let first = harness.run(store.clone()).await;
  assert_eq!(first.status, RunStatus::Partial);
  assert_eq!(store.object_count(), 0);

  // The file shows up before the next invocation; replay picks it up
  // even though the new input contributes nothing new.
  std::fs::write(&missing, "print('late')").unwrap();
  harness.config.sync.retry_failed = true;

  let second = harness.run(store.clone()).await;
  // The replayed line succeeds under the first run's checkpoint state
  let checkpoint = CheckpointStore::open(&harness.checkpoint_path).await.unwrap();
  assert_eq!(checkpoint.failed_count(&first.run_id).await.unwrap(), 0);
  assert_eq!(store.object(&object_id(COLLECTION, "R", "late.py")).unwrap().content, "print('late')");
  // The new run itself re-processed its own input too; both are fine
  assert_eq!(second.failed, 0);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
  let harness = Harness::new("{\"repo\":\"R\",\"op\":\"add\",\"path\":\"a.txt\",\"content\":\"hello\"}\n");
  let noop = Arc::new(vectorstore::NoopVectorStore::new());
  let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StaticEmbedder { dim: 8 });

  let mut opts = harness.options();
  opts.dry_run = true;
  let outcome = run_sync(&harness.config, opts, noop.clone(), embedder, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, RunStatus::Ok);
  assert_eq!(outcome.processed, 1);
  assert_eq!(noop.upserts(), 1);
}
