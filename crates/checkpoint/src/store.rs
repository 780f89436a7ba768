use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use vecsync_core::ErrorCategory;

use crate::Result;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store task failed: {0}")]
  Task(String),
  #[error("not found: {0}")]
  NotFound(String),
}

/// Terminal (or in-flight) status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
  Running,
  Ok,
  Partial,
  Fatal,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Running => "running",
      RunStatus::Ok => "ok",
      RunStatus::Partial => "partial",
      RunStatus::Fatal => "fatal",
    }
  }

  pub fn exit_code(&self) -> i32 {
    match self {
      RunStatus::Ok => 0,
      RunStatus::Partial => 1,
      RunStatus::Running | RunStatus::Fatal => 2,
    }
  }
}

impl std::str::FromStr for RunStatus {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "running" => Ok(RunStatus::Running),
      "ok" => Ok(RunStatus::Ok),
      "partial" => Ok(RunStatus::Partial),
      "fatal" => Ok(RunStatus::Fatal),
      other => Err(format!("unknown run status: {other}")),
    }
  }
}

/// One row of the runs relation.
#[derive(Debug, Clone)]
pub struct RunRecord {
  pub id: String,
  pub input_source: String,
  pub status: RunStatus,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub processed: u64,
  pub failed: u64,
}

/// A line that exhausted its retry budget (or was never retryable).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailedLine {
  pub line: u64,
  /// The original input line, verbatim, so a later run can replay it.
  pub payload: String,
  pub category: ErrorCategory,
  pub error: String,
  pub retries: u32,
}

/// Handle to the checkpoint database.
///
/// Cheap to clone; all clones share one connection. Writes go through
/// short transactions, so concurrent workers (and concurrent processes on
/// the same file) serialize on SQLite's WAL with a busy timeout.
#[derive(Clone)]
pub struct CheckpointStore {
  conn: Arc<Mutex<Connection>>,
  path: PathBuf,
}

impl CheckpointStore {
  /// Open or create the store at `path`.
  pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let open_path = path.clone();
    let conn = tokio::task::spawn_blocking(move || open_connection(&open_path))
      .await
      .map_err(|e| StoreError::Task(e.to_string()))??;

    info!(path = %path.display(), "Opened checkpoint store");
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      path,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Run a closure against the connection on the blocking pool.
  async fn call<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let conn = self.conn.clone();
    tokio::task::spawn_blocking(move || {
      let mut guard = match conn.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
      };
      f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
  }

  /// Create a new run row and return it.
  pub async fn start_run(&self, input_source: &str) -> Result<RunRecord> {
    let source = input_source.to_string();
    self
      .call(move |conn| {
        let record = RunRecord {
          id: Uuid::new_v4().to_string(),
          input_source: source,
          status: RunStatus::Running,
          started_at: Utc::now(),
          finished_at: None,
          processed: 0,
          failed: 0,
        };
        conn.execute(
          "INSERT INTO runs (id, input_source, status, started_at) VALUES (?1, ?2, ?3, ?4)",
          params![
            record.id,
            record.input_source,
            record.status.as_str(),
            record.started_at.to_rfc3339()
          ],
        )?;
        Ok(record)
      })
      .await
  }

  /// Latest unfinished run for the same input source, if any.
  pub async fn resume_run(&self, input_source: &str) -> Result<Option<RunRecord>> {
    let source = input_source.to_string();
    self
      .call(move |conn| {
        let row = conn
          .query_row(
            "SELECT id, input_source, status, started_at, finished_at, processed, failed
             FROM runs WHERE input_source = ?1 AND status = 'running'
             ORDER BY started_at DESC LIMIT 1",
            params![source],
            row_to_run,
          )
          .optional()?;
        Ok(row)
      })
      .await
  }

  /// Most recent finished-but-partial run for the same input source.
  pub async fn latest_partial_run(&self, input_source: &str) -> Result<Option<RunRecord>> {
    let source = input_source.to_string();
    self
      .call(move |conn| {
        let row = conn
          .query_row(
            "SELECT id, input_source, status, started_at, finished_at, processed, failed
             FROM runs WHERE input_source = ?1 AND status = 'partial'
             ORDER BY started_at DESC LIMIT 1",
            params![source],
            row_to_run,
          )
          .optional()?;
        Ok(row)
      })
      .await
  }

  /// Whether this line already reached the completed terminal state.
  ///
  /// Reflects every commit durably persisted before the call.
  pub async fn is_completed(&self, run_id: &str, line: u64) -> Result<bool> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let found = conn
          .query_row(
            "SELECT 1 FROM completed_lines WHERE run_id = ?1 AND line = ?2",
            params![run, line as i64],
            |_| Ok(()),
          )
          .optional()?;
        Ok(found.is_some())
      })
      .await
  }

  /// Mark a batch of lines completed in one transaction.
  ///
  /// All-or-nothing: a kill mid-commit leaves none of them visible. Any
  /// failure rows for the same lines are cleared in the same transaction
  /// so a line is never both completed and failed.
  pub async fn commit_batch(&self, run_id: &str, lines: &[u64]) -> Result<()> {
    if lines.is_empty() {
      return Ok(());
    }
    let run = run_id.to_string();
    let lines = lines.to_vec();
    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut insert = tx.prepare_cached("INSERT OR IGNORE INTO completed_lines (run_id, line) VALUES (?1, ?2)")?;
          let mut clear = tx.prepare_cached("DELETE FROM failed_lines WHERE run_id = ?1 AND line = ?2")?;
          for line in &lines {
            insert.execute(params![run, *line as i64])?;
            clear.execute(params![run, *line as i64])?;
          }
        }
        tx.execute(
          "UPDATE runs SET processed = processed + ?2, last_checkpoint_at = ?3 WHERE id = ?1",
          params![run, lines.len() as i64, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!(run = %run, lines = lines.len(), "Committed batch");
        Ok(())
      })
      .await
  }

  /// Record (or bump) a per-line failure with its payload snapshot.
  pub async fn record_failure(
    &self,
    run_id: &str,
    line: u64,
    payload: &str,
    category: ErrorCategory,
    error: &str,
  ) -> Result<()> {
    let run = run_id.to_string();
    let payload = payload.to_string();
    let error = error.to_string();
    self
      .call(move |conn| {
        conn.execute(
          "INSERT INTO failed_lines (run_id, line, payload, category, error, retries, failed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
           ON CONFLICT (run_id, line) DO UPDATE SET
             payload = excluded.payload,
             category = excluded.category,
             error = excluded.error,
             retries = retries + 1,
             failed_at = excluded.failed_at",
          params![run, line as i64, payload, category.as_str(), error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
      })
      .await
  }

  /// Failed lines for a run, ordered by retries ascending then line.
  pub async fn failed(&self, run_id: &str) -> Result<Vec<FailedLine>> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT line, payload, category, error, retries FROM failed_lines
           WHERE run_id = ?1 ORDER BY retries ASC, line ASC",
        )?;
        let rows = stmt.query_map(params![run], |row| {
          let category: String = row.get(2)?;
          Ok(FailedLine {
            line: row.get::<_, i64>(0)? as u64,
            payload: row.get(1)?,
            category: category.parse().unwrap_or(ErrorCategory::Unknown),
            error: row.get(3)?,
            retries: row.get(4)?,
          })
        })?;
        let mut out = Vec::new();
        for row in rows {
          out.push(row?);
        }
        Ok(out)
      })
      .await
  }

  pub async fn failed_count(&self, run_id: &str) -> Result<u64> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM failed_lines WHERE run_id = ?1",
          params![run],
          |row| row.get(0),
        )?;
        Ok(count as u64)
      })
      .await
  }

  pub async fn completed_count(&self, run_id: &str) -> Result<u64> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM completed_lines WHERE run_id = ?1",
          params![run],
          |row| row.get(0),
        )?;
        Ok(count as u64)
      })
      .await
  }

  /// Terminal update for a run.
  pub async fn finish_run(&self, run_id: &str, status: RunStatus, processed: u64, failed: u64) -> Result<()> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let updated = conn.execute(
          "UPDATE runs SET status = ?2, finished_at = ?3, processed = ?4, failed = ?5 WHERE id = ?1",
          params![
            run,
            status.as_str(),
            Utc::now().to_rfc3339(),
            processed as i64,
            failed as i64
          ],
        )?;
        if updated == 0 {
          return Err(StoreError::NotFound(format!("run {run}")));
        }
        Ok(())
      })
      .await
  }

  /// Clear per-run line state after a confirmed successful run.
  ///
  /// The run row itself is kept as an audit trail.
  pub async fn reset(&self, run_id: &str) -> Result<()> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM completed_lines WHERE run_id = ?1", params![run])?;
        tx.execute("DELETE FROM failed_lines WHERE run_id = ?1", params![run])?;
        tx.commit()?;
        debug!(run = %run, "Reset per-run checkpoint state");
        Ok(())
      })
      .await
  }

  #[cfg(test)]
  pub async fn completed_lines(&self, run_id: &str) -> Result<Vec<u64>> {
    let run = run_id.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT line FROM completed_lines WHERE run_id = ?1 ORDER BY line")?;
        let rows = stmt.query_map(params![run], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
          out.push(row? as u64);
        }
        Ok(out)
      })
      .await
  }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
  let status: String = row.get(2)?;
  let started: String = row.get(3)?;
  let finished: Option<String> = row.get(4)?;
  Ok(RunRecord {
    id: row.get(0)?,
    input_source: row.get(1)?,
    status: status.parse().unwrap_or(RunStatus::Running),
    started_at: DateTime::parse_from_rfc3339(&started)
      .map(|t| t.with_timezone(&Utc))
      .unwrap_or_else(|_| Utc::now()),
    finished_at: finished
      .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
      .map(|t| t.with_timezone(&Utc)),
    processed: row.get::<_, i64>(5)? as u64,
    failed: row.get::<_, i64>(6)? as u64,
  })
}

fn open_connection(path: &Path) -> Result<Connection> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  let conn = Connection::open_with_flags(
    path,
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
  )?;

  // WAL keeps readers off the writers' backs; FULL sync makes a returned
  // commit survive power loss.
  conn.pragma_update(None, "journal_mode", "WAL")?;
  conn.pragma_update(None, "synchronous", "FULL")?;
  conn.busy_timeout(std::time::Duration::from_secs(5))?;

  conn.execute_batch(
    "CREATE TABLE IF NOT EXISTS runs (
       id TEXT PRIMARY KEY,
       input_source TEXT NOT NULL,
       status TEXT NOT NULL DEFAULT 'running',
       started_at TEXT NOT NULL,
       finished_at TEXT,
       processed INTEGER NOT NULL DEFAULT 0,
       failed INTEGER NOT NULL DEFAULT 0,
       last_checkpoint_at TEXT
     );
     CREATE TABLE IF NOT EXISTS completed_lines (
       run_id TEXT NOT NULL,
       line INTEGER NOT NULL,
       PRIMARY KEY (run_id, line)
     ) WITHOUT ROWID;
     CREATE TABLE IF NOT EXISTS failed_lines (
       run_id TEXT NOT NULL,
       line INTEGER NOT NULL,
       payload TEXT NOT NULL,
       category TEXT NOT NULL,
       error TEXT NOT NULL,
       retries INTEGER NOT NULL DEFAULT 0,
       failed_at TEXT NOT NULL,
       PRIMARY KEY (run_id, line)
     ) WITHOUT ROWID;",
  )?;

  Ok(conn)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  async fn open_store() -> (TempDir, CheckpointStore) {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::open(temp.path().join("checkpoint.db")).await.unwrap();
    (temp, store)
  }

  #[tokio::test]
  async fn test_start_and_resume_run() {
    let (_temp, store) = open_store().await;

    let run = store.start_run("input.jsonl").await.unwrap();
    assert_eq!(run.status, RunStatus::Running);

    let resumed = store.resume_run("input.jsonl").await.unwrap().unwrap();
    assert_eq!(resumed.id, run.id);

    assert!(store.resume_run("other.jsonl").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_finished_run_is_not_resumed() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("input.jsonl").await.unwrap();
    store.finish_run(&run.id, RunStatus::Ok, 10, 0).await.unwrap();
    assert!(store.resume_run("input.jsonl").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_commit_batch_marks_completed() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();

    assert!(!store.is_completed(&run.id, 5).await.unwrap());
    store.commit_batch(&run.id, &[1, 5, 9]).await.unwrap();
    assert!(store.is_completed(&run.id, 1).await.unwrap());
    assert!(store.is_completed(&run.id, 5).await.unwrap());
    assert!(store.is_completed(&run.id, 9).await.unwrap());
    assert!(!store.is_completed(&run.id, 2).await.unwrap());
    assert_eq!(store.completed_count(&run.id).await.unwrap(), 3);
  }

  #[tokio::test]
  async fn test_commit_batch_is_idempotent() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();
    store.commit_batch(&run.id, &[1, 2]).await.unwrap();
    store.commit_batch(&run.id, &[2, 3]).await.unwrap();
    assert_eq!(store.completed_lines(&run.id).await.unwrap(), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_commit_clears_failure_for_same_line() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();

    store
      .record_failure(&run.id, 7, "{\"op\":\"modify\"}", ErrorCategory::Network, "connection reset")
      .await
      .unwrap();
    assert_eq!(store.failed_count(&run.id).await.unwrap(), 1);

    store.commit_batch(&run.id, &[7]).await.unwrap();
    assert_eq!(store.failed_count(&run.id).await.unwrap(), 0);
    assert!(store.is_completed(&run.id, 7).await.unwrap());
  }

  #[tokio::test]
  async fn test_record_failure_bumps_retries() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();

    store
      .record_failure(&run.id, 3, "payload", ErrorCategory::Timeout, "deadline elapsed")
      .await
      .unwrap();
    store
      .record_failure(&run.id, 3, "payload", ErrorCategory::Network, "connection reset")
      .await
      .unwrap();

    let failed = store.failed(&run.id).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].line, 3);
    assert_eq!(failed[0].retries, 1);
    assert_eq!(failed[0].category, ErrorCategory::Network);
  }

  #[tokio::test]
  async fn test_failed_ordered_by_retries_then_line() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();

    store
      .record_failure(&run.id, 10, "a", ErrorCategory::Network, "x")
      .await
      .unwrap();
    store
      .record_failure(&run.id, 2, "b", ErrorCategory::Network, "x")
      .await
      .unwrap();
    // Bump line 10 to one retry
    store
      .record_failure(&run.id, 10, "a", ErrorCategory::Network, "x")
      .await
      .unwrap();

    let failed = store.failed(&run.id).await.unwrap();
    assert_eq!(failed.iter().map(|f| f.line).collect::<Vec<_>>(), vec![2, 10]);
  }

  #[tokio::test]
  async fn test_reset_clears_lines_keeps_run() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();
    store.commit_batch(&run.id, &[1, 2, 3]).await.unwrap();
    store
      .record_failure(&run.id, 4, "p", ErrorCategory::Filesystem, "missing")
      .await
      .unwrap();
    store.finish_run(&run.id, RunStatus::Partial, 3, 1).await.unwrap();

    store.reset(&run.id).await.unwrap();
    assert_eq!(store.completed_count(&run.id).await.unwrap(), 0);
    assert_eq!(store.failed_count(&run.id).await.unwrap(), 0);
    // Run row still there as audit trail
    let partial = store.latest_partial_run("in").await.unwrap().unwrap();
    assert_eq!(partial.id, run.id);
  }

  #[tokio::test]
  async fn test_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("checkpoint.db");

    let run_id = {
      let store = CheckpointStore::open(&path).await.unwrap();
      let run = store.start_run("in").await.unwrap();
      store.commit_batch(&run.id, &[1, 2]).await.unwrap();
      run.id
    };

    let store = CheckpointStore::open(&path).await.unwrap();
    assert!(store.is_completed(&run_id, 1).await.unwrap());
    assert!(store.is_completed(&run_id, 2).await.unwrap());
    assert!(!store.is_completed(&run_id, 3).await.unwrap());
  }

  #[tokio::test]
  async fn test_concurrent_commits() {
    let (_temp, store) = open_store().await;
    let run = store.start_run("in").await.unwrap();

    let mut handles = Vec::new();
    for w in 0..4u64 {
      let store = store.clone();
      let run_id = run.id.clone();
      handles.push(tokio::spawn(async move {
        let lines: Vec<u64> = (0..50).map(|i| w * 50 + i + 1).collect();
        store.commit_batch(&run_id, &lines).await.unwrap();
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert_eq!(store.completed_count(&run.id).await.unwrap(), 200);
  }

  #[test]
  fn test_run_status_exit_codes() {
    assert_eq!(RunStatus::Ok.exit_code(), 0);
    assert_eq!(RunStatus::Partial.exit_code(), 1);
    assert_eq!(RunStatus::Fatal.exit_code(), 2);
  }
}
