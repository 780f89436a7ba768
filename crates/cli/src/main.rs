//! vecsync CLI - keep a vector-search collection in sync with source repositories

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

mod logging;

use embedding::{EmbeddingProvider, OllamaProvider, ResilientProvider};
use sync::{InputSource, Resolver, SyncOptions, analyze_stream, run_sync};
use vecsync_core::{Config, RetryPolicy};
use vectorstore::{HttpVectorStore, NoopVectorStore, VectorStore};

#[derive(Parser)]
#[command(name = "vecsync")]
#[command(about = "Keep a vector-search collection in sync with source repositories")]
#[command(after_help = "\
QUICK START:
  producer | vecsync sync --collection code          # Index a change stream
  vecsync sync --input delta.jsonl --collection code # From a file
  vecsync analyze --input delta.jsonl                # What would be indexed?
  vecsync config-template > vecsync.toml             # Start a config file

Exit codes: 0 success, 1 some lines failed, 2 pipeline aborted, 3 usage error.")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Consume a change stream and index it into the vector store
  Sync {
    /// Input stream; a path or '-' for stdin
    #[arg(short, long, default_value = "-")]
    input: String,
    /// Target collection in the vector store
    #[arg(short, long)]
    collection: String,
    /// Checkpoint store path (default: data dir)
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Shard / worker count
    #[arg(short, long)]
    workers: Option<usize>,
    /// Max items per batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Max content bytes per batch
    #[arg(long)]
    batch_bytes: Option<usize>,
    /// Parse and resolve but skip vector-store writes
    #[arg(long)]
    dry_run: bool,
    /// Pick up an unfinished run for the same input (default)
    #[arg(long, overrides_with = "no_resume")]
    resume: bool,
    /// Start a fresh run even if one is unfinished
    #[arg(long)]
    no_resume: bool,
    /// Skip files larger than this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,
    /// Replay failed lines from the previous run before new input
    #[arg(long)]
    retry_failed: bool,
    /// Export unresolved failures as JSONL to this path
    #[arg(long)]
    export_failures: Option<PathBuf>,
    /// Write logs to a file instead of the console
    #[arg(long)]
    log_file: Option<PathBuf>,
  },
  /// Report the tier distribution of a change stream without indexing
  Analyze {
    /// Input stream; a path or '-' for stdin
    #[arg(short, long, default_value = "-")]
    input: String,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Print a commented default configuration file
  ConfigTemplate,
}

fn parse_input(input: &str) -> InputSource {
  if input == "-" {
    InputSource::Stdin
  } else {
    InputSource::Path(PathBuf::from(input))
  }
}

#[tokio::main]
async fn main() {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(e) => {
      // --help and --version land here too; only real usage errors are 3
      let code = if e.use_stderr() { 3 } else { 0 };
      let _ = e.print();
      std::process::exit(code);
    }
  };

  let code = match cli.command {
    Commands::Sync {
      input,
      collection,
      checkpoint,
      workers,
      batch_size,
      batch_bytes,
      dry_run,
      resume: _,
      no_resume,
      max_file_size,
      retry_failed,
      export_failures,
      log_file,
    } => {
      let _guard = logging::init_logging(log_file.as_deref());

      let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      let mut config = Config::load(&cwd);
      // CLI flags win over env and file
      if let Some(v) = workers {
        config.sync.workers = v;
      }
      if let Some(v) = batch_size {
        config.sync.batch_size = v;
      }
      if let Some(v) = batch_bytes {
        config.sync.batch_bytes = v;
      }
      if let Some(v) = max_file_size {
        config.resolver.max_file_size = v;
      }
      if retry_failed {
        config.sync.retry_failed = true;
      }
      if let Some(path) = &checkpoint {
        config.checkpoint.path = path.to_string_lossy().into_owned();
      }
      if let Some(path) = &export_failures {
        config.checkpoint.export_failures = path.to_string_lossy().into_owned();
      }

      run_sync_command(config, parse_input(&input), collection, dry_run, !no_resume).await
    }
    Commands::Analyze { input, json } => {
      logging::init_logging(None);
      let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      let config = Config::load(&cwd);
      match analyze_command(parse_input(&input), &config, json).await {
        Ok(()) => 0,
        Err(e) => {
          error!(error = %e, "Analyze failed");
          2
        }
      }
    }
    Commands::ConfigTemplate => {
      print!("{}", Config::generate_template());
      0
    }
  };

  std::process::exit(code);
}

async fn run_sync_command(config: Config, input: InputSource, collection: String, dry_run: bool, resume: bool) -> i32 {
  // Dry run keeps the real checkpoint store untouched.
  let scratch_checkpoint = dry_run.then(|| {
    std::env::temp_dir().join(format!("vecsync-dry-run-{}.db", std::process::id()))
  });
  let checkpoint_path = scratch_checkpoint.clone().unwrap_or_else(|| config.checkpoint_path());

  let export_failures = (!config.checkpoint.export_failures.is_empty())
    .then(|| PathBuf::from(&config.checkpoint.export_failures));

  let opts = SyncOptions {
    input,
    collection,
    checkpoint_path,
    dry_run,
    resume: resume && !dry_run,
    export_failures,
  };

  let store: Arc<dyn VectorStore> = if dry_run {
    Arc::new(NoopVectorStore::new())
  } else {
    Arc::new(HttpVectorStore::new(
      config.vectorstore.url.clone(),
      Duration::from_secs(config.vectorstore.timeout_secs),
      config.vectorstore.replication_factor,
    ))
  };

  let transient_policy = RetryPolicy {
    max_attempts: config.retry.max_attempts,
    base_delay: Duration::from_millis(config.retry.base_delay_ms),
    max_delay: Duration::from_millis(config.retry.max_delay_ms),
    jitter: config.retry.jitter,
  };
  let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ResilientProvider::new(
    OllamaProvider::new(&config.embedding),
    transient_policy,
    Duration::from_secs(config.embedding.timeout_secs),
  ));

  // First interrupt drains to the next commit boundary; a second aborts.
  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, draining in-flight batches");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
          error!("Second interrupt, aborting");
          std::process::exit(2);
        }
      }
    });
  }

  let result = run_sync(&config, opts, store, embedder, cancel).await;

  if let Some(scratch) = scratch_checkpoint {
    let _ = std::fs::remove_file(&scratch);
    let _ = std::fs::remove_file(scratch.with_extension("db-wal"));
    let _ = std::fs::remove_file(scratch.with_extension("db-shm"));
  }

  match result {
    Ok(outcome) => outcome.exit_code(),
    Err(e) => {
      error!(error = %e, "Sync aborted");
      2
    }
  }
}

async fn analyze_command(input: InputSource, config: &Config, json: bool) -> Result<()> {
  let resolver = Resolver::new(&config.resolver);
  let reader = input.open().await?;
  let report = analyze_stream(reader, &resolver).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print!("{}", report.render());
  }
  Ok(())
}
