//! Configuration for the sync pipeline.
//!
//! Precedence: CLI flags > `VECSYNC_*` environment variables > config file
//! (project-relative `vecsync.toml`, then `~/.config/vecsync/config.toml`)
//! > defaults. The CLI layer applies its own flags after calling
//! [`Config::load`]; everything below that happens here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pipeline shape and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Shard / worker count.
  pub workers: usize,

  /// Max items per batch.
  pub batch_size: usize,

  /// Max content bytes per batch (whichever limit hits first).
  pub batch_bytes: usize,

  /// Bounded channel capacity per worker.
  pub channel_capacity: usize,

  /// Progress report interval in seconds.
  pub progress_interval_secs: u64,

  /// Replay failed lines from the previous run before new input.
  pub retry_failed: bool,

  /// Keep completed-line rows after a fully successful run.
  pub archive_checkpoints: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      batch_size: 64,
      batch_bytes: 4 * 1024 * 1024,
      channel_capacity: 128,
      progress_interval_secs: 10,
      retry_failed: false,
      archive_checkpoints: false,
    }
  }
}

/// Content resolution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
  /// Files larger than this are skipped, not indexed.
  pub max_file_size: u64,

  /// Directory names whose contents are never indexed.
  pub vendor_dirs: Vec<String>,

  /// Extensions treated as binary.
  pub binary_extensions: Vec<String>,
}

impl Default for ResolverConfig {
  fn default() -> Self {
    Self {
      max_file_size: 10 * 1024 * 1024, // 10MB
      vendor_dirs: [
        "node_modules",
        "vendor",
        "target",
        "dist",
        "build",
        ".git",
        ".hg",
        ".svn",
        "__pycache__",
        ".venv",
        "venv",
        ".tox",
        ".mypy_cache",
        ".pytest_cache",
        ".next",
        ".cache",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      binary_extensions: [
        "exe", "dll", "so", "dylib", "a", "o", "obj", "bin", "dat", "db", "sqlite", "png", "jpg", "jpeg", "gif",
        "bmp", "ico", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "jar", "class", "pyc", "wasm", "woff",
        "woff2", "ttf", "eot", "mp3", "mp4", "avi", "mov", "webm", "webp",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
    }
  }
}

/// Vector store endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
  /// Base URL of the vector store HTTP API.
  pub url: String,

  /// Per-request deadline in seconds.
  pub timeout_secs: u64,

  /// Replication factor applied when the collection is created.
  pub replication_factor: u32,
}

impl Default for VectorStoreConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080".to_string(),
      timeout_secs: 30,
      replication_factor: 1,
    }
  }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Model name served by the embedder.
  pub model: String,

  /// Vector dimensions (must match the model output).
  pub dimensions: usize,

  /// Ollama server URL.
  pub ollama_url: String,

  /// Per-request deadline in seconds.
  pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      model: "qwen3-embedding".to_string(),
      dimensions: 1024,
      ollama_url: "http://localhost:11434".to_string(),
      timeout_secs: 60,
    }
  }
}

/// Backoff settings for transient downstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Attempts per call, including the first.
  pub max_attempts: u32,

  pub base_delay_ms: u64,

  pub max_delay_ms: u64,

  /// Jitter fraction added to each backoff, 0.0..=1.0.
  pub jitter: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay_ms: 500,
      max_delay_ms: 30_000,
      jitter: 0.25,
    }
  }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
  pub window_secs: u64,

  /// Error-rate threshold that opens a category, 0.0..=1.0.
  pub threshold: f64,

  /// Minimum outcomes in the window before the rate is acted on.
  pub min_samples: usize,

  pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      window_secs: 60,
      threshold: 0.5,
      min_samples: 10,
      cooldown_secs: 15,
    }
  }
}

/// Checkpoint store location and exports.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CheckpointConfig {
  /// Path of the checkpoint database. Empty means the default data dir.
  pub path: String,

  /// Where unresolved failures are exported as JSONL. Empty disables.
  pub export_failures: String,
}

/// Top-level configuration, constructed once at startup and passed down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(default)]
  pub sync: SyncConfig,

  #[serde(default)]
  pub resolver: ResolverConfig,

  #[serde(default)]
  pub vectorstore: VectorStoreConfig,

  #[serde(default)]
  pub embedding: EmbeddingConfig,

  #[serde(default)]
  pub retry: RetryConfig,

  #[serde(default)]
  pub breaker: BreakerConfig,

  #[serde(default)]
  pub checkpoint: CheckpointConfig,
}

const ENV_PREFIX: &str = "VECSYNC_";

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
  std::env::var(format!("{ENV_PREFIX}{key}")).ok().and_then(|v| v.parse().ok())
}

fn env_string(key: &str) -> Option<String> {
  std::env::var(format!("{ENV_PREFIX}{key}")).ok().filter(|v| !v.is_empty())
}

impl Config {
  /// Load config for a working directory, with fallback to user config,
  /// then overlay environment variables.
  pub fn load(dir: &Path) -> Self {
    let mut config = Self::load_file(dir);
    config.apply_env();
    config
  }

  fn load_file(dir: &Path) -> Self {
    let project_config = dir.join("vecsync.toml");
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("VECSYNC_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("vecsync").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("vecsync").join("config.toml"))
  }

  /// Default data directory for the checkpoint store and exports.
  pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VECSYNC_DATA_DIR") {
      return PathBuf::from(dir);
    }

    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
      return PathBuf::from(xdg_data).join("vecsync");
    }

    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("vecsync")
  }

  /// Overlay `VECSYNC_*` environment variables onto the loaded values.
  pub fn apply_env(&mut self) {
    if let Some(v) = env_parse("WORKERS") {
      self.sync.workers = v;
    }
    if let Some(v) = env_parse("BATCH_SIZE") {
      self.sync.batch_size = v;
    }
    if let Some(v) = env_parse("BATCH_BYTES") {
      self.sync.batch_bytes = v;
    }
    if let Some(v) = env_parse("CHANNEL_CAPACITY") {
      self.sync.channel_capacity = v;
    }
    if let Some(v) = env_parse("PROGRESS_INTERVAL_SECS") {
      self.sync.progress_interval_secs = v;
    }
    if let Some(v) = env_parse("RETRY_FAILED") {
      self.sync.retry_failed = v;
    }
    if let Some(v) = env_parse("MAX_FILE_SIZE") {
      self.resolver.max_file_size = v;
    }
    if let Some(v) = env_string("VECTORSTORE_URL") {
      self.vectorstore.url = v;
    }
    if let Some(v) = env_parse("VECTORSTORE_TIMEOUT_SECS") {
      self.vectorstore.timeout_secs = v;
    }
    if let Some(v) = env_parse("REPLICATION_FACTOR") {
      self.vectorstore.replication_factor = v;
    }
    if let Some(v) = env_string("EMBEDDING_MODEL") {
      self.embedding.model = v;
    }
    if let Some(v) = env_parse("EMBEDDING_DIMENSIONS") {
      self.embedding.dimensions = v;
    }
    if let Some(v) = env_string("OLLAMA_URL") {
      self.embedding.ollama_url = v;
    }
    if let Some(v) = env_parse("RETRY_MAX_ATTEMPTS") {
      self.retry.max_attempts = v;
    }
    if let Some(v) = env_parse("RETRY_BASE_DELAY_MS") {
      self.retry.base_delay_ms = v;
    }
    if let Some(v) = env_parse("RETRY_MAX_DELAY_MS") {
      self.retry.max_delay_ms = v;
    }
    if let Some(v) = env_parse("BREAKER_WINDOW_SECS") {
      self.breaker.window_secs = v;
    }
    if let Some(v) = env_parse("BREAKER_THRESHOLD") {
      self.breaker.threshold = v;
    }
    if let Some(v) = env_parse("BREAKER_COOLDOWN_SECS") {
      self.breaker.cooldown_secs = v;
    }
    if let Some(v) = env_string("CHECKPOINT") {
      self.checkpoint.path = v;
    }
    if let Some(v) = env_string("EXPORT_FAILURES") {
      self.checkpoint.export_failures = v;
    }
  }

  /// Resolved checkpoint database path.
  pub fn checkpoint_path(&self) -> PathBuf {
    if self.checkpoint.path.is_empty() {
      Self::default_data_dir().join("checkpoint.db")
    } else {
      PathBuf::from(&self.checkpoint.path)
    }
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# vecsync configuration
# Place in ./vecsync.toml (project) or ~/.config/vecsync/config.toml (user).
# Every value can also be set with a VECSYNC_* environment variable and
# most with a CLI flag; CLI > env > file > defaults.

[sync]
# Shard / worker count
workers = 4

# Max items per batch
batch_size = 64

# Max content bytes per batch
batch_bytes = 4194304

# Bounded channel capacity per worker
channel_capacity = 128

# Progress report interval (seconds)
progress_interval_secs = 10

# Replay failed lines from the previous run before new input
retry_failed = false

# Keep completed-line rows after a fully successful run
archive_checkpoints = false

[resolver]
# Files larger than this are skipped (bytes)
max_file_size = 10485760

# vendor_dirs / binary_extensions accept full replacement lists;
# the defaults cover common dependency caches and binary formats.

[vectorstore]
url = "http://localhost:8080"
timeout_secs = 30
replication_factor = 1

[embedding]
model = "qwen3-embedding"
dimensions = 1024
ollama_url = "http://localhost:11434"
timeout_secs = 60

[retry]
max_attempts = 5
base_delay_ms = 500
max_delay_ms = 30000
jitter = 0.25

[breaker]
window_secs = 60
threshold = 0.5
min_samples = 10
cooldown_secs = 15

[checkpoint]
# Empty means the default data directory
path = ""
export_failures = ""
"#
    .to_string()
  }
}
