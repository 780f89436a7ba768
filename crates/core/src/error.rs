//! Error taxonomy shared across the pipeline.
//!
//! Every failure from a downstream call is mapped onto one
//! [`ErrorCategory`]; the retry policy, circuit breaker, and failure
//! records all key off the category rather than the concrete error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed classification for pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
  Network,
  VectorStore,
  Filesystem,
  RateLimit,
  Memory,
  Encoding,
  Timeout,
  Validation,
  Unknown,
}

impl ErrorCategory {
  pub const ALL: [ErrorCategory; 9] = [
    ErrorCategory::Network,
    ErrorCategory::VectorStore,
    ErrorCategory::Filesystem,
    ErrorCategory::RateLimit,
    ErrorCategory::Memory,
    ErrorCategory::Encoding,
    ErrorCategory::Timeout,
    ErrorCategory::Validation,
    ErrorCategory::Unknown,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorCategory::Network => "network",
      ErrorCategory::VectorStore => "vector-store",
      ErrorCategory::Filesystem => "filesystem",
      ErrorCategory::RateLimit => "rate-limit",
      ErrorCategory::Memory => "memory",
      ErrorCategory::Encoding => "encoding",
      ErrorCategory::Timeout => "timeout",
      ErrorCategory::Validation => "validation",
      ErrorCategory::Unknown => "unknown",
    }
  }

  /// Position in [`Self::ALL`], used for per-category counters.
  pub fn index(&self) -> usize {
    Self::ALL.iter().position(|c| c == self).unwrap_or(Self::ALL.len() - 1)
  }

  /// Whether failures of this category are worth retrying within the run.
  pub fn retryable_in_run(&self) -> bool {
    matches!(
      self,
      ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit | ErrorCategory::VectorStore
    )
  }

  /// Whether a failure of this category aborts the worker instead of
  /// recording a per-line failure.
  pub fn is_fatal(&self) -> bool {
    matches!(self, ErrorCategory::Memory)
  }
}

impl fmt::Display for ErrorCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for ErrorCategory {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    Self::ALL
      .iter()
      .copied()
      .find(|c| c.as_str() == s)
      .ok_or_else(|| format!("unknown error category: {s}"))
  }
}

/// Map an I/O error onto the taxonomy.
pub fn classify_io(err: &std::io::Error) -> ErrorCategory {
  use std::io::ErrorKind;
  match err.kind() {
    ErrorKind::TimedOut => ErrorCategory::Timeout,
    ErrorKind::OutOfMemory => ErrorCategory::Memory,
    ErrorKind::InvalidData => ErrorCategory::Encoding,
    _ => ErrorCategory::Filesystem,
  }
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Config: {0}")]
  Config(String),

  #[error("Validation: {0}")]
  Validation(String),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("TOML: {0}")]
  Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
