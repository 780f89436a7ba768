//! Content resolution for change records.
//!
//! A record either yields decoded text to index, a skip (with reason), or
//! an error that becomes a per-line failure. Tier priority when several
//! fields are present: inline plain > inline base64 > filesystem
//! reference; records with none of the three fall back to reading `path`
//! itself (legacy form).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::trace;
use vecsync_core::config::ResolverConfig;
use vecsync_core::{ChangeRecord, ErrorCategory, classify_io};

/// Why a record was skipped rather than indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// Producer set `skip_index`.
  Flagged,
  /// Path lives under a vendor/build directory.
  Vendor,
  /// Binary extension or MIME type.
  Binary,
  /// Larger than the configured maximum.
  TooLarge,
}

impl SkipReason {
  pub fn as_str(&self) -> &'static str {
    match self {
      SkipReason::Flagged => "flagged",
      SkipReason::Vendor => "vendor",
      SkipReason::Binary => "binary",
      SkipReason::TooLarge => "too large",
    }
  }
}

/// Outcome of resolving one record.
#[derive(Debug)]
pub enum Resolution {
  Indexable(String),
  Skip(SkipReason),
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("invalid base64 content: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("content ref must be an absolute path: {0}")]
  RelativeRef(String),
  #[error("read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl ResolveError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      ResolveError::Base64(_) => ErrorCategory::Encoding,
      ResolveError::RelativeRef(_) => ErrorCategory::Validation,
      ResolveError::Read { source, .. } => classify_io(source),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Resolver {
  max_file_size: u64,
  vendor_dirs: HashSet<String>,
  binary_extensions: HashSet<String>,
}

impl Resolver {
  pub fn new(config: &ResolverConfig) -> Self {
    Self {
      max_file_size: config.max_file_size,
      vendor_dirs: config.vendor_dirs.iter().cloned().collect(),
      binary_extensions: config.binary_extensions.iter().map(|e| e.to_lowercase()).collect(),
    }
  }

  /// Policy-level skip decision, no I/O. Shared with the analysis
  /// utility.
  pub fn policy_skip(&self, record: &ChangeRecord) -> Option<SkipReason> {
    if record.skip_index == Some(true) {
      return Some(SkipReason::Flagged);
    }
    if self.in_vendor_dir(record.target_path()) {
      return Some(SkipReason::Vendor);
    }
    if self.looks_binary(record) {
      return Some(SkipReason::Binary);
    }
    if let Some(size) = record.size
      && size > self.max_file_size
    {
      return Some(SkipReason::TooLarge);
    }
    None
  }

  /// Produce the text to index, a skip, or an error.
  pub async fn resolve(&self, record: &ChangeRecord) -> Result<Resolution, ResolveError> {
    if let Some(reason) = self.policy_skip(record) {
      trace!(path = %record.target_path(), reason = reason.as_str(), "Skipping by policy");
      return Ok(Resolution::Skip(reason));
    }

    if let Some(content) = &record.content {
      return Ok(Resolution::Indexable(content.clone()));
    }

    if let Some(encoded) = &record.content_base64 {
      let bytes = BASE64.decode(encoded.trim())?;
      return Ok(Resolution::Indexable(String::from_utf8_lossy(&bytes).into_owned()));
    }

    if let Some(reference) = &record.content_ref {
      if !Path::new(reference).is_absolute() {
        return Err(ResolveError::RelativeRef(reference.clone()));
      }
      return self.read_file(reference).await;
    }

    // Legacy form: the record's path doubles as a filesystem path
    self.read_file(record.target_path()).await
  }

  async fn read_file(&self, path: &str) -> Result<Resolution, ResolveError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|source| ResolveError::Read {
      path: path.to_string(),
      source,
    })?;
    if metadata.len() > self.max_file_size {
      return Ok(Resolution::Skip(SkipReason::TooLarge));
    }

    let bytes = tokio::fs::read(path).await.map_err(|source| ResolveError::Read {
      path: path.to_string(),
      source,
    })?;
    Ok(Resolution::Indexable(String::from_utf8_lossy(&bytes).into_owned()))
  }

  fn in_vendor_dir(&self, path: &str) -> bool {
    Path::new(path)
      .components()
      .filter_map(|c| match c {
        std::path::Component::Normal(name) => name.to_str(),
        _ => None,
      })
      .any(|segment| self.vendor_dirs.contains(segment))
  }

  fn looks_binary(&self, record: &ChangeRecord) -> bool {
    if let Some(mime) = &record.mime
      && (mime.starts_with("image/")
        || mime.starts_with("audio/")
        || mime.starts_with("video/")
        || mime == "application/octet-stream")
    {
      return true;
    }

    Path::new(record.target_path())
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| self.binary_extensions.contains(&ext.to_lowercase()))
  }
}
