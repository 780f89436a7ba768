//! Wire model for the change stream.
//!
//! One record per input line. The producer chooses how to deliver file
//! bytes (inline text, inline base64, or a filesystem reference); deletes
//! carry no content at all.

use serde::{Deserialize, Serialize};

/// File-level operation within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
  Add,
  Modify,
  Delete,
  Rename,
}

impl ChangeOp {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChangeOp::Add => "add",
      ChangeOp::Modify => "modify",
      ChangeOp::Delete => "delete",
      ChangeOp::Rename => "rename",
    }
  }
}

/// How a record delivers its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTier {
  /// Inline plain text (`content`).
  Plain,
  /// Inline base64 (`content_base64`).
  Base64,
  /// Filesystem reference (`content_ref`, or the legacy path form).
  Reference,
  /// Explicitly flagged `skip_index`.
  Skip,
}

impl ContentTier {
  pub fn as_str(&self) -> &'static str {
    match self {
      ContentTier::Plain => "plain",
      ContentTier::Base64 => "base64",
      ContentTier::Reference => "reference",
      ContentTier::Skip => "skip",
    }
  }
}

/// One line of the change stream.
///
/// Tier fields are mutually optional; when more than one is present the
/// resolver picks plain > base64 > reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
  /// Repository identifier.
  #[serde(default)]
  pub repo: String,
  pub op: ChangeOp,
  /// Repo-relative file path.
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_base64: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_ref: Option<String>,
  /// Advisory size in bytes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
  /// Advisory MIME type.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mime: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub skip_index: Option<bool>,
  /// Destination path for `op = rename`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub new_path: Option<String>,
}

impl ChangeRecord {
  /// Build a record from the legacy plain-path input form.
  pub fn legacy(path: impl Into<String>) -> Self {
    Self {
      repo: String::new(),
      op: ChangeOp::Modify,
      path: path.into(),
      content: None,
      content_base64: None,
      content_ref: None,
      size: None,
      mime: None,
      skip_index: None,
      new_path: None,
    }
  }

  /// The path the indexed object should live under after this change.
  ///
  /// For renames that is `new_path` when present; everything else uses
  /// `path`.
  pub fn target_path(&self) -> &str {
    match self.op {
      ChangeOp::Rename => self.new_path.as_deref().unwrap_or(&self.path),
      _ => &self.path,
    }
  }

  pub fn is_delete(&self) -> bool {
    self.op == ChangeOp::Delete
  }

  /// Which content tier this record selects, in documented priority order.
  pub fn tier(&self) -> ContentTier {
    if self.skip_index == Some(true) {
      ContentTier::Skip
    } else if self.content.is_some() {
      ContentTier::Plain
    } else if self.content_base64.is_some() {
      ContentTier::Base64
    } else {
      // content_ref and the legacy form both read from the filesystem
      ContentTier::Reference
    }
  }
}
