//! Offline stream analysis: what would the pipeline see?
//!
//! Shares the parser and the resolver's policy checks, touches no
//! network and writes nothing.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::parser::{Parsed, parse_line};
use crate::resolver::{Resolver, SkipReason};
use vecsync_core::{ChangeOp, ContentTier};

/// Distribution of an input stream across tiers, ops, and skip policies.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AnalyzeReport {
  pub total_lines: u64,
  pub changes: u64,
  pub markers: u64,
  pub malformed: u64,

  pub plain: u64,
  pub base64: u64,
  pub reference: u64,

  pub adds: u64,
  pub modifies: u64,
  pub deletes: u64,
  pub renames: u64,

  pub skip_flagged: u64,
  pub skip_vendor: u64,
  pub skip_binary: u64,
  pub skip_too_large: u64,

  pub inline_bytes: u64,
}

impl AnalyzeReport {
  pub fn skipped(&self) -> u64 {
    self.skip_flagged + self.skip_vendor + self.skip_binary + self.skip_too_large
  }

  /// Human-readable rendering for the CLI.
  pub fn render(&self) -> String {
    let mut out = String::new();
    out.push_str(&format!(
      "lines: {} ({} changes, {} markers, {} malformed)\n",
      self.total_lines, self.changes, self.markers, self.malformed
    ));
    out.push_str(&format!(
      "ops:   add {} / modify {} / delete {} / rename {}\n",
      self.adds, self.modifies, self.deletes, self.renames
    ));
    out.push_str(&format!(
      "tiers: plain {} / base64 {} / reference {}  (inline bytes: {})\n",
      self.plain, self.base64, self.reference, self.inline_bytes
    ));
    out.push_str(&format!(
      "skips: flagged {} / vendor {} / binary {} / too-large {}\n",
      self.skip_flagged, self.skip_vendor, self.skip_binary, self.skip_too_large
    ));
    out
  }
}

/// Classify every line of a change stream.
pub async fn analyze_stream<R>(reader: R, resolver: &Resolver) -> std::io::Result<AnalyzeReport>
where
  R: AsyncBufRead + Unpin,
{
  let mut report = AnalyzeReport::default();
  let mut lines = reader.lines();
  let mut line_no = 0u64;

  while let Some(raw) = lines.next_line().await? {
    line_no += 1;
    report.total_lines = line_no;

    match parse_line(&raw, line_no) {
      Parsed::Marker => report.markers += 1,
      Parsed::Malformed { .. } => report.malformed += 1,
      Parsed::Change(record) => {
        report.changes += 1;
        let record = record.record;

        match record.op {
          ChangeOp::Add => report.adds += 1,
          ChangeOp::Modify => report.modifies += 1,
          ChangeOp::Delete => report.deletes += 1,
          ChangeOp::Rename => report.renames += 1,
        }

        if record.is_delete() {
          continue;
        }

        if let Some(reason) = resolver.policy_skip(&record) {
          match reason {
            SkipReason::Flagged => report.skip_flagged += 1,
            SkipReason::Vendor => report.skip_vendor += 1,
            SkipReason::Binary => report.skip_binary += 1,
            SkipReason::TooLarge => report.skip_too_large += 1,
          }
          continue;
        }

        match record.tier() {
          ContentTier::Plain => {
            report.plain += 1;
            report.inline_bytes += record.content.as_deref().map(|c| c.len() as u64).unwrap_or(0);
          }
          ContentTier::Base64 => {
            report.base64 += 1;
            report.inline_bytes += record.content_base64.as_deref().map(|c| c.len() as u64).unwrap_or(0);
          }
          ContentTier::Reference => report.reference += 1,
          ContentTier::Skip => report.skip_flagged += 1,
        }
      }
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use vecsync_core::config::ResolverConfig;

  async fn analyze(input: &str) -> AnalyzeReport {
    let resolver = Resolver::new(&ResolverConfig::default());
    analyze_stream(input.as_bytes(), &resolver).await.unwrap()
  }

  #[tokio::test]
  async fn test_tier_distribution() {
    let input = concat!(
      r#"{"repo":"R","op":"add","path":"a.txt","content":"hello"}"#,
      "\n",
      r#"{"repo":"R","op":"modify","path":"b.txt","content_base64":"aGk="}"#,
      "\n",
      r#"{"repo":"R","op":"modify","path":"c.txt","content_ref":"/abs/c.txt"}"#,
      "\n",
      r#"{"repo":"R","op":"delete","path":"d.txt"}"#,
      "\n",
    );
    let report = analyze(input).await;
    assert_eq!(report.total_lines, 4);
    assert_eq!(report.changes, 4);
    assert_eq!(report.plain, 1);
    assert_eq!(report.base64, 1);
    assert_eq!(report.reference, 1);
    assert_eq!(report.deletes, 1);
    assert_eq!(report.inline_bytes, 5 + 4);
  }

  #[tokio::test]
  async fn test_markers_and_malformed() {
    let input = concat!(
      r#"{"repo":"R","new_changeset":"abc"}"#,
      "\n",
      r#"{"repo":"R","op":"#,
      "\n",
      "plain/legacy/path.rs\n",
    );
    let report = analyze(input).await;
    assert_eq!(report.markers, 1);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.changes, 1);
    assert_eq!(report.reference, 1);
    assert_eq!(report.modifies, 1);
  }

  #[tokio::test]
  async fn test_policy_skips_counted() {
    let input = concat!(
      r#"{"repo":"R","op":"add","path":"node_modules/x.js","content":"c"}"#,
      "\n",
      r#"{"repo":"R","op":"add","path":"logo.png"}"#,
      "\n",
      r#"{"repo":"R","op":"add","path":"a.txt","skip_index":true}"#,
      "\n",
      r#"{"repo":"R","op":"add","path":"huge.txt","size":999999999999}"#,
      "\n",
    );
    let report = analyze(input).await;
    assert_eq!(report.skip_vendor, 1);
    assert_eq!(report.skip_binary, 1);
    assert_eq!(report.skip_flagged, 1);
    assert_eq!(report.skip_too_large, 1);
    assert_eq!(report.skipped(), 4);
  }

  #[tokio::test]
  async fn test_render_mentions_everything() {
    let report = analyze(r#"{"repo":"R","op":"add","path":"a.txt","content":"hello"}"#).await;
    let text = report.render();
    assert!(text.contains("plain 1"));
    assert!(text.contains("add 1"));
  }
}
