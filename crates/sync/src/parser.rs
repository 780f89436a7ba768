//! Line-oriented change stream parsing.
//!
//! Strictly streaming: one line in, one verdict out, nothing buffered.
//! Structured records are JSON objects; anything that is not JSON is the
//! legacy plain-path form (synthesized `op = modify`); JSON that does not
//! deserialize into a change record is malformed and reported as a
//! failure by the caller.

use vecsync_core::ChangeRecord;

/// A change record tagged with its input position.
#[derive(Debug, Clone)]
pub struct LineRecord {
  /// 1-based input line number; the unit of checkpointing.
  pub line: u64,
  pub record: ChangeRecord,
  /// The input line verbatim, kept as the payload snapshot for failure
  /// records.
  pub raw: String,
}

/// Verdict for one input line.
#[derive(Debug)]
pub enum Parsed {
  Change(Box<LineRecord>),
  /// Producer bookkeeping (changeset markers) and blank lines.
  Marker,
  Malformed { line: u64, raw: String },
}

pub fn parse_line(raw: &str, line: u64) -> Parsed {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Parsed::Marker;
  }

  if trimmed.starts_with('{') {
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(_) => {
        return Parsed::Malformed {
          line,
          raw: raw.to_string(),
        };
      }
    };

    if value.get("new_changeset").is_some() {
      return Parsed::Marker;
    }

    match serde_json::from_value::<ChangeRecord>(value) {
      Ok(record) if !record.path.is_empty() => Parsed::Change(Box::new(LineRecord {
        line,
        record,
        raw: raw.to_string(),
      })),
      _ => Parsed::Malformed {
        line,
        raw: raw.to_string(),
      },
    }
  } else {
    // Legacy form: the whole line is a file path
    Parsed::Change(Box::new(LineRecord {
      line,
      record: ChangeRecord::legacy(trimmed),
      raw: raw.to_string(),
    }))
  }
}
