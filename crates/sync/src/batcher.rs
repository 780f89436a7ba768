//! Size-bounded batching of resolved items.
//!
//! Upserts and deletes never share a batch; a kind change closes the open
//! batch so operations keep their input order within a worker. Every
//! batch carries the line numbers it covers, which is what ties the
//! checkpoint commit to the downstream side effect.

use uuid::Uuid;
use vectorstore::UpsertObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
  Upsert,
  Delete,
}

/// An upsert plus the line it completes. Renames issue a delete with no
/// line of its own; the line rides the upsert side only.
#[derive(Debug)]
pub struct UpsertItem {
  pub line: Option<u64>,
  /// Original input line, kept for failure records.
  pub raw: String,
  pub object: UpsertObject,
}

#[derive(Debug)]
pub struct DeleteItem {
  pub line: Option<u64>,
  /// Original input line, kept for failure records.
  pub raw: String,
  pub id: Uuid,
}

#[derive(Debug)]
pub enum Batch {
  Upserts(Vec<UpsertItem>),
  Deletes(Vec<DeleteItem>),
}

impl Batch {
  pub fn kind(&self) -> BatchKind {
    match self {
      Batch::Upserts(_) => BatchKind::Upsert,
      Batch::Deletes(_) => BatchKind::Delete,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Batch::Upserts(items) => items.len(),
      Batch::Deletes(items) => items.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Line numbers covered by this batch.
  pub fn lines(&self) -> Vec<u64> {
    match self {
      Batch::Upserts(items) => items.iter().filter_map(|i| i.line).collect(),
      Batch::Deletes(items) => items.iter().filter_map(|i| i.line).collect(),
    }
  }
}

#[derive(Debug)]
pub struct Batcher {
  max_items: usize,
  max_bytes: usize,
  upserts: Vec<UpsertItem>,
  deletes: Vec<DeleteItem>,
  bytes: usize,
}

impl Batcher {
  pub fn new(max_items: usize, max_bytes: usize) -> Self {
    Self {
      max_items: max_items.max(1),
      max_bytes: max_bytes.max(1),
      upserts: Vec::new(),
      deletes: Vec::new(),
      bytes: 0,
    }
  }

  /// Add an upsert; returns zero, one, or two batches that became ready
  /// (a pending delete batch flushed by the kind change, then possibly
  /// this batch on hitting a size limit).
  pub fn push_upsert(&mut self, item: UpsertItem) -> Vec<Batch> {
    let mut ready = Vec::new();
    if !self.deletes.is_empty() {
      ready.extend(self.take());
    }
    self.bytes += item.object.content.len();
    self.upserts.push(item);
    if self.upserts.len() >= self.max_items || self.bytes >= self.max_bytes {
      ready.extend(self.take());
    }
    ready
  }

  /// Add a delete; same contract as [`Self::push_upsert`].
  pub fn push_delete(&mut self, item: DeleteItem) -> Vec<Batch> {
    let mut ready = Vec::new();
    if !self.upserts.is_empty() {
      ready.extend(self.take());
    }
    self.deletes.push(item);
    if self.deletes.len() >= self.max_items {
      ready.extend(self.take());
    }
    ready
  }

  /// Close whatever is open.
  pub fn flush(&mut self) -> Vec<Batch> {
    self.take().into_iter().collect()
  }

  pub fn pending(&self) -> usize {
    self.upserts.len() + self.deletes.len()
  }

  fn take(&mut self) -> Option<Batch> {
    if !self.upserts.is_empty() {
      self.bytes = 0;
      Some(Batch::Upserts(std::mem::take(&mut self.upserts)))
    } else if !self.deletes.is_empty() {
      Some(Batch::Deletes(std::mem::take(&mut self.deletes)))
    } else {
      None
    }
  }
}
