//! Stable object identifiers for the vector store.

use uuid::Uuid;

/// Namespace under which object identifiers are derived. Changing this
/// orphans every object already written, so it is fixed forever.
const OBJECT_NAMESPACE: Uuid = Uuid::from_u128(0x4f1c_9d2a_7b6e_4e38_9a50_c3d1_88f2_0b7d);

/// Derive the identifier an indexed file is stored under.
///
/// Deterministic across runs and processes: the same
/// `(collection, repo, path)` always maps to the same UUID, which turns
/// repeated indexing into upserts and lets deletes address objects without
/// a prior lookup.
pub fn object_id(collection: &str, repo: &str, path: &str) -> Uuid {
  let name = format!("{collection}:{repo}:{path}");
  Uuid::new_v5(&OBJECT_NAMESPACE, name.as_bytes())
}
