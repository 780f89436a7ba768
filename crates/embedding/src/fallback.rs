//! Deterministic synthetic vectors for embedder outages.
//!
//! When the provider is down the pipeline still has to make progress;
//! presence/absence in the collection stays correct and only ranking
//! quality degrades until the file is re-indexed.

use sha2::{Digest, Sha256};

/// Expand a SHA-256 of the text into a unit vector of `dim` components.
///
/// Pure function of `(text, dim)`: the same content always produces the
/// same vector, so re-running an interrupted batch is idempotent.
pub fn fallback_vector(text: &str, dim: usize) -> Vec<f32> {
  let seed = Sha256::digest(text.as_bytes());

  let mut out = Vec::with_capacity(dim);
  let mut counter: u32 = 0;
  while out.len() < dim {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(counter.to_le_bytes());
    let block = hasher.finalize();

    for chunk in block.chunks_exact(4) {
      if out.len() == dim {
        break;
      }
      let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
      // Map to [-1, 1]
      out.push((word as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
    }
    counter += 1;
  }

  let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
  if norm > 0.0 {
    for v in &mut out {
      *v /= norm;
    }
  }
  out
}
