use async_trait::async_trait;
use vecsync_core::ErrorCategory;

/// A service turning text into a fixed-dimension vector.
///
/// Callers treat the transform as opaque and deterministic within a run;
/// when a provider call fails the worker substitutes
/// [`crate::fallback_vector`] so indexing never blocks on an outage.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, crate::EmbeddingError>;
  async fn is_available(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("Provider not available")]
  NotAvailable,
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error: {0}")]
  ProviderError(String),
  #[error("Network error: {0}")]
  Network(String),
  #[error("Request timed out")]
  Timeout,
  #[error("Embedding has {actual} dimensions, expected {expected}")]
  WrongDimensions { expected: usize, actual: usize },
}

impl EmbeddingError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      EmbeddingError::NotAvailable => ErrorCategory::Network,
      EmbeddingError::Request(e) if e.is_timeout() => ErrorCategory::Timeout,
      EmbeddingError::Request(_) => ErrorCategory::Network,
      EmbeddingError::ProviderError(msg) if msg.contains("429") => ErrorCategory::RateLimit,
      EmbeddingError::ProviderError(_) => ErrorCategory::Unknown,
      EmbeddingError::Network(_) => ErrorCategory::Network,
      EmbeddingError::Timeout => ErrorCategory::Timeout,
      EmbeddingError::WrongDimensions { .. } => ErrorCategory::Validation,
    }
  }
}
