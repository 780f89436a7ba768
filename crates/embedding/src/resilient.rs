// Resilient wrapper around an embedding provider.
//
// Retries on 429/502/503/504 and network errors with exponential backoff
// and jitter; every request carries a deadline.

use crate::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use vecsync_core::RetryPolicy;

/// Check if an error is retryable
pub fn is_retryable_error(error: &EmbeddingError) -> bool {
  match error {
    EmbeddingError::Network(_) => true,
    EmbeddingError::Request(e) => e.is_timeout() || e.is_connect(),
    EmbeddingError::ProviderError(msg) => {
      // Check for retryable status codes in the message
      msg.contains("429") // Rate limited
        || msg.contains("502") // Bad gateway
        || msg.contains("503") // Service unavailable
        || msg.contains("504") // Gateway timeout
    }
    EmbeddingError::Timeout => true,
    EmbeddingError::NotAvailable => false,
    EmbeddingError::WrongDimensions { .. } => false,
  }
}

/// A provider that wraps another provider with retry logic.
pub struct ResilientProvider<P: EmbeddingProvider> {
  inner: P,
  policy: RetryPolicy,
  request_timeout: Duration,
}

impl<P: EmbeddingProvider> ResilientProvider<P> {
  pub fn new(provider: P, policy: RetryPolicy, request_timeout: Duration) -> Self {
    Self {
      inner: provider,
      policy,
      request_timeout,
    }
  }

  async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let mut last_error = None;

    for attempt in 0..self.policy.max_attempts {
      if attempt > 0 {
        let backoff = self.policy.backoff_for_attempt(attempt - 1);
        debug!("Retry attempt {} after {:?}", attempt, backoff);
        sleep(backoff).await;
      }

      match tokio::time::timeout(self.request_timeout, self.inner.embed(text)).await {
        Ok(Ok(result)) => return Ok(result),
        Ok(Err(e)) => {
          if is_retryable_error(&e) && attempt + 1 < self.policy.max_attempts {
            warn!("Retryable embedding error on attempt {}: {}", attempt + 1, e);
            last_error = Some(e);
            continue;
          }
          return Err(e);
        }
        Err(_) => {
          warn!("Embedding request timed out on attempt {}", attempt + 1);
          last_error = Some(EmbeddingError::Timeout);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| EmbeddingError::ProviderError("Max retries exceeded".to_string())))
  }
}

#[async_trait]
impl<P: EmbeddingProvider + Send + Sync> EmbeddingProvider for ResilientProvider<P> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  fn dimensions(&self) -> usize {
    self.inner.dimensions()
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self.embed_with_retry(text).await
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut results = Vec::with_capacity(texts.len());
    for text in texts {
      // Each text gets its own retry budget
      results.push(self.embed_with_retry(text).await?);
    }
    Ok(results)
  }

  async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}

/// Wrap a provider with retry logic behind an `Arc` for sharing.
pub fn wrap_resilient_arc<P>(
  provider: P,
  policy: RetryPolicy,
  request_timeout: Duration,
) -> Arc<dyn EmbeddingProvider + Send + Sync>
where
  P: EmbeddingProvider + Send + Sync + 'static,
{
  Arc::new(ResilientProvider::new(provider, policy, request_timeout))
}
