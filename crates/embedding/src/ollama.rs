//! Ollama-backed embedding provider.
//!
//! Vector length is validated against the configured dimensions on every
//! response: a wrong-length vector is rejected here rather than being
//! written downstream, where it would poison the whole batch.

use crate::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;
use vecsync_core::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  client: reqwest::Client,
  /// Precomputed `/api/embeddings` endpoint.
  endpoint: String,
  /// Probe endpoint for availability checks.
  version_endpoint: String,
  model: String,
  dimensions: usize,
}

impl OllamaProvider {
  pub fn new(config: &EmbeddingConfig) -> Self {
    let mut base = config.ollama_url.clone();
    while base.ends_with('/') {
      base.pop();
    }
    Self {
      client: reqwest::Client::new(),
      endpoint: format!("{base}/api/embeddings"),
      version_endpoint: format!("{base}/api/version"),
      model: config.model.clone(),
      dimensions: config.dimensions,
    }
  }
}

impl Default for OllamaProvider {
  fn default() -> Self {
    Self::new(&EmbeddingConfig::default())
  }
}

#[derive(Debug, Serialize)]
struct PromptBody<'a> {
  model: &'a str,
  prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct PromptReply {
  #[serde(default)]
  embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    trace!(model = %self.model, chars = text.len(), "Requesting embedding");

    let body = PromptBody {
      model: &self.model,
      prompt: text,
    };
    let response = self.client.post(&self.endpoint).json(&body).send().await?;

    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      return Err(EmbeddingError::ProviderError(format!("Status {status}: {detail}")));
    }

    let reply: PromptReply = response.json().await?;
    match reply.embedding.len() {
      0 => Err(EmbeddingError::ProviderError("Empty embedding returned".to_string())),
      n if n != self.dimensions => Err(EmbeddingError::WrongDimensions {
        expected: self.dimensions,
        actual: n,
      }),
      _ => Ok(reply.embedding),
    }
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    // No batch endpoint upstream; issue the prompts one by one.
    let mut vectors = Vec::with_capacity(texts.len());
    for text in texts {
      vectors.push(self.embed(text).await?);
    }
    Ok(vectors)
  }

  async fn is_available(&self) -> bool {
    self
      .client
      .get(&self.version_endpoint)
      .timeout(std::time::Duration::from_secs(5))
      .send()
      .await
      .map(|r| r.status().is_success())
      .unwrap_or(false)
  }
}
