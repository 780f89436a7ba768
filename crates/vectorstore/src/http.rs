//! HTTP client for the vector store.
//!
//! Endpoints:
//!   GET    /v1/schema/{collection}          describe (404 when absent)
//!   POST   /v1/schema                       create collection
//!   POST   /v1/batch/objects                batch upsert
//!   POST   /v1/batch/objects/delete         batch delete by id
//!   GET    /v1/.well-known/ready            health

use crate::{ItemStatus, StoreError, UpsertObject, VectorStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vecsync_core::ErrorCategory;

#[derive(Debug, Clone)]
pub struct HttpVectorStore {
  client: reqwest::Client,
  base_url: String,
  timeout: Duration,
  replication_factor: u32,
}

impl HttpVectorStore {
  pub fn new(base_url: impl Into<String>, timeout: Duration, replication_factor: u32) -> Self {
    let mut base_url = base_url.into();
    while base_url.ends_with('/') {
      base_url.pop();
    }
    Self {
      client: reqwest::Client::new(),
      base_url,
      timeout,
      replication_factor,
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{path}", self.base_url)
  }

  async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
      429 => StoreError::RateLimited,
      code if status.is_server_error() => StoreError::Server { status: code, message },
      code => StoreError::Rejected { status: code, message },
    })
  }
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
  class: &'a str,
  vectorizer: &'a str,
  #[serde(rename = "replicationConfig")]
  replication: ReplicationConfig,
}

#[derive(Debug, Serialize)]
struct ReplicationConfig {
  factor: u32,
}

#[derive(Debug, Serialize)]
struct BatchObject<'a> {
  id: Uuid,
  class: &'a str,
  properties: ObjectProperties<'a>,
  vector: &'a [f32],
}

#[derive(Debug, Serialize)]
struct ObjectProperties<'a> {
  repo: &'a str,
  path: &'a str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchUpsertRequest<'a> {
  objects: Vec<BatchObject<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchDeleteRequest<'a> {
  class: &'a str,
  ids: &'a [Uuid],
}

#[derive(Debug, Deserialize)]
struct BatchItemResponse {
  #[serde(default)]
  status: String,
  #[serde(default)]
  error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
  results: Vec<BatchItemResponse>,
}

fn item_statuses(results: Vec<BatchItemResponse>, expected: usize) -> Result<Vec<ItemStatus>, StoreError> {
  if results.len() != expected {
    return Err(StoreError::InvalidResponse(format!(
      "expected {expected} item results, got {}",
      results.len()
    )));
  }
  Ok(
    results
      .into_iter()
      .map(|item| match item.status.as_str() {
        // NOT_FOUND on delete is delete-if-exists semantics
        "SUCCESS" | "NOT_FOUND" | "" => ItemStatus::Ok,
        _ => ItemStatus::Failed {
          message: item.error.unwrap_or_else(|| item.status.clone()),
          category: ErrorCategory::VectorStore,
        },
      })
      .collect(),
  )
}

#[async_trait]
impl VectorStore for HttpVectorStore {
  fn name(&self) -> &str {
    "http"
  }

  async fn ensure_schema(&self, collection: &str) -> Result<(), StoreError> {
    let describe = self
      .client
      .get(self.url(&format!("/v1/schema/{collection}")))
      .timeout(self.timeout)
      .send()
      .await
      .map_err(StoreError::from_reqwest)?;

    if describe.status().is_success() {
      debug!(collection, "Collection already present");
      return Ok(());
    }
    if describe.status().as_u16() != 404 {
      Self::check_response(describe).await?;
      return Ok(());
    }

    let request = CreateCollectionRequest {
      class: collection,
      vectorizer: "none",
      replication: ReplicationConfig {
        factor: self.replication_factor,
      },
    };
    let response = self
      .client
      .post(self.url("/v1/schema"))
      .timeout(self.timeout)
      .json(&request)
      .send()
      .await
      .map_err(StoreError::from_reqwest)?;

    match Self::check_response(response).await {
      Ok(_) => {
        info!(collection, factor = self.replication_factor, "Created collection");
        Ok(())
      }
      // Lost a create race with another process
      Err(StoreError::Rejected { message, .. }) if message.contains("already exists") => Ok(()),
      Err(e) => Err(e),
    }
  }

  async fn batch_upsert(&self, collection: &str, objects: &[UpsertObject]) -> Result<Vec<ItemStatus>, StoreError> {
    if objects.is_empty() {
      return Ok(Vec::new());
    }

    let request = BatchUpsertRequest {
      objects: objects
        .iter()
        .map(|o| BatchObject {
          id: o.id,
          class: collection,
          properties: ObjectProperties {
            repo: &o.repo,
            path: &o.path,
            content: &o.content,
          },
          vector: &o.vector,
        })
        .collect(),
    };

    debug!(collection, count = objects.len(), "Submitting upsert batch");
    let response = self
      .client
      .post(self.url("/v1/batch/objects"))
      .timeout(self.timeout)
      .json(&request)
      .send()
      .await
      .map_err(StoreError::from_reqwest)?;
    let response = Self::check_response(response).await?;

    let parsed: BatchResponse = response
      .json()
      .await
      .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
    item_statuses(parsed.results, objects.len())
  }

  async fn batch_delete(&self, collection: &str, ids: &[Uuid]) -> Result<Vec<ItemStatus>, StoreError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    debug!(collection, count = ids.len(), "Submitting delete batch");
    let response = self
      .client
      .post(self.url("/v1/batch/objects/delete"))
      .timeout(self.timeout)
      .json(&BatchDeleteRequest { class: collection, ids })
      .send()
      .await
      .map_err(StoreError::from_reqwest)?;
    let response = Self::check_response(response).await?;

    let parsed: BatchResponse = response
      .json()
      .await
      .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
    item_statuses(parsed.results, ids.len())
  }

  async fn health(&self) -> bool {
    let result = self
      .client
      .get(self.url("/v1/.well-known/ready"))
      .timeout(Duration::from_secs(5))
      .send()
      .await;
    match result {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        warn!(error = %e, "Vector store health check failed");
        false
      }
    }
  }
}
