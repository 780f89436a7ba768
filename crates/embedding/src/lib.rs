pub mod fallback;
pub mod ollama;
pub mod provider;
pub mod resilient;

pub use fallback::fallback_vector;
pub use ollama::OllamaProvider;
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use resilient::{ResilientProvider, is_retryable_error, wrap_resilient_arc};
