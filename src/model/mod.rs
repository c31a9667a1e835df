pub mod providers;

use async_trait::async_trait;

use crate::types::ChatMessage;

/// Errors from model collaborators. A timeout is retryable on the next
/// scheduler tick; everything else aborts only the current cycle.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Timeout)
    }
}

/// Chat completion: an ordered history in, generated text out. Any error
/// means generation failed and the caller's cycle is abandoned with state
/// unchanged.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Text embedding: a fixed-length vector per (label, text) pair. The label
/// is a short hint prepended to the text, mirroring how stored subjects are
/// embedded with their bodies.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model version name; embeddings are partitioned by it in storage.
    fn model_name(&self) -> &str;

    async fn embed(&self, label: &str, text: &str) -> Result<Vec<f32>, ModelError>;
}
