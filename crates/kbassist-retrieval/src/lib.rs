//! Retrieval backends for kbassist
//!
//! Narrow async interfaces to the external collaborators (embedding API,
//! vector index, document store), their concrete adapters, and the
//! retrieval gateway that turns a query into ranked matches.

pub mod backend;
pub mod gateway;
pub mod hash_embedding;
pub mod http;
pub mod jsonl;
pub mod memory;
pub mod openai;
pub mod pinecone;
pub mod similarity;

// Re-exports
pub use backend::{DocumentStore, EmbeddingBackend, VectorIndex};
pub use gateway::RetrievalGateway;
pub use hash_embedding::HashEmbedding;
pub use jsonl::JsonlDocumentStore;
pub use memory::{InMemoryDocumentStore, InMemoryVectorIndex};
pub use openai::OpenAiEmbeddingClient;
pub use pinecone::PineconeIndex;
pub use similarity::SimilarityMetric;

use kbassist_core::TimeoutError;

/// Error types for retrieval backends
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Server error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::RateLimit | RetrievalError::Server(_) | RetrievalError::Timeout(_) => true,
            RetrievalError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RetrievalError::Api { status, .. } => Some(*status),
            RetrievalError::Auth(_) => Some(401),
            RetrievalError::RateLimit => Some(429),
            RetrievalError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
