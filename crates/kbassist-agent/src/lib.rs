//! Agent layer for kbassist
//!
//! The bounded tool-calling loop that answers questions over the indexed
//! documents, together with everything around it:
//!
//! - Chat backend interface and an OpenAI-compatible client
//! - The closed set of retrieval tools
//! - HR assistant prompts and templates
//! - Per-session conversation memory
//! - One-shot document summaries outside the tool loop
//! - `AssistantService`, the single query entry point

pub mod chat;
pub mod memory;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod service;
pub mod summarizer;
pub mod tools;

// Re-exports
pub use chat::{ChatBackend, ChatCompletion, ChatMessage, ToolRequest, ToolSpec};
pub use memory::SessionMemory;
pub use openai::OpenAiChatClient;
pub use orchestrator::{AgentOrchestrator, AgentRequest, AgentResponse};
pub use service::{AssistantService, QueryRequest, QueryResponse};
pub use summarizer::{Audience, Summarizer, SummaryStyle};
pub use tools::{ToolCall, ToolError, ToolExecutor, ToolOutput};

pub use tokio_util::sync::CancellationToken;

use kbassist_core::TimeoutError;

/// Error types for the agent layer
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Chat backend error: {0}")]
    Chat(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl AgentError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Api { status, .. } => *status == 429 || *status >= 500,
            AgentError::Timeout(_) => true,
            AgentError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
