//! Chat backend interface
//!
//! A provider-neutral view of a tool-calling chat model: a conversation of
//! role-tagged messages in, either content or a single tool request out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kbassist_core::{ConversationTurn, Role};

use crate::Result;

/// One message in the conversation sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on assistant turns that asked for a tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_request: Option<ToolRequest>,
    /// Set on tool turns; echoes the request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_request: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn carrying a tool request
    pub fn tool_request(content: impl Into<String>, request: ToolRequest) -> Self {
        Self {
            tool_request: Some(request),
            ..Self::assistant(content)
        }
    }

    /// Tool turn carrying a tool's textual output
    pub fn tool_result(tool_call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id,
            ..Self::new(Role::Tool, content)
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self::new(turn.role, turn.content.clone())
    }
}

/// Declaration of a tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Parsed arguments; a payload that is not valid JSON is kept as a string
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    /// Fill a missing or blank id with `call_{iteration}`
    pub fn with_fallback_id(mut self, iteration: usize) -> Self {
        if self.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            self.id = Some(format!("call_{}", iteration));
        }
        self
    }
}

/// One model response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_request: Option<ToolRequest>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_request: None,
        }
    }

    pub fn tool(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            content: None,
            tool_request: Some(ToolRequest {
                id: None,
                name: name.into(),
                arguments,
            }),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        if let Some(request) = self.tool_request.as_mut() {
            request.id = Some(id.into());
        }
        self
    }
}

/// Tool-calling chat model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatCompletion>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}
