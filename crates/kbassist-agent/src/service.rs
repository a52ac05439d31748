//! Assistant service
//!
//! The single query path: session bookkeeping around one orchestrator run,
//! plus an audit record per query.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use kbassist_core::{AgentOutcome, AuditEvent, AuditLevel, ConversationTurn, Source, ToolCallRecord};
use kbassist_retrieval::DocumentStore;

use crate::memory::SessionMemory;
use crate::orchestrator::{AgentOrchestrator, AgentRequest};
use crate::prompts::rag_prompt;
use crate::{AgentError, Result};

const DEFAULT_USER: &str = "default_user";
const MAX_TOP_K: usize = 20;

/// A question from a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Continue an existing session; a new id is generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_user")]
    pub user_id: String,
    /// Cap on search results per tool call, 1 to 20
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            user_id: default_user(),
            top_k: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AgentError::InvalidRequest("query must not be empty".to_string()));
        }
        if let Some(top_k) = self.top_k {
            if !(1..=MAX_TOP_K).contains(&top_k) {
                return Err(AgentError::InvalidRequest(format!(
                    "top_k must be between 1 and {}",
                    MAX_TOP_K
                )));
            }
        }
        Ok(())
    }
}

/// Answer plus the agent's account of how it got there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
    pub agent_plan: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: u32,
    pub outcome: AgentOutcome,
}

pub struct AssistantService {
    orchestrator: AgentOrchestrator,
    memory: Arc<SessionMemory>,
    store: Arc<dyn DocumentStore>,
    history_limit: usize,
    default_top_k: usize,
}

impl AssistantService {
    pub fn new(
        orchestrator: AgentOrchestrator,
        memory: Arc<SessionMemory>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            orchestrator,
            memory,
            store,
            history_limit: 10,
            default_top_k: 5,
        }
    }

    /// Prior turns rendered into the agent prompt
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Result count for `retrieve_and_answer` when none is given
    pub fn with_default_top_k(mut self, default_top_k: usize) -> Self {
        self.default_top_k = default_top_k;
        self
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    /// Answer one question within its session
    ///
    /// Only request validation fails; backend trouble is reported through
    /// the answer and `outcome`.
    #[instrument(skip(self, request, cancel), fields(user_id = %request.user_id))]
    pub async fn ask(&self, request: QueryRequest, cancel: &CancellationToken) -> Result<QueryResponse> {
        request.validate()?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.memory.create_session(&session_id, &request.user_id).await;
        let history = self
            .memory
            .conversation(&session_id, Some(self.history_limit))
            .await;

        let mut agent_request = AgentRequest::new(request.query.clone()).with_history(history);
        if let Some(top_k) = request.top_k {
            agent_request = agent_request.with_max_top_k(top_k);
        }

        let response = self.orchestrator.run(&agent_request, cancel).await;

        self.memory
            .add_message(&session_id, ConversationTurn::user(request.query.clone()))
            .await;
        self.memory
            .add_message(&session_id, ConversationTurn::assistant(response.answer.clone()))
            .await;

        let level = match response.trace.outcome {
            AgentOutcome::Answered => AuditLevel::Success,
            AgentOutcome::Exhausted | AgentOutcome::Cancelled => AuditLevel::Warning,
            AgentOutcome::Failed => AuditLevel::Error,
        };
        let event = AuditEvent::new("agent_query", format!("Answered query for {}", request.user_id), level)
            .with_metadata(json!({
                "session_id": session_id,
                "user_id": request.user_id,
                "query": request.query,
                "outcome": response.trace.outcome,
                "iterations": response.trace.iterations,
                "tool_calls": response.trace.tool_calls.len(),
                "sources": response.sources.len(),
                "agent_plan": response.trace.plan_summary,
            }));
        if let Err(e) = self.store.log_event(event).await {
            warn!(error = %e, "Failed to write audit event");
        }

        info!(
            session_id = %session_id,
            outcome = ?response.trace.outcome,
            iterations = response.trace.iterations,
            "Query answered"
        );

        Ok(QueryResponse {
            answer: response.answer,
            sources: response.sources,
            session_id,
            agent_plan: response.trace.plan_summary,
            tool_calls: response.trace.tool_calls,
            iterations: response.trace.iterations,
            outcome: response.trace.outcome,
        })
    }

    /// Non-agentic path: retrieve once and build a grounded prompt
    pub async fn retrieve_and_answer(&self, question: &str, top_k: Option<usize>) -> String {
        let tools = self.orchestrator.tools();
        let matches = tools
            .gateway()
            .search(question, top_k.unwrap_or(self.default_top_k), tools.namespace(), None)
            .await;

        let context = if matches.is_empty() {
            "No relevant policy documents found.".to_string()
        } else {
            matches
                .iter()
                .map(|m| format!("[From {}]\n{}", m.metadata.filename, m.text))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        rag_prompt(&context, question)
    }
}
