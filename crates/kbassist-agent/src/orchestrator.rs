//! Agent Orchestrator
//!
//! Bounded tool-calling loop over a chat backend. Each cycle asks the model
//! for either content or one tool request; tool results are fed back as
//! `tool` turns until the model answers or the iteration budget runs out.
//!
//! The loop never returns an error. Backend failures, timeouts and
//! cancellation all end in a terminal `AgentOutcome` with a usable answer
//! and a populated `AgentTrace`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use kbassist_core::{
    AgentConfig, AgentOutcome, AgentTrace, ConversationTurn, Source, TimeoutPolicy, ToolCallRecord,
};

use crate::chat::{ChatBackend, ChatMessage};
use crate::memory::format_turns;
use crate::prompts::agent_system_prompt;
use crate::tools::{SourceCollector, ToolCall, ToolExecutor, ToolOutput};
use crate::{AgentError, Result};

/// Answer used when the loop runs out of iterations with nothing to say
pub const FALLBACK_ANSWER: &str =
    "I reached my thinking limit. Please try asking a more specific question.";

pub const CANCELLED_ANSWER: &str = "The request was cancelled before an answer was produced.";

/// One question for the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub query: String,
    /// Prior turns rendered into the system prompt
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Upper bound on the result count of a model-driven search
    #[serde(default)]
    pub max_top_k: Option<usize>,
}

impl AgentRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: Vec::new(),
            max_top_k: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = Some(max_top_k);
        self
    }
}

/// Answer, cited sources and the full trace of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub trace: AgentTrace,
}

#[derive(Default)]
struct LoopState {
    iterations: u32,
    tool_calls: Vec<ToolCallRecord>,
    sources: SourceCollector,
    last_assistant: Option<String>,
    answer: Option<String>,
}

pub struct AgentOrchestrator {
    chat: Arc<dyn ChatBackend>,
    tools: ToolExecutor,
    max_iterations: u32,
    timeout: TimeoutPolicy,
}

impl AgentOrchestrator {
    pub fn new(chat: Arc<dyn ChatBackend>, tools: ToolExecutor) -> Self {
        Self {
            chat,
            tools,
            max_iterations: 5,
            timeout: TimeoutPolicy::default(),
        }
    }

    pub fn from_config(chat: Arc<dyn ChatBackend>, tools: ToolExecutor, config: &AgentConfig) -> Self {
        Self::new(chat, tools)
            .with_max_iterations(config.max_iterations)
            .with_timeout(TimeoutPolicy::new(config.request_timeout()))
    }

    /// At least one cycle always runs
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    /// Run the loop to a terminal state
    #[instrument(skip(self, request, cancel), fields(model = self.chat.model(), query_len = request.query.len()))]
    pub async fn run(&self, request: &AgentRequest, cancel: &CancellationToken) -> AgentResponse {
        let start = Instant::now();

        let response = match self.run_loop(request, cancel).await {
            Ok(state) => self.finish(&request.query, state),
            Err(AgentError::Cancelled) => {
                info!("Agent run cancelled");
                Self::terminal(&request.query, CANCELLED_ANSWER.to_string(), "Cancelled", AgentOutcome::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Agent run failed");
                Self::terminal(
                    &request.query,
                    format!("I encountered an error while processing your question: {}", e),
                    "Error during execution",
                    AgentOutcome::Failed,
                )
            }
        };

        info!(
            outcome = ?response.trace.outcome,
            iterations = response.trace.iterations,
            tool_calls = response.trace.tool_calls.len(),
            sources = response.sources.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Agent run complete"
        );

        response
    }

    async fn run_loop(&self, request: &AgentRequest, cancel: &CancellationToken) -> Result<LoopState> {
        let history = format_turns(&request.history);
        let mut messages = vec![
            ChatMessage::system(agent_system_prompt(&history)),
            ChatMessage::user(request.query.clone()),
        ];
        let specs = ToolCall::specs();
        let mut state = LoopState::default();

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            debug!(iteration, max_iterations = self.max_iterations, "Planning");

            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = self.timeout.execute("chat_completion", self.chat.complete(&messages, &specs)) => result??,
            };
            state.iterations = iteration;

            let content = completion.content.unwrap_or_default().trim().to_string();
            if !content.is_empty() {
                state.last_assistant = Some(content.clone());
            }

            let Some(tool_request) = completion.tool_request.map(|r| r.with_fallback_id(iteration as usize)) else {
                if content.is_empty() {
                    debug!(iteration, "Empty completion, continuing");
                    continue;
                }
                state.answer = Some(content);
                return Ok(state);
            };

            info!(iteration, tool = %tool_request.name, "Tool requested");
            messages.push(ChatMessage::tool_request(content, tool_request.clone()));
            state.tool_calls.push(ToolCallRecord {
                tool_name: tool_request.name.clone(),
                arguments: tool_request.arguments.clone(),
                iteration,
            });

            let output = match ToolCall::parse(&tool_request.name, &tool_request.arguments) {
                Ok(call) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    output = self.tools.execute(&call, request.max_top_k) => output,
                },
                Err(e) => {
                    warn!(iteration, error = %e, "Rejected tool request");
                    ToolOutput::error(&e)
                }
            };

            state.sources.extend(&output.matches);
            messages.push(ChatMessage::tool_result(tool_request.id, output.text));
        }

        Ok(state)
    }

    fn finish(&self, query: &str, state: LoopState) -> AgentResponse {
        let calls = state.tool_calls.len();
        let (answer, plan_summary, outcome) = match state.answer {
            Some(answer) => (
                answer,
                format!("Completed in {} iteration(s) with {} tool call(s)", state.iterations, calls),
                AgentOutcome::Answered,
            ),
            None => {
                warn!(max_iterations = self.max_iterations, "Max iterations reached");
                (
                    state
                        .last_assistant
                        .unwrap_or_else(|| FALLBACK_ANSWER.to_string()),
                    format!("Reached max iterations ({}) with {} tool call(s)", self.max_iterations, calls),
                    AgentOutcome::Exhausted,
                )
            }
        };

        AgentResponse {
            sources: state.sources.into_sources(),
            trace: AgentTrace {
                query: query.to_string(),
                plan_summary,
                tool_calls: state.tool_calls,
                iterations: state.iterations,
                answer: answer.clone(),
                outcome,
            },
            answer,
        }
    }

    /// Failed and cancelled runs discard the partial trace
    fn terminal(query: &str, answer: String, plan: &str, outcome: AgentOutcome) -> AgentResponse {
        AgentResponse {
            sources: Vec::new(),
            trace: AgentTrace {
                query: query.to_string(),
                plan_summary: plan.to_string(),
                tool_calls: Vec::new(),
                iterations: 0,
                answer: answer.clone(),
                outcome,
            },
            answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatCompletion, MockChatBackend, ToolSpec};
    use async_trait::async_trait;
    use kbassist_core::{DocumentType, Role, VectorMetadata, VectorRecord};
    use kbassist_retrieval::{HashEmbedding, InMemoryVectorIndex, RetrievalGateway, VectorIndex};
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const DIM: usize = 64;
    const LEAVE_TEXT: &str = "Full-time employees receive twenty days of annual leave per year.";

    async fn executor() -> ToolExecutor {
        let embedder = Arc::new(HashEmbedding::new(DIM));
        let index = Arc::new(InMemoryVectorIndex::default());
        index
            .upsert(
                vec![VectorRecord {
                    id: "doc_0123456789ab_chunk_0".to_string(),
                    values: embedder.embed_one(LEAVE_TEXT),
                    metadata: VectorMetadata {
                        document_id: "doc_0123456789ab".to_string(),
                        chunk_index: 0,
                        total_chunks: 1,
                        text: LEAVE_TEXT.to_string(),
                        filename: "leave_policy.md".to_string(),
                        title: "Annual Leave Policy".to_string(),
                        document_type: DocumentType::Policy,
                    },
                }],
                "hr_policies",
            )
            .await
            .unwrap();

        ToolExecutor::new(RetrievalGateway::new(embedder, index, DIM), "hr_policies")
    }

    async fn orchestrator(chat: impl ChatBackend + 'static) -> AgentOrchestrator {
        AgentOrchestrator::new(Arc::new(chat), executor().await)
    }

    fn search_call() -> ChatCompletion {
        ChatCompletion::tool("search_policy_documents", json!({"query": "annual leave"})).with_request_id("call_1")
    }

    fn assert_trace_consistent(trace: &AgentTrace) {
        assert!(trace.tool_calls.len() as u32 <= trace.iterations);
        let mut previous = 1;
        for call in &trace.tool_calls {
            assert!(call.iteration >= 1 && call.iteration <= trace.iterations);
            assert!(call.iteration >= previous);
            previous = call.iteration;
        }
    }

    #[tokio::test]
    async fn test_leave_policy_question() {
        let mut chat = MockChatBackend::new();
        let mut seq = Sequence::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .withf(|messages, tools| {
                messages.len() == 2
                    && messages[0].role == Role::System
                    && messages[1].content == "What is the leave policy?"
                    && tools.len() == 4
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(search_call()));
        chat.expect_complete()
            .withf(|messages, _| {
                let last = messages.last().unwrap();
                messages.len() == 4
                    && last.role == Role::Tool
                    && last.tool_call_id.as_deref() == Some("call_1")
                    && last.content.starts_with("Policy 1 (relevance: ")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ChatCompletion::text("You receive twenty days of annual leave.")));

        let agent = orchestrator(chat).await;
        let response = agent
            .run(&AgentRequest::new("What is the leave policy?"), &CancellationToken::new())
            .await;

        assert_eq!(response.answer, "You receive twenty days of annual leave.");
        assert_eq!(response.trace.outcome, AgentOutcome::Answered);
        assert_eq!(response.trace.iterations, 2);
        assert_eq!(response.trace.tool_calls.len(), 1);
        assert_eq!(response.trace.tool_calls[0].tool_name, "search_policy_documents");
        assert_eq!(response.trace.tool_calls[0].iteration, 1);
        assert_eq!(response.trace.plan_summary, "Completed in 2 iteration(s) with 1 tool call(s)");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].filename, "leave_policy.md");
        assert_trace_consistent(&response.trace);
    }

    #[tokio::test]
    async fn test_exhaustion_uses_fallback_answer() {
        let mut chat = MockChatBackend::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete().times(3).returning(|_, _| Ok(search_call()));

        let agent = orchestrator(chat).await.with_max_iterations(3);
        let response = agent
            .run(&AgentRequest::new("leave?"), &CancellationToken::new())
            .await;

        assert_eq!(response.answer, FALLBACK_ANSWER);
        assert_eq!(response.trace.outcome, AgentOutcome::Exhausted);
        assert_eq!(response.trace.iterations, 3);
        assert_eq!(response.trace.tool_calls.len(), 3);
        assert_eq!(response.trace.plan_summary, "Reached max iterations (3) with 3 tool call(s)");
        // same chunk every time
        assert_eq!(response.sources.len(), 1);
        assert_trace_consistent(&response.trace);
    }

    #[tokio::test]
    async fn test_exhaustion_prefers_latest_assistant_text() {
        let mut chat = MockChatBackend::new();
        let mut seq = Sequence::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                let mut completion = search_call();
                completion.content = Some("Let me check the policy.".to_string());
                Ok(completion)
            });
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ChatCompletion::text("   ")));

        let agent = orchestrator(chat).await.with_max_iterations(2);
        let response = agent
            .run(&AgentRequest::new("leave?"), &CancellationToken::new())
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Exhausted);
        assert_eq!(response.answer, "Let me check the policy.");
        assert_eq!(response.trace.iterations, 2);
    }

    #[tokio::test]
    async fn test_chat_error_fails_run() {
        let mut chat = MockChatBackend::new();
        let mut seq = Sequence::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(search_call()));
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(AgentError::Api {
                    status: 500,
                    message: "upstream".to_string(),
                })
            });

        let agent = orchestrator(chat).await;
        let response = agent
            .run(&AgentRequest::new("leave?"), &CancellationToken::new())
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Failed);
        assert_eq!(
            response.answer,
            "I encountered an error while processing your question: API error (500): upstream"
        );
        assert_eq!(response.trace.plan_summary, "Error during execution");
        assert!(response.trace.tool_calls.is_empty());
        assert_eq!(response.trace.iterations, 0);
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recorded_and_reported() {
        let mut chat = MockChatBackend::new();
        let mut seq = Sequence::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ChatCompletion::tool("check_leave_balance", json!({"employee": "42"}))));
        chat.expect_complete()
            .withf(|messages, _| {
                let last = messages.last().unwrap();
                let asked = messages[messages.len() - 2]
                    .tool_request
                    .as_ref()
                    .and_then(|r| r.id.as_deref());
                last.role == Role::Tool
                    && last.content.starts_with("Error: Unknown tool 'check_leave_balance'")
                    && asked == Some("call_1")
                    && last.tool_call_id.as_deref() == Some("call_1")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ChatCompletion::text("I can't check balances.")));

        let agent = orchestrator(chat).await;
        let response = agent
            .run(&AgentRequest::new("balance?"), &CancellationToken::new())
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Answered);
        assert_eq!(response.trace.tool_calls.len(), 1);
        assert_eq!(response.trace.tool_calls[0].tool_name, "check_leave_balance");
        assert_eq!(response.trace.tool_calls[0].arguments, json!({"employee": "42"}));
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_history_rendered_into_system_prompt() {
        let mut chat = MockChatBackend::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .withf(|messages, _| {
                messages[0]
                    .content
                    .ends_with("Previous conversation:\nUSER: Hi\n\nASSISTANT: Hello!")
            })
            .times(1)
            .returning(|_, _| Ok(ChatCompletion::text("Sure.")));

        let request = AgentRequest::new("Follow-up")
            .with_history(vec![ConversationTurn::user("Hi"), ConversationTurn::assistant("Hello!")]);
        let response = orchestrator(chat)
            .await
            .run(&request, &CancellationToken::new())
            .await;

        assert_eq!(response.trace.iterations, 1);
        assert!(response.trace.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut chat = MockChatBackend::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = orchestrator(chat)
            .await
            .run(&AgentRequest::new("leave?"), &cancel)
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Cancelled);
        assert_eq!(response.answer, CANCELLED_ANSWER);
        assert_eq!(response.trace.plan_summary, "Cancelled");
        assert_eq!(response.trace.iterations, 0);
    }

    struct SlowChat;

    #[async_trait]
    impl ChatBackend for SlowChat {
        async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ChatCompletion> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ChatCompletion::text("too late"))
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_cancelled_during_chat_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let response = orchestrator(SlowChat)
            .await
            .run(&AgentRequest::new("leave?"), &cancel)
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Cancelled);
        assert!(response.trace.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_chat_timeout_fails_run() {
        let agent = orchestrator(SlowChat)
            .await
            .with_timeout(TimeoutPolicy::new(Duration::from_millis(20)));
        let response = agent
            .run(&AgentRequest::new("leave?"), &CancellationToken::new())
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Failed);
        assert!(response
            .answer
            .starts_with("I encountered an error while processing your question: "));
    }

    #[tokio::test]
    async fn test_max_top_k_caps_search() {
        let mut chat = MockChatBackend::new();
        let mut seq = Sequence::new();
        chat.expect_model().return_const("stub".to_string());
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ChatCompletion::tool(
                    "search_policy_documents",
                    json!({"query": "annual leave", "top_k": 10}),
                ))
            });
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ChatCompletion::text("done")));

        let response = orchestrator(chat)
            .await
            .run(
                &AgentRequest::new("leave?").with_max_top_k(0),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.trace.outcome, AgentOutcome::Answered);
        assert!(response.sources.is_empty());
    }
}
