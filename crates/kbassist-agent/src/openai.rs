//! OpenAI-compatible chat completions client
//!
//! Sends the conversation plus the declared tools to `/chat/completions`
//! and reads back the first choice. Only the first entry of `tool_calls`
//! is surfaced; the loop handles one tool per cycle.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use kbassist_core::{OpenAiConfig, Role};
use kbassist_retrieval::http::{retry_backoff, DEFAULT_RETRY_BASE};

use crate::chat::{ChatBackend, ChatCompletion, ChatMessage, ToolRequest, ToolSpec};
use crate::{AgentError, Result};

#[derive(Clone)]
pub struct OpenAiChatClient {
    http: Client,
    url: Url,
    api_key: Secret<String>,
    azure: bool,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    retry_base: Duration,
}

impl std::fmt::Debug for OpenAiChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatClient")
            .field("url", &self.url.as_str())
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn encode_message(message: &ChatMessage) -> serde_json::Value {
    match (&message.role, &message.tool_request) {
        (Role::Assistant, Some(request)) => json!({
            "role": "assistant",
            "content": (!message.content.is_empty()).then_some(&message.content),
            "tool_calls": [{
                "id": request.id,
                "type": "function",
                "function": {
                    "name": request.name,
                    "arguments": encode_arguments(&request.arguments),
                }
            }]
        }),
        (Role::Tool, _) => json!({
            "role": "tool",
            "content": message.content,
            "tool_call_id": message.tool_call_id,
        }),
        (role, _) => json!({
            "role": role.as_str(),
            "content": message.content,
        }),
    }
}

fn encode_tool(spec: &ToolSpec) -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

/// Raw text kept by `decode_arguments` goes back out unchanged
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Arguments arrive as a JSON string; keep the raw text when it does not parse
fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        return response.json().await.map_err(AgentError::Http);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match status {
        StatusCode::TOO_MANY_REQUESTS if body.is_empty() => "Rate limit exceeded".to_string(),
        _ => body,
    };
    Err(AgentError::Api {
        status: status.as_u16(),
        message,
    })
}

impl OpenAiChatClient {
    /// Build a client; a missing API key is a configuration error
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AgentError::Config("missing OpenAI API key".to_string()))?;

        let azure = config.is_azure();
        let invalid = |e: url::ParseError| AgentError::Config(format!("invalid endpoint: {}", e));
        let base = Url::parse(&format!("{}/", config.endpoint.trim_end_matches('/'))).map_err(invalid)?;
        let mut url = if azure {
            base.join(&format!("openai/deployments/{}/chat/completions", config.chat_model))
        } else {
            base.join("chat/completions")
        }
        .map_err(invalid)?;
        if let Some(version) = config.api_version.as_deref().filter(|_| azure) {
            url.query_pairs_mut().append_pair("api-version", version);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(format!("kbassist/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            url,
            api_key: Secret::new(api_key.to_string()),
            azure,
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.azure {
            request.header("api-key", self.api_key.expose_secret())
        } else {
            request.bearer_auth(self.api_key.expose_secret())
        }
    }

    async fn complete_once(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatCompletion> {
        let request = CompletionRequest {
            model: (!self.azure).then_some(self.model.as_str()),
            messages: messages.iter().map(encode_message).collect(),
            tools: tools.iter().map(encode_tool).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .authorize(self.http.post(self.url.clone()))
            .json(&request)
            .send()
            .await?;
        let parsed: CompletionResponse = handle_response(response).await?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AgentError::Chat("completion contained no choices".to_string()))?;

        let tool_request = message.tool_calls.into_iter().next().map(|call| ToolRequest {
            id: call.id,
            arguments: decode_arguments(&call.function.arguments),
            name: call.function.name,
        });

        Ok(ChatCompletion {
            content: message.content,
            tool_request,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    #[instrument(skip(self, messages, tools), fields(model = %self.model, messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatCompletion> {
        let mut attempt = 0u32;
        loop {
            match self.complete_once(messages, tools).await {
                Ok(completion) => {
                    debug!(
                        has_content = completion.content.is_some(),
                        tool = ?completion.tool_request.as_ref().map(|r| r.name.as_str()),
                        "Received completion"
                    );
                    return Ok(completion);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_backoff(self.retry_base, attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying chat request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCall;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> OpenAiConfig {
        OpenAiConfig::default()
            .with_endpoint(format!("{}/v1", server.uri()))
            .with_api_key("sk-test")
            .with_max_retries(2)
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![ChatMessage::system("You are helpful."), ChatMessage::user("What is the leave policy?")]
    }

    #[tokio::test]
    async fn test_parses_tool_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "You are helpful."},
                    {"role": "user", "content": "What is the leave policy?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [
                            {
                                "id": "call_abc",
                                "type": "function",
                                "function": {
                                    "name": "search_policy_documents",
                                    "arguments": "{\"query\": \"leave\", \"top_k\": 2}"
                                }
                            },
                            {
                                "id": "call_def",
                                "type": "function",
                                "function": {"name": "list_available_policies", "arguments": "{}"}
                            }
                        ]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&config(&server)).unwrap();
        let completion = client.complete(&conversation(), &ToolCall::specs()).await.unwrap();

        assert_eq!(completion.content, None);
        let request = completion.tool_request.unwrap();
        assert_eq!(request.id.as_deref(), Some("call_abc"));
        assert_eq!(request.name, "search_policy_documents");
        assert_eq!(request.arguments, json!({"query": "leave", "top_k": 2}));
    }

    #[tokio::test]
    async fn test_parses_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Twenty days."}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&config(&server)).unwrap();
        let completion = client.complete(&conversation(), &[]).await.unwrap();
        assert_eq!(completion, ChatCompletion::text("Twenty days."));
    }

    #[tokio::test]
    async fn test_retries_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&config(&server))
            .unwrap()
            .with_retry_base(Duration::from_millis(1));
        let completion = client.complete(&conversation(), &[]).await.unwrap();
        assert_eq!(completion.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad tool schema"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&config(&server))
            .unwrap()
            .with_retry_base(Duration::from_millis(1));
        let err = client.complete(&conversation(), &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Api { status: 400, ref message } if message == "bad tool schema"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_chat_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&config(&server)).unwrap();
        let err = client.complete(&conversation(), &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Chat(_)));
    }

    #[tokio::test]
    async fn test_azure_deployment_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o-mini/chat/completions"))
            .and(query_param("api-version", "2024-02-01"))
            .and(header("api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hi"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = OpenAiConfig::default()
            .with_endpoint(server.uri())
            .with_api_key("sk-test")
            .with_api_version("2024-02-01");
        let client = OpenAiChatClient::new(&cfg).unwrap();
        client.complete(&conversation(), &[]).await.unwrap();
    }

    #[test]
    fn test_message_encoding() {
        let request = ToolRequest {
            id: Some("call_1".to_string()),
            name: "search_policy_documents".to_string(),
            arguments: json!({"query": "leave"}),
        };

        let assistant = encode_message(&ChatMessage::tool_request("", request));
        assert_eq!(assistant["content"], serde_json::Value::Null);
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"query\":\"leave\"}");

        let tool = encode_message(&ChatMessage::tool_result(Some("call_1".to_string()), "Policy 1"));
        assert_eq!(tool, json!({"role": "tool", "content": "Policy 1", "tool_call_id": "call_1"}));
    }

    #[test]
    fn test_malformed_arguments_kept_raw() {
        assert_eq!(decode_arguments("{\"query\":"), json!("{\"query\":"));
        assert_eq!(decode_arguments(""), json!({}));

        let request = ToolRequest {
            id: Some("call_2".to_string()),
            name: "search_policy_documents".to_string(),
            arguments: decode_arguments("{\"query\":"),
        };
        let assistant = encode_message(&ChatMessage::tool_request("", request));
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"query\":");
    }

    #[test]
    fn test_fallback_id_shared_by_both_turns() {
        let request = ToolRequest {
            id: None,
            name: "list_available_policies".to_string(),
            arguments: json!({}),
        }
        .with_fallback_id(2);

        let assistant = encode_message(&ChatMessage::tool_request("", request.clone()));
        let tool = encode_message(&ChatMessage::tool_result(request.id.clone(), "- leave.md"));
        assert_eq!(assistant["tool_calls"][0]["id"], "call_2");
        assert_eq!(tool["tool_call_id"], assistant["tool_calls"][0]["id"]);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = OpenAiChatClient::new(&OpenAiConfig::default()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
