//! OpenAI-compatible embeddings client
//!
//! Talks to `/embeddings` on OpenAI or, when an `api_version` is
//! configured, to an Azure deployment. Rate limits, server errors and
//! transport failures are retried with exponential backoff.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use kbassist_core::OpenAiConfig;

use crate::backend::EmbeddingBackend;
use crate::http::{handle_response, retry_backoff, DEFAULT_RETRY_BASE};
use crate::{Result, RetrievalError};

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    url: Url,
    api_key: Secret<String>,
    azure: bool,
    model: String,
    dimensions: Option<usize>,
    max_retries: u32,
    retry_base: Duration,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("url", &self.url.as_str())
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbeddingClient {
    /// Build a client; a missing API key is a configuration error
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RetrievalError::Config("missing OpenAI API key".to_string()))?;

        let azure = config.is_azure();
        let base = format!("{}/", config.endpoint.trim_end_matches('/'));
        let mut url = if azure {
            Url::parse(&base)?.join(&format!(
                "openai/deployments/{}/embeddings",
                config.embedding_model
            ))?
        } else {
            Url::parse(&base)?.join("embeddings")?
        };
        if let Some(version) = config.api_version.as_deref().filter(|_| azure) {
            url.query_pairs_mut().append_pair("api-version", version);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(format!("kbassist/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            url,
            api_key: Secret::new(api_key.to_string()),
            azure,
            model: config.embedding_model.clone(),
            dimensions: None,
            max_retries: config.max_retries,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Ask the API for shortened vectors (text-embedding-3 models only)
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
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

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: (!self.azure).then_some(self.model.as_str()),
            input: texts,
            dimensions: self.dimensions,
        };

        let response = self
            .authorize(self.http.post(self.url.clone()))
            .json(&request)
            .send()
            .await?;
        let mut parsed: EmbeddingResponse = handle_response(response).await?;

        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(RetrievalError::Backend(format!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddingClient {
    #[instrument(skip(self, texts), fields(model = %self.model, inputs = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0u32;
        loop {
            match self.embed_once(texts).await {
                Ok(vectors) => {
                    debug!(count = vectors.len(), "Received embeddings");
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_backoff(self.retry_base, attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying embedding request");
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
