//! Pinecone data-plane client
//!
//! Speaks the REST data plane of a serverless index: `/vectors/upsert`,
//! `/query` and `/vectors/delete`, authenticated with the `Api-Key` header.

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use kbassist_core::{
    DeleteTarget, MetadataFilter, SearchMatch, VectorMetadata, VectorRecord, VectorStoreConfig,
};

use crate::backend::VectorIndex;
use crate::http::handle_response;
use crate::{Result, RetrievalError};

#[derive(Clone)]
pub struct PineconeIndex {
    http: Client,
    host: Url,
    api_key: Secret<String>,
}

impl std::fmt::Debug for PineconeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeIndex")
            .field("host", &self.host.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    metadata: Option<VectorMetadata>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    delete_all: bool,
    namespace: &'a str,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::Config("missing Pinecone API key".to_string()));
        }

        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let host = Url::parse(&format!("{}/", host.trim_end_matches('/')))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            host,
            api_key: Secret::new(api_key.trim().to_string()),
        })
    }

    /// Build from the `vector` config section
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let host = config
            .index_host
            .as_deref()
            .ok_or_else(|| RetrievalError::Config("vector.index_host is required".to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| RetrievalError::Config("missing Pinecone API key".to_string()))?;
        Self::new(host, api_key)
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(self.host.join(path)?)
            .header("Api-Key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let response: UpsertResponse = self
            .post(
                "vectors/upsert",
                &UpsertRequest {
                    vectors: &records,
                    namespace,
                },
            )
            .await?;

        debug!(upserted = response.upserted_count, "Pinecone upsert complete");
        Ok(response.upserted_count)
    }

    #[instrument(skip(self, vector, filter))]
    async fn query<'a>(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&'a MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let request = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata: true,
            filter: filter.filter(|f| !f.is_empty()).map(MetadataFilter::to_query_document),
        };

        let response: QueryResponse = self.post("query", &request).await?;

        Ok(response
            .matches
            .into_iter()
            .filter_map(|m| {
                let metadata = m.metadata?;
                Some(SearchMatch {
                    id: m.id,
                    score: m.score,
                    text: metadata.text.clone(),
                    metadata,
                })
            })
            .collect())
    }

    #[instrument(skip(self, target))]
    async fn delete(&self, target: DeleteTarget, namespace: &str) -> Result<()> {
        let request = match &target {
            DeleteTarget::Ids(ids) => DeleteRequest {
                ids: Some(ids.as_slice()),
                delete_all: false,
                namespace,
            },
            DeleteTarget::Namespace => DeleteRequest {
                ids: None,
                delete_all: true,
                namespace,
            },
        };

        let _: serde_json::Value = self.post("vectors/delete", &request).await?;
        Ok(())
    }
}
