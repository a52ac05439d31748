use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Environment variable prefix, e.g. `KBASSIST_OPENAI__API_KEY`
pub const ENV_PREFIX: &str = "KBASSIST";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub vector: VectorStoreConfig,
    #[serde(default)]
    pub store: DocumentStoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSettings::default(),
            openai: OpenAiConfig::default(),
            vector: VectorStoreConfig::default(),
            store: DocumentStoreConfig::default(),
            ingestion: IngestionConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_env(ENV_PREFIX)
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self> {
        Self::layered(prefix, None)
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self> {
        Self::layered(ENV_PREFIX, Some(path))
    }

    fn layered(prefix: &str, path: Option<&str>) -> Result<Self> {
        let mut builder = Self::with_defaults(Config::builder())?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>> {
        Ok(builder
            .set_default("app.name", "HR Assistant")?
            .set_default("app.log_level", "info")?
            .set_default("openai.endpoint", "https://api.openai.com/v1")?
            .set_default("openai.chat_model", "gpt-4o-mini")?
            .set_default("openai.embedding_model", "text-embedding-ada-002")?
            .set_default("openai.temperature", 0.7)?
            .set_default("openai.max_tokens", 2000)?
            .set_default("openai.max_retries", 3)?
            .set_default("vector.backend", "memory")?
            .set_default("vector.index_name", "hr-assistant-index")?
            .set_default("vector.dimension", 1536)?
            .set_default("vector.metric", "cosine")?
            .set_default("vector.namespace", "hr_policies")?
            .set_default("store.directory", "./data/store")?
            .set_default("store.chunks_file", "chunks.jsonl")?
            .set_default("store.audit_file", "audit.jsonl")?
            .set_default("ingestion.chunk_size", 1000)?
            .set_default("ingestion.chunk_overlap", 200)?
            .set_default("ingestion.separator", "\n\n")?
            .set_default("ingestion.embed_batch_size", 50)?
            .set_default("ingestion.embed_concurrency", 4)?
            .set_default("ingestion.upsert_batch_size", 100)?
            .set_default("ingestion.remove_urls", true)?
            .set_default("ingestion.remove_emails", false)?
            .set_default("ingestion.fix_encoding", true)?
            .set_default("agent.max_iterations", 5)?
            .set_default("agent.request_timeout_secs", 60)?
            .set_default("agent.history_limit", 10)?
            .set_default("agent.default_top_k", 5)?)
    }

    /// Check cross-field constraints once, at load time
    pub fn validate(&self) -> Result<()> {
        self.ingestion.validate()?;
        self.agent.validate()?;
        if self.vector.dimension == 0 {
            return Err(CoreError::validation("vector.dimension must be greater than 0"));
        }
        if self.vector.backend == VectorBackendKind::Pinecone && self.vector.index_host.is_none() {
            return Err(CoreError::validation(
                "vector.index_host is required for the pinecone backend",
            ));
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "HR Assistant".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OpenAI-compatible chat and embedding endpoint settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Set for Azure OpenAI deployments; switches auth to the `api-key` header
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_openai_endpoint(),
            api_key: None,
            api_version: None,
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
        }
    }
}

impl OpenAiConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

/// Which vector index implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    #[default]
    Memory,
    Pinecone,
}

/// Vector index settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorBackendKind,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Data-plane host of the index, e.g. `https://hr-assistant-index-abc.svc.pinecone.io`
    #[serde(default)]
    pub index_host: Option<String>,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Memory,
            api_key: None,
            index_host: None,
            index_name: default_index_name(),
            dimension: default_dimension(),
            metric: default_metric(),
            namespace: default_namespace(),
        }
    }
}

fn default_index_name() -> String {
    "hr-assistant-index".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_metric() -> String {
    "cosine".to_string()
}

fn default_namespace() -> String {
    "hr_policies".to_string()
}

/// Document store (chunk records and audit trail) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentStoreConfig {
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_chunks_file")]
    pub chunks_file: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
            chunks_file: default_chunks_file(),
            audit_file: default_audit_file(),
        }
    }
}

impl DocumentStoreConfig {
    pub fn chunks_path(&self) -> PathBuf {
        self.directory.join(&self.chunks_file)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.directory.join(&self.audit_file)
    }
}

fn default_store_directory() -> PathBuf {
    PathBuf::from("./data/store")
}

fn default_chunks_file() -> String {
    "chunks.jsonl".to_string()
}

fn default_audit_file() -> String {
    "audit.jsonl".to_string()
}

/// Cleaning, chunking, and embedding settings used at ingestion time
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_true")]
    pub remove_urls: bool,
    #[serde(default)]
    pub remove_emails: bool,
    #[serde(default = "default_true")]
    pub fix_encoding: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separator: default_separator(),
            embed_batch_size: default_embed_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            upsert_batch_size: default_upsert_batch_size(),
            remove_urls: true,
            remove_emails: false,
            fix_encoding: true,
        }
    }
}

impl IngestionConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::validation("ingestion.chunk_size must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CoreError::validation(
                "ingestion.chunk_overlap must be less than chunk_size",
            ));
        }
        if self.separator.is_empty() {
            return Err(CoreError::validation("ingestion.separator must not be empty"));
        }
        if self.embed_batch_size == 0 || self.upsert_batch_size == 0 {
            return Err(CoreError::validation("batch sizes must be greater than 0"));
        }
        Ok(())
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_separator() -> String {
    "\n\n".to_string()
}

fn default_embed_batch_size() -> usize {
    50
}

fn default_embed_concurrency() -> usize {
    4
}

fn default_upsert_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

/// Agent loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Prior turns included in the system prompt
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            request_timeout_secs: default_request_timeout_secs(),
            history_limit: default_history_limit(),
            default_top_k: default_top_k(),
        }
    }
}

impl AgentConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(CoreError::validation("agent.max_iterations must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::validation(
                "agent.request_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_history_limit() -> usize {
    10
}

fn default_top_k() -> usize {
    5
}
