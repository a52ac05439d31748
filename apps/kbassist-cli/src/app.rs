//! Service wiring
//!
//! Builds every backend once, in dependency order, and tears them down
//! explicitly. Nothing here is global.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use kbassist_agent::{
    AgentOrchestrator, AssistantService, OpenAiChatClient, SessionMemory, ToolExecutor,
};
use kbassist_core::{AppConfig, TimeoutPolicy, VectorBackendKind};
use kbassist_ingestion::{EmbeddingPipeline, IngestionPipeline, PipelineConfig};
use kbassist_retrieval::{
    DocumentStore, EmbeddingBackend, InMemoryVectorIndex, JsonlDocumentStore,
    OpenAiEmbeddingClient, PineconeIndex, RetrievalGateway, SimilarityMetric, VectorIndex,
};

/// File under the store directory holding the local vector index
const VECTOR_SNAPSHOT_FILE: &str = "vectors.json";

/// Everything a command needs, built from one configuration
pub struct Services {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    pub assistant: AssistantService,
    embedder: Arc<dyn EmbeddingBackend>,
    local_index: Option<Arc<InMemoryVectorIndex>>,
}

impl Services {
    /// Build config -> stores -> embedder -> gateway -> chat -> orchestrator -> service
    pub async fn build(config: AppConfig) -> Result<Self> {
        info!(app = %config.app.name, backend = ?config.vector.backend, "Initializing services");

        let store: Arc<dyn DocumentStore> = Arc::new(
            JsonlDocumentStore::open(&config.store)
                .await
                .context("Failed to open document store")?,
        );

        let (index, local_index) = open_vector_index(&config).await?;

        let embedder: Arc<dyn EmbeddingBackend> = Arc::new(
            OpenAiEmbeddingClient::new(&config.openai)
                .context("Failed to create embedding client")?,
        );

        let request_timeout = TimeoutPolicy::new(config.agent.request_timeout());
        let gateway = RetrievalGateway::new(embedder.clone(), index.clone(), config.vector.dimension)
            .with_timeout(request_timeout);

        let chat = Arc::new(
            OpenAiChatClient::new(&config.openai).context("Failed to create chat client")?,
        );

        let tools = ToolExecutor::new(gateway, config.vector.namespace.clone());
        let orchestrator = AgentOrchestrator::from_config(chat, tools, &config.agent);

        let assistant = AssistantService::new(orchestrator, Arc::new(SessionMemory::new()), store.clone())
            .with_history_limit(config.agent.history_limit)
            .with_default_top_k(config.agent.default_top_k);

        Ok(Self {
            config,
            store,
            index,
            assistant,
            embedder,
            local_index,
        })
    }

    /// Ingestion pipeline writing into `namespace`, or the configured one
    pub fn ingestion_pipeline(&self, namespace: Option<&str>) -> Result<IngestionPipeline> {
        let mut pipeline_config = PipelineConfig::from_app_config(&self.config);
        if let Some(namespace) = namespace {
            pipeline_config = pipeline_config.with_namespace(namespace);
        }

        let embedder = EmbeddingPipeline::from_config(self.embedder.clone(), &self.config.ingestion)
            .context("Invalid embedding settings")?
            .with_timeout(TimeoutPolicy::new(self.config.agent.request_timeout()));

        let pipeline = IngestionPipeline::new(pipeline_config, embedder, self.index.clone(), self.store.clone())
            .context("Invalid ingestion settings")?
            .with_timeout(TimeoutPolicy::new(self.config.agent.request_timeout()));
        Ok(pipeline)
    }

    /// Flush pending writes and persist the local vector index
    pub async fn shutdown(self) -> Result<()> {
        self.store.flush().await.context("Failed to flush document store")?;

        if let Some(index) = &self.local_index {
            index
                .save(&snapshot_path(&self.config))
                .await
                .context("Failed to save vector index")?;
        }

        info!("Services shut down");
        Ok(())
    }
}

fn snapshot_path(config: &AppConfig) -> PathBuf {
    config.store.directory.join(VECTOR_SNAPSHOT_FILE)
}

async fn open_vector_index(
    config: &AppConfig,
) -> Result<(Arc<dyn VectorIndex>, Option<Arc<InMemoryVectorIndex>>)> {
    match config.vector.backend {
        VectorBackendKind::Memory => {
            let metric: SimilarityMetric = config
                .vector
                .metric
                .parse()
                .context("Invalid vector.metric")?;
            let index = Arc::new(
                InMemoryVectorIndex::load(&snapshot_path(config), metric)
                    .await
                    .context("Failed to load vector index")?,
            );
            let shared: Arc<dyn VectorIndex> = index.clone();
            Ok((shared, Some(index)))
        }
        VectorBackendKind::Pinecone => {
            let index: Arc<dyn VectorIndex> = Arc::new(
                PineconeIndex::from_config(&config.vector)
                    .context("Failed to create Pinecone client")?,
            );
            Ok((index, None))
        }
    }
}
