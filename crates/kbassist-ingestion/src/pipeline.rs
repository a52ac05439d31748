//! Document Ingestion Pipeline
//!
//! Runs loaded documents through clean → extract → split → embed, then
//! persists chunk records to the document store and upserts vectors to the
//! index. Store and index failures are logged, audited and counted; they
//! never abort the run.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use kbassist_core::{
    AppConfig, AuditEvent, AuditLevel, Chunk, DocumentId, DocumentMetadata, StoredChunk,
    TimeoutPolicy, VectorRecord,
};
use kbassist_retrieval::{DocumentStore, VectorIndex};

use crate::chunking::{SplitterConfig, TextSplitter};
use crate::cleaner::{CleanOptions, TextCleaner};
use crate::embedding::EmbeddingPipeline;
use crate::extractors::{DocumentLoader, LoadedDocument};
use crate::metadata::MetadataExtractor;
use crate::{IngestionError, Result};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Vector index namespace receiving the chunks
    pub namespace: String,
    /// Index dimension; longer embeddings are truncated to it
    pub dimension: usize,
    pub upsert_batch_size: usize,
    pub clean: CleanOptions,
    pub splitter: SplitterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: "hr_policies".to_string(),
            dimension: 1536,
            upsert_batch_size: 100,
            clean: CleanOptions::default(),
            splitter: SplitterConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            namespace: config.vector.namespace.clone(),
            dimension: config.vector.dimension,
            upsert_batch_size: config.ingestion.upsert_batch_size,
            clean: CleanOptions {
                remove_urls: config.ingestion.remove_urls,
                remove_emails: config.ingestion.remove_emails,
                fix_encoding: config.ingestion.fix_encoding,
            },
            splitter: SplitterConfig::from(&config.ingestion),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_splitter(mut self, splitter: SplitterConfig) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(IngestionError::ValidationError("namespace must not be empty".to_string()));
        }
        if self.dimension == 0 {
            return Err(IngestionError::ValidationError(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if self.upsert_batch_size == 0 {
            return Err(IngestionError::ValidationError(
                "upsert_batch_size must be greater than 0".to_string(),
            ));
        }
        self.splitter.validate()
    }
}

/// A document after cleaning, metadata extraction and splitting
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub document_id: DocumentId,
    pub metadata: DocumentMetadata,
    pub cleaned_text: String,
    pub chunks: Vec<Chunk>,
}

/// Per-document figures reported in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub document_id: String,
    pub filename: String,
    pub title: String,
    pub chunks: usize,
    pub characters: usize,
}

/// Result of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub namespace: String,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub chunks_with_embeddings: usize,
    pub vectors_upserted: usize,
    pub chunks_stored: usize,
    /// Embedding batches that failed
    pub failed_batches: usize,
    /// Upsert batches that failed
    pub failed_upserts: usize,
    pub documents: Vec<DocumentStats>,
    pub duration_ms: u64,
}

/// Running totals across ingestion runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub runs: u64,
    pub documents_processed: u64,
    pub chunks_created: u64,
    pub embeddings_created: u64,
    pub vectors_upserted: u64,
    pub embedding_failures: u64,
    pub upsert_failures: u64,
    pub total_processing_time_ms: u64,
}

/// Document ingestion pipeline
pub struct IngestionPipeline {
    config: PipelineConfig,
    loader: DocumentLoader,
    cleaner: TextCleaner,
    extractor: MetadataExtractor,
    splitter: TextSplitter,
    embedder: EmbeddingPipeline,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    timeout: TimeoutPolicy,
    stats: Arc<RwLock<PipelineStats>>,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        embedder: EmbeddingPipeline,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            loader: DocumentLoader::default(),
            cleaner: TextCleaner::new(config.clean),
            extractor: MetadataExtractor::new(),
            splitter: TextSplitter::new(config.splitter.clone())?,
            embedder,
            index,
            store,
            timeout: TimeoutPolicy::default(),
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            config,
        })
    }

    pub fn with_loader(mut self, loader: DocumentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    pub async fn stats(&self) -> PipelineStats {
        self.stats.read().await.clone()
    }

    /// Clean, extract metadata and split one document. No I/O.
    pub fn prepare_document(&self, document: &LoadedDocument, document_id: DocumentId) -> PreparedDocument {
        let cleaned_text = self.cleaner.clean(&document.content);

        let mut metadata = DocumentMetadata::default();
        document.source.apply_to(&mut metadata);
        self.extractor
            .extract_all(&cleaned_text, Some(&document.source.filename))
            .apply_to(&mut metadata);

        let chunks = self.splitter.split_document(&document_id, &cleaned_text, &metadata);

        PreparedDocument {
            document_id,
            metadata,
            cleaned_text,
            chunks,
        }
    }

    /// Load and ingest every supported file under `path`
    pub async fn ingest_directory(&self, path: impl AsRef<Path>, recursive: bool) -> Result<IngestionSummary> {
        let documents = self.loader.load_directory(path, recursive).await?;
        Ok(self.ingest_documents(documents).await)
    }

    /// Load and ingest a single file
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestionSummary> {
        let document = self.loader.load_document(path).await?;
        Ok(self.ingest_documents(vec![document]).await)
    }

    /// Ingest already-loaded documents
    #[instrument(skip(self, documents), fields(namespace = %self.config.namespace, documents = documents.len()))]
    pub async fn ingest_documents(&self, documents: Vec<LoadedDocument>) -> IngestionSummary {
        let start = Instant::now();
        let mut summary = IngestionSummary {
            namespace: self.config.namespace.clone(),
            total_documents: documents.len(),
            ..Default::default()
        };

        self.audit(
            AuditEvent::info(
                "ingestion_started",
                format!("Starting ingestion of {} document(s)", documents.len()),
            )
            .with_metadata(json!({ "namespace": self.config.namespace })),
        )
        .await;

        let mut chunks = Vec::new();
        for document in &documents {
            let prepared = self.prepare_document(document, DocumentId::new());

            info!(
                document_id = %prepared.document_id,
                filename = %document.source.filename,
                chunk_count = prepared.chunks.len(),
                "Document processed"
            );
            self.audit(
                AuditEvent::info(
                    "document_processed",
                    format!("Processed {}", document.source.filename),
                )
                .with_metadata(json!({
                    "document_id": prepared.document_id.as_str(),
                    "filename": document.source.filename,
                    "title": prepared.metadata.title,
                    "document_type": prepared.metadata.document_type,
                    "chunks": prepared.chunks.len(),
                })),
            )
            .await;

            summary.documents.push(DocumentStats {
                document_id: prepared.document_id.to_string(),
                filename: document.source.filename.clone(),
                title: prepared.metadata.title.clone(),
                chunks: prepared.chunks.len(),
                characters: prepared.cleaned_text.chars().count(),
            });
            chunks.extend(prepared.chunks);
        }
        summary.total_chunks = chunks.len();

        let outcome = self.embedder.embed_batch(chunks).await;
        summary.chunks_with_embeddings = outcome.embedded_count();
        summary.failed_batches = outcome.failed_batches.len();

        if !outcome.failed_batches.is_empty() {
            let ranges: Vec<String> = outcome
                .failed_batches
                .iter()
                .map(|r| format!("{}..{}", r.start, r.end))
                .collect();
            self.audit(
                AuditEvent::new(
                    "embedding_failed",
                    format!("{} embedding batch(es) failed", ranges.len()),
                    AuditLevel::Warning,
                )
                .with_metadata(json!({ "ranges": ranges })),
            )
            .await;
        }

        summary.chunks_stored = self.store_chunks(&outcome.chunks).await;

        let records: Vec<VectorRecord> = outcome
            .chunks
            .iter()
            .filter_map(|chunk| VectorRecord::from_chunk(chunk, self.config.dimension))
            .collect();
        let (upserted, failed_upserts) = self.upsert_records(records).await;
        summary.vectors_upserted = upserted;
        summary.failed_upserts = failed_upserts;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.write().await;
            stats.runs += 1;
            stats.documents_processed += summary.total_documents as u64;
            stats.chunks_created += summary.total_chunks as u64;
            stats.embeddings_created += summary.chunks_with_embeddings as u64;
            stats.vectors_upserted += summary.vectors_upserted as u64;
            stats.embedding_failures += summary.failed_batches as u64;
            stats.upsert_failures += summary.failed_upserts as u64;
            stats.total_processing_time_ms += summary.duration_ms;
        }

        self.audit(
            AuditEvent::new(
                "ingestion_complete",
                format!(
                    "Ingested {} document(s) into {} chunk(s)",
                    summary.total_documents, summary.total_chunks
                ),
                AuditLevel::Success,
            )
            .with_metadata(json!({
                "namespace": summary.namespace,
                "total_documents": summary.total_documents,
                "total_chunks": summary.total_chunks,
                "chunks_with_embeddings": summary.chunks_with_embeddings,
                "vectors_upserted": summary.vectors_upserted,
                "chunks_stored": summary.chunks_stored,
                "failed_batches": summary.failed_batches,
                "failed_upserts": summary.failed_upserts,
                "duration_ms": summary.duration_ms,
            })),
        )
        .await;

        info!(
            total_documents = summary.total_documents,
            total_chunks = summary.total_chunks,
            vectors_upserted = summary.vectors_upserted,
            failed_batches = summary.failed_batches,
            duration_ms = summary.duration_ms,
            "Ingestion complete"
        );

        summary
    }

    async fn store_chunks(&self, chunks: &[Chunk]) -> usize {
        if chunks.is_empty() {
            return 0;
        }

        let records = chunks.iter().map(StoredChunk::from_chunk).collect();
        match self
            .timeout
            .execute("store_chunks", self.store.insert_many(records))
            .await
        {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to store chunks");
                0
            }
            Err(e) => {
                warn!(error = %e, "Storing chunks timed out");
                0
            }
        }
    }

    /// Upsert in batches; returns (records upserted, failed batches)
    async fn upsert_records(&self, records: Vec<VectorRecord>) -> (usize, usize) {
        let mut upserted = 0;
        let mut failed = 0;

        for (batch_index, batch) in records.chunks(self.config.upsert_batch_size).enumerate() {
            let result = self
                .timeout
                .execute(
                    "vector_upsert",
                    self.index.upsert(batch.to_vec(), &self.config.namespace),
                )
                .await;

            let error = match result {
                Ok(Ok(count)) => {
                    upserted += count;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            failed += 1;
            warn!(batch = batch_index, size = batch.len(), error = %error, "Vector upsert failed");
            self.audit(
                AuditEvent::new(
                    "upsert_failed",
                    format!("Upsert batch {} failed", batch_index),
                    AuditLevel::Error,
                )
                .with_metadata(json!({ "batch": batch_index, "size": batch.len(), "error": error })),
            )
            .await;
        }

        (upserted, failed)
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.store.log_event(event).await {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}
