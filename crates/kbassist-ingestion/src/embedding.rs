//! Chunk Embedding
//!
//! Sends chunk texts to the embedding backend in fixed-size batches, a
//! bounded number at a time. A failing batch leaves its chunks without
//! vectors; the other batches are unaffected and output order always
//! matches input order.

use futures::stream::{self, StreamExt};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

use kbassist_core::{Chunk, IngestionConfig, TimeoutPolicy};
use kbassist_retrieval::EmbeddingBackend;

use crate::{IngestionError, Result};

/// Chunks after embedding plus the batches that failed
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOutcome {
    pub chunks: Vec<Chunk>,
    /// Index ranges into `chunks` whose batch failed
    pub failed_batches: Vec<Range<usize>>,
}

impl EmbeddingOutcome {
    pub fn embedded_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.has_embedding()).count()
    }
}

pub struct EmbeddingPipeline {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    concurrency: usize,
    timeout: TimeoutPolicy,
}

impl EmbeddingPipeline {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            batch_size: 50,
            concurrency: 4,
            timeout: TimeoutPolicy::default(),
        }
    }

    pub fn from_config(backend: Arc<dyn EmbeddingBackend>, config: &IngestionConfig) -> Result<Self> {
        Self::new(backend)
            .with_batch_size(config.embed_batch_size)?
            .with_concurrency(config.embed_concurrency)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(IngestionError::ValidationError(
                "embed_batch_size must be greater than 0".to_string(),
            ));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(IngestionError::ValidationError(
                "embed_concurrency must be greater than 0".to_string(),
            ));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Attach vectors to `chunks`, tolerating per-batch failures
    pub async fn embed_batch(&self, mut chunks: Vec<Chunk>) -> EmbeddingOutcome {
        if chunks.is_empty() {
            return EmbeddingOutcome::default();
        }

        let batches: Vec<(Range<usize>, Vec<String>)> = (0..chunks.len())
            .step_by(self.batch_size)
            .map(|start| {
                let range = start..(start + self.batch_size).min(chunks.len());
                let texts = chunks[range.clone()].iter().map(|c| c.text.clone()).collect();
                (range, texts)
            })
            .collect();
        let batch_count = batches.len();

        let results: Vec<(Range<usize>, Option<Vec<Vec<f32>>>)> = stream::iter(batches)
            .map(|(range, texts)| async move {
                let vectors = self.embed_texts(&range, &texts).await;
                (range, vectors)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut failed_batches = Vec::new();
        for (range, vectors) in results {
            match vectors {
                Some(vectors) => {
                    for (chunk, vector) in chunks[range].iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                None => failed_batches.push(range),
            }
        }

        let outcome = EmbeddingOutcome {
            chunks,
            failed_batches,
        };

        info!(
            model = self.backend.model(),
            chunks = outcome.chunks.len(),
            embedded = outcome.embedded_count(),
            batches = batch_count,
            failed_batches = outcome.failed_batches.len(),
            "Embedding complete"
        );

        outcome
    }

    async fn embed_texts(&self, range: &Range<usize>, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let result = self
            .timeout
            .execute("embed_batch", self.backend.embed(texts))
            .await;

        match result {
            Ok(Ok(vectors)) if vectors.len() == texts.len() => {
                debug!(start = range.start, end = range.end, "Embedded batch");
                Some(vectors)
            }
            Ok(Ok(vectors)) => {
                warn!(
                    start = range.start,
                    end = range.end,
                    expected = texts.len(),
                    received = vectors.len(),
                    "Embedding batch returned the wrong number of vectors"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(start = range.start, end = range.end, error = %e, "Embedding batch failed");
                None
            }
            Err(e) => {
                warn!(start = range.start, end = range.end, error = %e, "Embedding batch timed out");
                None
            }
        }
    }
}
