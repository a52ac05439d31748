//! Backend interfaces
//!
//! Everything the ingestion pipeline and the agent need from the outside
//! world goes through these three traits.

use async_trait::async_trait;

use kbassist_core::{AuditEvent, DeleteTarget, MetadataFilter, SearchMatch, StoredChunk, VectorRecord};

use crate::Result;

/// Text embedding backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// One vector per input, in input order. Fails or succeeds as a unit.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Namespaced vector similarity index
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by id; returns the number written
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize>;

    /// Top-k nearest records, best first
    async fn query<'a>(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&'a MetadataFilter>,
    ) -> Result<Vec<SearchMatch>>;

    async fn delete(&self, target: DeleteTarget, namespace: &str) -> Result<()>;
}

/// Chunk and audit-event persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store chunk records; returns the number written
    async fn insert_many(&self, chunks: Vec<StoredChunk>) -> Result<usize>;

    async fn log_event(&self, event: AuditEvent) -> Result<()>;

    /// Push buffered writes to durable storage
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
