//! Retrieval Gateway
//!
//! Embeds a query with the same backend used at ingestion, fits the vector
//! to the index dimension and runs a namespaced top-k query. Backend
//! failures degrade to an empty result; callers never see an error.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use kbassist_core::{fit_dimension, MetadataFilter, SearchMatch, TimeoutPolicy};

use crate::backend::{EmbeddingBackend, VectorIndex};
use crate::{Result, RetrievalError};

#[derive(Clone)]
pub struct RetrievalGateway {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndex>,
    dimension: usize,
    timeout: TimeoutPolicy,
}

impl RetrievalGateway {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn VectorIndex>,
        dimension: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            dimension,
            timeout: TimeoutPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Ranked matches for `query`, best first; empty on any backend failure
    #[instrument(skip(self, filter), fields(query_len = query.len()))]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Vec<SearchMatch> {
        if top_k == 0 {
            return Vec::new();
        }

        match self.try_search(query, top_k, namespace, filter).await {
            Ok(matches) => {
                debug!(count = matches.len(), "Search complete");
                matches
            }
            Err(e) => {
                warn!(error = %e, namespace, "Search failed, returning no matches");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query: &str,
        top_k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let input = [query.to_string()];
        let vectors = self
            .timeout
            .execute("embed_query", self.embedder.embed(&input))
            .await??;

        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Backend("embedding backend returned no vector".to_string()))?;
        let vector = fit_dimension(vector, self.dimension);

        let mut matches = self
            .timeout
            .execute("vector_query", self.index.query(&vector, top_k, namespace, filter))
            .await??;

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}
