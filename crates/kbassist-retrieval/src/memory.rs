//! In-memory backends
//!
//! A namespaced vector index and a document store held behind short
//! `tokio::sync::RwLock` sections. Used for local runs and tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use kbassist_core::{
    AuditEvent, DeleteTarget, MetadataFilter, SearchMatch, StoredChunk, VectorRecord,
};

use crate::backend::{DocumentStore, VectorIndex};
use crate::similarity::SimilarityMetric;
use crate::Result;

/// Records of one namespace in insertion order, with an id lookup
#[derive(Debug, Default)]
struct NamespaceRecords {
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

impl NamespaceRecords {
    fn from_records(records: Vec<VectorRecord>) -> Self {
        let mut namespace = Self::default();
        for record in records {
            namespace.upsert(record);
        }
        namespace
    }

    /// Replace in place when the id exists, append otherwise
    fn upsert(&mut self, record: VectorRecord) {
        match self.positions.get(&record.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.positions.get(id).and_then(|&position| self.records.get(position))
    }

    fn remove_ids(&mut self, ids: &HashSet<&str>) {
        self.records.retain(|record| !ids.contains(record.id.as_str()));
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();
    }
}

/// Vector index keeping records in insertion order per namespace
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    metric: SimilarityMetric,
    namespaces: RwLock<HashMap<String, NamespaceRecords>>,
}

impl InMemoryVectorIndex {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, |ns| ns.records.len())
    }

    pub async fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace).await == 0
    }

    pub async fn get(&self, namespace: &str, id: &str) -> Option<VectorRecord> {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(id).cloned())
    }

    /// Copy of every namespace and its records
    pub async fn snapshot(&self) -> HashMap<String, Vec<VectorRecord>> {
        self.namespaces
            .read()
            .await
            .iter()
            .map(|(name, ns)| (name.clone(), ns.records.clone()))
            .collect()
    }

    /// Replace the whole index contents with `namespaces`
    pub async fn restore(&self, namespaces: HashMap<String, Vec<VectorRecord>>) {
        *self.namespaces.write().await = namespaces
            .into_iter()
            .map(|(name, records)| (name, NamespaceRecords::from_records(records)))
            .collect();
    }

    /// Write the index to `path` as a single JSON document
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec(&snapshot)?).await?;

        let vectors: usize = snapshot.values().map(Vec::len).sum();
        info!(path = %path.display(), namespaces = snapshot.len(), vectors, "Saved vector snapshot");
        Ok(())
    }

    /// Load an index previously written by [`save`](Self::save); a missing
    /// file yields an empty index
    pub async fn load(path: &Path, metric: SimilarityMetric) -> Result<Self> {
        let index = Self::new(metric);
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                index.restore(serde_json::from_slice(&bytes)?).await;
                debug!(path = %path.display(), "Restored vector snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(index)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        let count = records.len();
        let mut namespaces = self.namespaces.write().await;
        let stored = namespaces.entry(namespace.to_string()).or_default();

        for record in records {
            stored.upsert(record);
        }

        debug!(namespace, count, total = stored.records.len(), "Upserted vectors");
        Ok(count)
    }

    async fn query<'a>(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&'a MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(stored) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<SearchMatch> = stored
            .records
            .iter()
            .filter(|record| filter.map_or(true, |f| f.matches(&record.metadata)))
            .map(|record| SearchMatch {
                id: record.id.clone(),
                score: self.metric.calculate(vector, &record.values),
                text: record.metadata.text.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();

        // stable: equal scores keep insertion order
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, target: DeleteTarget, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        match target {
            DeleteTarget::Namespace => {
                namespaces.remove(namespace);
            }
            DeleteTarget::Ids(ids) => {
                if let Some(stored) = namespaces.get_mut(namespace) {
                    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
                    stored.remove_ids(&ids);
                }
            }
        }
        Ok(())
    }
}

/// Document store that keeps everything in memory
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    chunks: RwLock<Vec<StoredChunk>>,
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunks(&self) -> Vec<StoredChunk> {
        self.chunks.read().await.clone()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert_many(&self, chunks: Vec<StoredChunk>) -> Result<usize> {
        let count = chunks.len();
        self.chunks.write().await.extend(chunks);
        Ok(count)
    }

    async fn log_event(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbassist_core::{DocumentType, VectorMetadata};
    use pretty_assertions::assert_eq;

    fn record(id: &str, values: Vec<f32>, filename: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: VectorMetadata {
                document_id: "doc_0123456789ab".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                text: format!("text of {}", id),
                filename: filename.to_string(),
                title: "Title".to_string(),
                document_type: DocumentType::Policy,
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_score() {
        let index = InMemoryVectorIndex::default();
        index
            .upsert(
                vec![
                    record("far", vec![0.0, 1.0], "a.md"),
                    record("near", vec![1.0, 0.1], "b.md"),
                    record("mid", vec![1.0, 1.0], "c.md"),
                ],
                "ns",
            )
            .await
            .unwrap();

        let matches = index.query(&[1.0, 0.0], 2, "ns", None).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(matches[0].text, "text of near");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = InMemoryVectorIndex::default();
        index
            .upsert(
                vec![
                    record("first", vec![1.0, 0.0], "a.md"),
                    record("second", vec![2.0, 0.0], "a.md"),
                    record("third", vec![3.0, 0.0], "a.md"),
                ],
                "ns",
            )
            .await
            .unwrap();

        let matches = index.query(&[1.0, 0.0], 10, "ns", None).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryVectorIndex::default();
        index.upsert(vec![record("a", vec![1.0], "old.md")], "ns").await.unwrap();
        index.upsert(vec![record("a", vec![1.0], "new.md")], "ns").await.unwrap();

        assert_eq!(index.len("ns").await, 1);
        assert_eq!(index.get("ns", "a").await.unwrap().metadata.filename, "new.md");
    }

    #[tokio::test]
    async fn test_replacement_keeps_position() {
        let index = InMemoryVectorIndex::default();
        let batch: Vec<_> = (0..200)
            .map(|i| record(&format!("c{}", i), vec![1.0, 0.0], "a.md"))
            .collect();
        index.upsert(batch, "ns").await.unwrap();

        index
            .upsert(
                vec![record("c0", vec![1.0, 0.0], "b.md"), record("c200", vec![1.0, 0.0], "b.md")],
                "ns",
            )
            .await
            .unwrap();

        assert_eq!(index.len("ns").await, 201);
        let matches = index.query(&[1.0, 0.0], 201, "ns", None).await.unwrap();
        assert_eq!(matches[0].id, "c0");
        assert_eq!(matches[0].metadata.filename, "b.md");
        assert_eq!(matches[200].id, "c200");
    }

    #[tokio::test]
    async fn test_lookup_after_delete() {
        let index = InMemoryVectorIndex::default();
        index
            .upsert(
                vec![
                    record("a", vec![1.0], "x"),
                    record("b", vec![1.0], "x"),
                    record("c", vec![1.0], "x"),
                ],
                "hr",
            )
            .await
            .unwrap();
        index.delete(DeleteTarget::Ids(vec!["a".to_string()]), "hr").await.unwrap();

        assert!(index.get("hr", "a").await.is_none());
        assert_eq!(index.get("hr", "c").await.unwrap().id, "c");

        index.upsert(vec![record("b", vec![1.0], "y")], "hr").await.unwrap();
        assert_eq!(index.len("hr").await, 2);
        assert_eq!(index.get("hr", "b").await.unwrap().metadata.filename, "y");
        assert_eq!(index.get("hr", "c").await.unwrap().metadata.filename, "x");
    }

    #[tokio::test]
    async fn test_namespaces_and_filter() {
        let index = InMemoryVectorIndex::default();
        index
            .upsert(
                vec![record("a", vec![1.0], "leave.md"), record("b", vec![1.0], "travel.md")],
                "hr",
            )
            .await
            .unwrap();

        assert!(index.query(&[1.0], 5, "other", None).await.unwrap().is_empty());

        let filter = MetadataFilter::new().with_filename("travel.md");
        let matches = index.query(&[1.0], 5, "hr", Some(&filter)).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b");
    }

    #[tokio::test]
    async fn test_delete() {
        let index = InMemoryVectorIndex::default();
        index
            .upsert(vec![record("a", vec![1.0], "x"), record("b", vec![1.0], "x")], "hr")
            .await
            .unwrap();

        index.delete(DeleteTarget::Ids(vec!["a".to_string()]), "hr").await.unwrap();
        assert_eq!(index.len("hr").await, 1);

        index.delete(DeleteTarget::Namespace, "hr").await.unwrap();
        assert!(index.is_empty("hr").await);
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vectors.json");

        let index = InMemoryVectorIndex::default();
        index
            .upsert(vec![record("a", vec![1.0, 0.0], "leave.md")], "hr")
            .await
            .unwrap();
        index.save(&path).await.unwrap();

        let restored = InMemoryVectorIndex::load(&path, SimilarityMetric::Cosine).await.unwrap();
        assert_eq!(restored.len("hr").await, 1);
        assert_eq!(restored.get("hr", "a").await, index.get("hr", "a").await);

        let empty = InMemoryVectorIndex::load(&dir.path().join("missing.json"), SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert!(empty.is_empty("hr").await);
    }

    #[tokio::test]
    async fn test_document_store() {
        let store = InMemoryDocumentStore::new();
        store.log_event(AuditEvent::info("ingestion_started", "start")).await.unwrap();
        store.log_event(AuditEvent::info("document_processed", "one")).await.unwrap();

        assert_eq!(store.events().await.len(), 2);
        assert_eq!(store.events_of_type("document_processed").await.len(), 1);
        assert_eq!(store.insert_many(Vec::new()).await.unwrap(), 0);
        store.flush().await.unwrap();
    }
}
