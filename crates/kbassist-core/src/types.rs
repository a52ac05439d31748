use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, Result};

const DOCUMENT_ID_PREFIX: &str = "doc_";
const DOCUMENT_ID_HEX_LEN: usize = 12;

// Identifiers

/// Document identifier of the form `doc_<12 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh identifier from a random UUID
    pub fn new() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{}",
            DOCUMENT_ID_PREFIX,
            &hex[..DOCUMENT_ID_HEX_LEN]
        ))
    }

    /// Parse an existing identifier, rejecting anything that is not `doc_<12 hex>`
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = value
            .strip_prefix(DOCUMENT_ID_PREFIX)
            .map(|hex| {
                hex.len() == DOCUMENT_ID_HEX_LEN
                    && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
            })
            .unwrap_or(false);

        if valid {
            Ok(Self(value))
        } else {
            Err(CoreError::validation(format!(
                "invalid document id '{}': expected doc_<12 hex chars>",
                value
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the chunk at `index` within this document
    pub fn chunk_id(&self, index: usize) -> String {
        chunk_id(&self.0, index)
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chunk identifier: `<document_id>_chunk_<index>`
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", document_id, index)
}

// Document metadata

/// Coarse document classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Policy,
    Procedure,
    Guideline,
    Handbook,
    #[default]
    Document,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Policy => "policy",
            DocumentType::Procedure => "procedure",
            DocumentType::Guideline => "guideline",
            DocumentType::Handbook => "handbook",
            DocumentType::Document => "document",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "policy" => Ok(DocumentType::Policy),
            "procedure" => Ok(DocumentType::Procedure),
            "guideline" => Ok(DocumentType::Guideline),
            "handbook" => Ok(DocumentType::Handbook),
            "document" => Ok(DocumentType::Document),
            other => Err(CoreError::validation(format!(
                "unknown document type: {}",
                other
            ))),
        }
    }
}

/// Metadata attached to every chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Extracted title, falling back to the filename or "Untitled"
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Lowercased extension including the dot, e.g. `.md`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub document_type: DocumentType,
    pub extracted_at: DateTime<Utc>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            filename: None,
            file_type: None,
            file_size: None,
            file_path: None,
            policy_number: None,
            department: None,
            effective_date: None,
            revision_date: None,
            expiry_date: None,
            document_type: DocumentType::Document,
            extracted_at: Utc::now(),
        }
    }
}

impl DocumentMetadata {
    /// Filename for display and citation, "Unknown" when absent
    pub fn display_filename(&self) -> &str {
        self.filename.as_deref().unwrap_or("Unknown")
    }
}

// Chunks and vectors

/// A bounded slice of a document's cleaned text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `<document_id>_chunk_<index>`
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    /// Fixed at split time, identical across the document's chunks
    pub total_chunks: usize,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Absent when the embedding batch containing this chunk failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Truncate `vector` to `dimension`; longer vectors lose their tail without renormalization.
pub fn fit_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() > dimension {
        warn!(
            original_dimension = vector.len(),
            target_dimension = dimension,
            "Truncating embedding to index dimension"
        );
        vector.truncate(dimension);
    } else if vector.len() < dimension {
        warn!(
            original_dimension = vector.len(),
            target_dimension = dimension,
            "Embedding is shorter than the index dimension"
        );
    }
    vector
}

/// A chunk's vector fitted to the index dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
}

impl EmbeddingRecord {
    pub fn fit(chunk_id: impl Into<String>, vector: Vec<f32>, dimension: usize) -> Self {
        let vector = fit_dimension(vector, dimension);
        Self {
            chunk_id: chunk_id.into(),
            dimension: vector.len(),
            vector,
        }
    }
}

fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    // hosted indexes hand numeric metadata back as floats
    let value = f64::deserialize(deserializer)?;
    Ok(value.max(0.0) as usize)
}

/// Metadata stored alongside each vector in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub document_id: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub chunk_index: usize,
    #[serde(deserialize_with = "deserialize_count")]
    pub total_chunks: usize,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub document_type: DocumentType,
}

impl VectorMetadata {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            text: chunk.text.clone(),
            filename: chunk.metadata.display_filename().to_string(),
            title: chunk.metadata.title.clone(),
            document_type: chunk.metadata.document_type,
        }
    }
}

/// Index payload: `{id, values, metadata}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl VectorRecord {
    /// Build the index payload for a chunk; `None` when the chunk has no embedding
    pub fn from_chunk(chunk: &Chunk, dimension: usize) -> Option<Self> {
        let embedding = chunk.embedding.clone()?;
        let record = EmbeddingRecord::fit(chunk.id.clone(), embedding, dimension);
        Some(Self {
            id: record.chunk_id,
            values: record.vector,
            metadata: VectorMetadata::from_chunk(chunk),
        })
    }
}

/// A normalized similarity-search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// Equality constraints applied to vector metadata during a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = Some(document_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.filename.is_none() && self.document_type.is_none()
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        self.document_id
            .as_ref()
            .map_or(true, |id| *id == metadata.document_id)
            && self
                .filename
                .as_ref()
                .map_or(true, |name| *name == metadata.filename)
            && self
                .document_type
                .map_or(true, |kind| kind == metadata.document_type)
    }

    /// Render as a `{"field": {"$eq": value}}` filter document
    pub fn to_query_document(&self) -> serde_json::Value {
        let mut filter = serde_json::Map::new();
        if let Some(id) = &self.document_id {
            filter.insert("document_id".into(), serde_json::json!({ "$eq": id }));
        }
        if let Some(name) = &self.filename {
            filter.insert("filename".into(), serde_json::json!({ "$eq": name }));
        }
        if let Some(kind) = self.document_type {
            filter.insert(
                "document_type".into(),
                serde_json::json!({ "$eq": kind.as_str() }),
            );
        }
        serde_json::Value::Object(filter)
    }
}

/// What a vector delete should remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Ids(Vec<String>),
    Namespace,
}

// Conversations

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{role, content}` entry of a conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// Agent trace

/// A tool invocation made during an agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// 1-based planning cycle that requested the call
    pub iteration: u32,
}

/// Terminal state of an agent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Answered,
    Exhausted,
    Failed,
    Cancelled,
}

/// Structured record of one agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub query: String,
    pub plan_summary: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: u32,
    pub answer: String,
    pub outcome: AgentOutcome,
}

/// A document cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub filename: String,
    pub title: String,
    pub score: f32,
}

impl From<&SearchMatch> for Source {
    fn from(hit: &SearchMatch) -> Self {
        Self {
            chunk_id: hit.id.clone(),
            filename: hit.metadata.filename.clone(),
            title: hit.metadata.title.clone(),
            score: hit.score,
        }
    }
}

// Document store records

/// Chunk record persisted to the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub has_embedding: bool,
    pub ingested_at: DateTime<Utc>,
}

impl StoredChunk {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            has_embedding: chunk.has_embedding(),
            ingested_at: Utc::now(),
        }
    }
}

/// Severity of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Audit-trail entry written to the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub message: String,
    pub level: AuditLevel,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>, level: AuditLevel) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.into(),
            level,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
        }
    }

    pub fn info(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(event_type, message, AuditLevel::Info)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
