//! Document Ingestion Pipeline for kbassist
//!
//! Turns files on disk into indexed, embedded chunks:
//!
//! - Multi-format text extraction (plain text, markdown, PDF, DOCX)
//! - Text cleaning (encoding repair, URL/email stripping, whitespace)
//! - Pattern-based metadata extraction (title, dates, policy number, department)
//! - Recursive, overlap-aware chunk splitting
//! - Batched embedding that tolerates partial batch failures
//! - Vector upsert and document-store persistence with an audit trail

pub mod chunking;
pub mod cleaner;
pub mod embedding;
pub mod extractors;
pub mod metadata;
pub mod pipeline;

// Re-exports
pub use chunking::{SplitterConfig, TextSplitter};
pub use cleaner::{CleanOptions, TextCleaner};
pub use embedding::{EmbeddingOutcome, EmbeddingPipeline};
pub use extractors::{DocumentLoader, ExtractorRegistry, LoadedDocument, SourceInfo, TextExtractor};
pub use metadata::{ExtractedMetadata, MetadataExtractor};
pub use pipeline::{
    DocumentStats, IngestionPipeline, IngestionSummary, PipelineConfig, PipelineStats,
    PreparedDocument,
};

/// Error types for ingestion operations
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Core(#[from] kbassist_core::CoreError),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestionError::UnsupportedType(".xls".to_string());
        assert!(err.to_string().contains("Unsupported document type"));

        let err = IngestionError::DirectoryNotFound("/missing".to_string());
        assert_eq!(err.to_string(), "Directory not found: /missing");
    }
}
