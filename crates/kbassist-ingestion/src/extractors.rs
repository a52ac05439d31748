//! Document Text Extractors
//!
//! Turns files on disk into raw text plus file information. Plain text and
//! markdown are decoded directly, PDF goes through `pdf-extract`, and DOCX
//! is read from the `word/document.xml` part of the archive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use kbassist_core::DocumentMetadata;

use crate::{IngestionError, Result};

/// Trait for document text extractors
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from raw file content
    async fn extract(&self, content: &[u8], filename: Option<&str>) -> Result<String>;

    /// Lowercase file extensions this extractor handles, without the dot
    fn extensions(&self) -> &'static [&'static str];

    /// Get extractor name
    fn name(&self) -> &'static str;
}

/// Plain text and markdown extractor
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_size: usize,
}

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
        }
    }

    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, content: &[u8], filename: Option<&str>) -> Result<String> {
        if content.len() > self.max_size {
            return Err(IngestionError::ExtractionFailed(format!(
                "Content too large: {} bytes (max {})",
                content.len(),
                self.max_size
            )));
        }

        let (text, encoding) = match std::str::from_utf8(content) {
            Ok(s) => (s.to_string(), "utf-8"),
            Err(_) => {
                let (decoded, actual, _) = encoding_rs::WINDOWS_1252.decode(content);
                (decoded.into_owned(), actual.name())
            }
        };

        debug!(
            filename = filename.unwrap_or("-"),
            encoding = %encoding,
            size = content.len(),
            "Extracted plain text"
        );

        Ok(text)
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "md", "markdown"]
    }

    fn name(&self) -> &'static str {
        "plain_text"
    }
}

/// PDF extractor backed by `pdf-extract`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[async_trait]
impl TextExtractor for PdfExtractor {
    async fn extract(&self, content: &[u8], filename: Option<&str>) -> Result<String> {
        let bytes = content.to_vec();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| IngestionError::ExtractionFailed(format!("PDF task failed: {}", e)))?
            .map_err(|e| IngestionError::ExtractionFailed(format!("Invalid PDF: {}", e)))?;

        debug!(filename = filename.unwrap_or("-"), chars = text.len(), "Extracted PDF text");
        Ok(text)
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

/// DOCX extractor reading paragraph text runs
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxExtractor;

impl DocxExtractor {
    fn read_document_xml(content: &[u8]) -> Result<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(content))
            .map_err(|e| IngestionError::ExtractionFailed(format!("Invalid DOCX archive: {}", e)))?;

        let mut part = archive.by_name("word/document.xml").map_err(|_| {
            IngestionError::ExtractionFailed("No word/document.xml in DOCX".to_string())
        })?;

        let mut xml = String::new();
        part.read_to_string(&mut xml)?;
        Ok(xml)
    }
}

#[async_trait]
impl TextExtractor for DocxExtractor {
    async fn extract(&self, content: &[u8], filename: Option<&str>) -> Result<String> {
        let xml = Self::read_document_xml(content)?;
        let text = docx_xml_to_text(&xml);

        debug!(filename = filename.unwrap_or("-"), chars = text.len(), "Extracted DOCX text");
        Ok(text)
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn name(&self) -> &'static str {
        "docx"
    }
}

/// Collect `<w:t>` runs, starting a new line at every `<w:p>` paragraph
pub fn docx_xml_to_text(xml: &str) -> String {
    let mut text = String::new();
    let mut in_run = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c != '<' {
            if in_run {
                text.push(c);
            }
            continue;
        }

        let tag: String = chars.by_ref().take_while(|&tc| tc != '>').collect();
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default();

        match name {
            "w:t" if !self_closing => in_run = true,
            "/w:t" => in_run = false,
            "w:p" if !text.is_empty() && !text.ends_with('\n') => text.push('\n'),
            _ => {}
        }
    }

    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Registry of text extractors keyed by file extension
pub struct ExtractorRegistry {
    extractors: HashMap<&'static str, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Create with the text, PDF and DOCX extractors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextExtractor::new()));
        registry.register(Arc::new(PdfExtractor));
        registry.register(Arc::new(DocxExtractor));
        registry
    }

    /// Register an extractor for each of its extensions, replacing earlier ones
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        for ext in extractor.extensions() {
            self.extractors.insert(ext, extractor.clone());
        }
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn TextExtractor>> {
        self.extractors.get(extension.to_lowercase().as_str()).cloned()
    }

    pub fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extractors.contains_key(ext.as_str()))
    }

    /// Supported extensions, sorted
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut exts: Vec<_> = self.extractors.keys().copied().collect();
        exts.sort_unstable();
        exts
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// File information captured at load time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_path: PathBuf,
}

impl SourceInfo {
    /// Copy the file fields into a metadata record
    pub fn apply_to(&self, metadata: &mut DocumentMetadata) {
        metadata.filename = Some(self.filename.clone());
        metadata.file_type = Some(self.file_type.clone());
        metadata.file_size = Some(self.file_size);
        metadata.file_path = Some(self.file_path.display().to_string());
    }
}

/// Raw text of a loaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub content: String,
    pub source: SourceInfo,
}

impl LoadedDocument {
    /// Build from in-memory text, for callers that do not read from disk
    pub fn from_text(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let content = content.into();
        let file_type = extension_of(Path::new(&filename))
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        Self {
            source: SourceInfo {
                file_size: content.len() as u64,
                file_path: PathBuf::from(&filename),
                filename,
                file_type,
            },
            content,
        }
    }
}

/// Loads documents from files and directories
pub struct DocumentLoader {
    registry: ExtractorRegistry,
}

impl DocumentLoader {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Load a single file; unknown extensions are rejected before any read
    pub async fn load_document(&self, path: impl AsRef<Path>) -> Result<LoadedDocument> {
        let path = path.as_ref();
        let ext = extension_of(path).unwrap_or_default();
        let extractor = self
            .registry
            .get(&ext)
            .ok_or_else(|| IngestionError::UnsupportedType(format!(".{}", ext)))?;

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let content = extractor.extract(&bytes, Some(&filename)).await?;

        debug!(
            filename = %filename,
            extractor = extractor.name(),
            bytes = bytes.len(),
            "Document loaded"
        );

        Ok(LoadedDocument {
            content,
            source: SourceInfo {
                filename,
                file_type: format!(".{}", ext),
                file_size: bytes.len() as u64,
                file_path: path.to_path_buf(),
            },
        })
    }

    /// Load every supported file under a directory in path order.
    ///
    /// Unsupported files are skipped silently; files that fail to load are
    /// skipped with a warning.
    pub async fn load_directory(
        &self,
        path: impl AsRef<Path>,
        recursive: bool,
    ) -> Result<Vec<LoadedDocument>> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(IngestionError::DirectoryNotFound(root.display().to_string()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let files: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.registry.supports(path))
            .collect();

        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            match self.load_document(&file).await {
                Ok(document) => documents.push(document),
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to load document"),
            }
        }

        info!(
            directory = %root.display(),
            documents = documents.len(),
            recursive,
            "Loaded documents from directory"
        );

        Ok(documents)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(ExtractorRegistry::with_defaults())
    }
}
