//! Offline chunking preview
//!
//! Runs the clean, metadata and split steps on one file without touching
//! any backend, so chunk settings can be tuned before ingesting.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use kbassist_core::{AppConfig, DocumentId, DocumentMetadata};
use kbassist_ingestion::{
    CleanOptions, DocumentLoader, MetadataExtractor, SplitterConfig, TextCleaner, TextSplitter,
};

use crate::output::{self, OutputFormat};

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Serialize)]
struct ChunkPreview {
    id: String,
    chars: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct SplitReport {
    document_id: String,
    metadata: DocumentMetadata,
    original_chars: usize,
    cleaned_chars: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    chunks: Vec<ChunkPreview>,
}

pub async fn run(
    config: &AppConfig,
    file: &Path,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut splitter_config = SplitterConfig::from(&config.ingestion);
    if let Some(size) = chunk_size {
        splitter_config = splitter_config.with_chunk_size(size);
    }
    if let Some(overlap) = chunk_overlap {
        splitter_config = splitter_config.with_overlap(overlap);
    }
    let splitter = TextSplitter::new(splitter_config).context("Invalid chunk settings")?;

    let document = DocumentLoader::default()
        .load_document(file)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let cleaner = TextCleaner::new(CleanOptions {
        remove_urls: config.ingestion.remove_urls,
        remove_emails: config.ingestion.remove_emails,
        fix_encoding: config.ingestion.fix_encoding,
    });
    let cleaned = cleaner.clean(&document.content);

    let mut metadata = DocumentMetadata::default();
    document.source.apply_to(&mut metadata);
    MetadataExtractor::new()
        .extract_all(&cleaned, Some(&document.source.filename))
        .apply_to(&mut metadata);

    let document_id = DocumentId::new();
    let chunks = splitter.split_document(&document_id, &cleaned, &metadata);

    let report = SplitReport {
        document_id: document_id.to_string(),
        metadata,
        original_chars: document.content.chars().count(),
        cleaned_chars: cleaned.chars().count(),
        chunk_size: splitter.config().chunk_size,
        chunk_overlap: splitter.config().chunk_overlap,
        chunks: chunks
            .into_iter()
            .map(|chunk| ChunkPreview {
                chars: chunk.char_count(),
                id: chunk.id,
                text: chunk.text,
            })
            .collect(),
    };

    match output::format_structured(&report, format)? {
        Some(rendered) => println!("{}", rendered),
        None => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &SplitReport) {
    let metadata = &report.metadata;

    output::section(&metadata.title);
    output::key_value("File", metadata.display_filename());
    if let Some(size) = metadata.file_size {
        output::key_value("Size", &output::format_size(size));
    }
    output::key_value("Type", metadata.document_type.as_str());
    if let Some(number) = &metadata.policy_number {
        output::key_value("Policy number", number);
    }
    if let Some(department) = &metadata.department {
        output::key_value("Department", department);
    }
    if let Some(date) = &metadata.effective_date {
        output::key_value("Effective", date);
    }
    output::key_value(
        "Characters",
        &format!("{} -> {} after cleaning", report.original_chars, report.cleaned_chars),
    );

    output::section(&format!(
        "{} chunk(s), size {} overlap {}",
        report.chunks.len(),
        report.chunk_size,
        report.chunk_overlap
    ));
    for (i, chunk) in report.chunks.iter().enumerate() {
        output::list_item(i + 1, &format!("{} ({} chars)", chunk.id, chunk.chars));
        output::dimmed(&format!("     {}", output::truncate(&chunk.text.replace('\n', " "), PREVIEW_CHARS)));
    }
}
