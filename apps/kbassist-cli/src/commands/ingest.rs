//! Directory ingestion command

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use kbassist_ingestion::IngestionSummary;

use crate::app::Services;
use crate::output::{self, OutputFormat};

pub async fn run(
    services: &Services,
    directory: &Path,
    namespace: Option<&str>,
    recursive: bool,
    format: OutputFormat,
) -> Result<()> {
    let pipeline = services.ingestion_pipeline(namespace)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    spinner.set_message(format!("Ingesting {}...", directory.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = pipeline.ingest_directory(directory, recursive).await;
    spinner.finish_and_clear();

    let summary =
        result.with_context(|| format!("Failed to ingest {}", directory.display()))?;

    match output::format_structured(&summary, format)? {
        Some(rendered) => println!("{}", rendered),
        None => print_summary(&summary),
    }

    Ok(())
}

fn print_summary(summary: &IngestionSummary) {
    if summary.total_documents == 0 {
        output::warning("No supported documents found");
        return;
    }

    output::success(&format!(
        "Ingested {} document(s) into '{}' in {}",
        summary.total_documents,
        summary.namespace,
        output::format_duration(summary.duration_ms)
    ));

    output::key_value("Chunks", &summary.total_chunks.to_string());
    output::key_value(
        "Embedded",
        &format!("{}/{}", summary.chunks_with_embeddings, summary.total_chunks),
    );
    output::key_value("Vectors upserted", &summary.vectors_upserted.to_string());
    output::key_value("Chunks stored", &summary.chunks_stored.to_string());

    if summary.failed_batches > 0 || summary.failed_upserts > 0 {
        output::warning(&format!(
            "{} embedding batch(es) and {} upsert batch(es) failed",
            summary.failed_batches, summary.failed_upserts
        ));
    }

    output::section("Documents");
    for (i, doc) in summary.documents.iter().enumerate() {
        output::list_item(
            i + 1,
            &format!("{} ({}, {} chunks) [{}]", doc.title, doc.filename, doc.chunks, doc.document_id),
        );
    }
}
