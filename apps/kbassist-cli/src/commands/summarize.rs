//! Document summary command

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use kbassist_agent::{Audience, OpenAiChatClient, Summarizer, SummaryStyle};
use kbassist_core::{AppConfig, TimeoutPolicy};
use kbassist_ingestion::{CleanOptions, DocumentLoader, TextCleaner};

use crate::output::{self, OutputFormat};

/// What to produce for the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Style(SummaryStyle),
    Audience(Audience),
    KeyPoints,
}

impl SummaryKind {
    fn label(&self) -> String {
        match self {
            SummaryKind::Style(style) => format!("{} summary", style),
            SummaryKind::Audience(audience) => format!("summary for {}", audience),
            SummaryKind::KeyPoints => "key points".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryReport {
    filename: String,
    kind: String,
    summary: String,
}

pub async fn run(config: &AppConfig, file: &Path, kind: SummaryKind, format: OutputFormat) -> Result<()> {
    let document = DocumentLoader::default()
        .load_document(file)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let cleaner = TextCleaner::new(CleanOptions {
        remove_urls: config.ingestion.remove_urls,
        remove_emails: config.ingestion.remove_emails,
        fix_encoding: config.ingestion.fix_encoding,
    });
    let text = cleaner.clean(&document.content);

    let chat = OpenAiChatClient::new(&config.openai).context("Failed to create chat client")?;
    let summarizer =
        Summarizer::new(Arc::new(chat)).with_timeout(TimeoutPolicy::new(config.agent.request_timeout()));

    let summary = match kind {
        SummaryKind::Style(style) => summarizer.summarize_document(&text, style).await,
        SummaryKind::Audience(audience) => summarizer.summarize_for_audience(&text, audience).await,
        SummaryKind::KeyPoints => summarizer.extract_key_points(&text).await,
    }
    .with_context(|| format!("Failed to summarize {}", document.source.filename))?;

    let report = SummaryReport {
        filename: document.source.filename.clone(),
        kind: kind.label(),
        summary,
    };

    match output::format_structured(&report, format)? {
        Some(rendered) => println!("{}", rendered),
        None => {
            output::section(&format!("{} ({})", report.filename, report.kind));
            println!("{}", report.summary);
        }
    }

    Ok(())
}
