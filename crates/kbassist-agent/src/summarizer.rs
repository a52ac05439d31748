//! Document summaries
//!
//! One-shot summarization over the chat backend, outside the agent loop and
//! its tool set. Each request is a single system + user exchange with no
//! tools declared. Input longer than [`MAX_INPUT_CHARS`] is cut at a
//! character boundary before it is sent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use kbassist_core::TimeoutPolicy;

use crate::chat::{ChatBackend, ChatMessage};
use crate::prompts::{
    audience_summary_prompt, BRIEF_SUMMARY_TEMPLATE, COMPREHENSIVE_SUMMARY_TEMPLATE,
    EXECUTIVE_SUMMARY_TEMPLATE, HR_SYSTEM_PROMPT, KEY_POINTS_TEMPLATE,
};
use crate::{AgentError, Result};

/// Characters of document text sent with one request
pub const MAX_INPUT_CHARS: usize = 4000;

/// Shape of a document summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    /// Two or three sentences
    Brief,
    /// Every major point, policy and requirement
    #[default]
    Comprehensive,
    /// Decisions and action items
    Executive,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStyle::Brief => "brief",
            SummaryStyle::Comprehensive => "comprehensive",
            SummaryStyle::Executive => "executive",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            SummaryStyle::Brief => BRIEF_SUMMARY_TEMPLATE,
            SummaryStyle::Comprehensive => COMPREHENSIVE_SUMMARY_TEMPLATE,
            SummaryStyle::Executive => EXECUTIVE_SUMMARY_TEMPLATE,
        }
    }
}

impl fmt::Display for SummaryStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryStyle {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "brief" => Ok(SummaryStyle::Brief),
            "comprehensive" | "detailed" => Ok(SummaryStyle::Comprehensive),
            "executive" => Ok(SummaryStyle::Executive),
            other => Err(AgentError::InvalidRequest(format!("Unknown summary style: {}", other))),
        }
    }
}

/// Reader a tailored summary is written for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    Employee,
    Manager,
    Executive,
    NewHire,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Employee => "employee",
            Audience::Manager => "manager",
            Audience::Executive => "executive",
            Audience::NewHire => "new_hire",
        }
    }

    /// Phrase used inside the prompt
    fn describe(&self) -> &'static str {
        match self {
            Audience::Employee => "employees",
            Audience::Manager => "managers",
            Audience::Executive => "executives",
            Audience::NewHire => "new hires",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "employee" | "employees" => Ok(Audience::Employee),
            "manager" | "managers" => Ok(Audience::Manager),
            "executive" | "executives" => Ok(Audience::Executive),
            "new_hire" | "new_hires" => Ok(Audience::NewHire),
            other => Err(AgentError::InvalidRequest(format!("Unknown audience: {}", other))),
        }
    }
}

/// Summaries and key points for HR documents
#[derive(Clone)]
pub struct Summarizer {
    chat: Arc<dyn ChatBackend>,
    timeout: TimeoutPolicy,
    max_input_chars: usize,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatBackend>) -> Self {
        Self {
            chat,
            timeout: TimeoutPolicy::default(),
            max_input_chars: MAX_INPUT_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    #[instrument(skip(self, document), fields(style = %style, chars = document.chars().count()))]
    pub async fn summarize_document(&self, document: &str, style: SummaryStyle) -> Result<String> {
        let document = self.prepare(document)?;
        info!("Generating document summary");
        self.complete("summarize_document", style.template().replace("{document}", document))
            .await
    }

    #[instrument(skip(self, document), fields(audience = %audience, chars = document.chars().count()))]
    pub async fn summarize_for_audience(&self, document: &str, audience: Audience) -> Result<String> {
        let document = self.prepare(document)?;
        info!("Generating audience summary");
        self.complete(
            "summarize_for_audience",
            audience_summary_prompt(document, audience.describe()),
        )
        .await
    }

    /// Categorized bullet list of policies, requirements and action items
    #[instrument(skip(self, document), fields(chars = document.chars().count()))]
    pub async fn extract_key_points(&self, document: &str) -> Result<String> {
        let document = self.prepare(document)?;
        info!("Extracting key points");
        self.complete("extract_key_points", KEY_POINTS_TEMPLATE.replace("{document}", document))
            .await
    }

    fn prepare<'a>(&self, document: &'a str) -> Result<&'a str> {
        let document = document.trim();
        if document.is_empty() {
            return Err(AgentError::InvalidRequest("document text is empty".to_string()));
        }
        Ok(truncate_chars(document, self.max_input_chars))
    }

    async fn complete(&self, operation: &str, prompt: String) -> Result<String> {
        let messages = [ChatMessage::system(HR_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let completion = self
            .timeout
            .execute(operation, self.chat.complete(&messages, &[]))
            .await??;

        let text = completion
            .content
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AgentError::Chat(format!("{} returned no text", operation)))?;

        debug!(operation, chars = text.chars().count(), "Summary complete");
        Ok(text)
    }
}

/// First `max` characters of `text`
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
