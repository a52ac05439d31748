//! Metadata Extraction
//!
//! Pattern-based extraction of document fields used for filtering and
//! citation. Nothing here fails: a field that cannot be found is `None`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use kbassist_core::{DocumentMetadata, DocumentType};

const TITLE_SCAN_LINES: usize = 10;
const MAX_TITLE_CHARS: usize = 200;
const MAX_DEPARTMENT_CHARS: usize = 100;
const TYPE_SCAN_CHARS: usize = 500;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("metadata pattern is valid")
}

static TITLE_LABEL: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^(title|subject):\s*"));

const DATE: &str = r"(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})";

static EFFECTIVE_DATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(&format!(r"(?i)effective\s+date[:\s]+{}", DATE)),
        compile(&format!(r"(?i)effective[:\s]+{}", DATE)),
    ]
});

static REVISION_DATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(&format!(r"(?i)revision\s+date[:\s]+{}", DATE)),
        compile(&format!(r"(?i)revised[:\s]+{}", DATE)),
        compile(&format!(r"(?i)last\s+updated[:\s]+{}", DATE)),
    ]
});

static EXPIRY_DATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(&format!(r"(?i)expir(?:y|ation)\s+date[:\s]+{}", DATE)),
        compile(&format!(r"(?i)expires[:\s]+{}", DATE)),
    ]
});

static POLICY_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(r"(?i)policy\s+(?:number|#|no\.?)[:\s]+([A-Z0-9-]+)"),
        compile(r"(?i)document\s+(?:number|#|no\.?)[:\s]+([A-Z0-9-]+)"),
        compile(r"(?i)\bref(?:erence)?[:\s]+([A-Z0-9-]+)"),
    ]
});

static DEPARTMENT: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(r"(?im)department[:\s]+([A-Za-z &-]+?)\s*$"),
        compile(r"(?im)owner[:\s]+([A-Za-z &-]+?)\s*$"),
        compile(r"(?im)responsible[:\s]+([A-Za-z &-]+?)\s*$"),
    ]
});

/// Fields extracted from a document's text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub title: String,
    pub policy_number: Option<String>,
    pub department: Option<String>,
    pub effective_date: Option<String>,
    pub revision_date: Option<String>,
    pub expiry_date: Option<String>,
    pub document_type: DocumentType,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedMetadata {
    /// Merge into a document metadata record, keeping its file information
    pub fn apply_to(self, metadata: &mut DocumentMetadata) {
        metadata.title = self.title;
        metadata.policy_number = self.policy_number;
        metadata.department = self.department;
        metadata.effective_date = self.effective_date;
        metadata.revision_date = self.revision_date;
        metadata.expiry_date = self.expiry_date;
        metadata.document_type = self.document_type;
        metadata.extracted_at = self.extracted_at;
    }
}

/// Regex-driven metadata extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_all(&self, text: &str, filename: Option<&str>) -> ExtractedMetadata {
        ExtractedMetadata {
            title: self.extract_title(text, filename),
            policy_number: self.extract_policy_number(text),
            department: self.extract_department(text),
            effective_date: first_capture(&EFFECTIVE_DATE, text),
            revision_date: first_capture(&REVISION_DATE, text),
            expiry_date: first_capture(&EXPIRY_DATE, text),
            document_type: self.detect_document_type(text),
            extracted_at: Utc::now(),
        }
    }

    /// First short, non-empty line near the top, minus any `Title:`/`Subject:` label
    pub fn extract_title(&self, text: &str, filename: Option<&str>) -> String {
        text.lines()
            .take(TITLE_SCAN_LINES)
            .map(str::trim)
            .filter(|line| !line.is_empty() && line.chars().count() < MAX_TITLE_CHARS)
            .map(|line| TITLE_LABEL.replace(line, "").trim().to_string())
            .find(|title| !title.is_empty())
            .or_else(|| filename.map(str::to_string))
            .unwrap_or_else(|| "Untitled".to_string())
    }

    pub fn extract_policy_number(&self, text: &str) -> Option<String> {
        first_capture(&POLICY_NUMBER, text)
    }

    pub fn extract_department(&self, text: &str) -> Option<String> {
        DEPARTMENT
            .iter()
            .filter_map(|pattern| pattern.captures(text))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
            .find(|value| !value.is_empty() && value.chars().count() < MAX_DEPARTMENT_CHARS)
    }

    /// Classify from keywords in the leading slice of the text
    pub fn detect_document_type(&self, text: &str) -> DocumentType {
        let head: String = text.chars().take(TYPE_SCAN_CHARS).collect::<String>().to_lowercase();

        if head.contains("policy") {
            DocumentType::Policy
        } else if head.contains("procedure") {
            DocumentType::Procedure
        } else if head.contains("guideline") {
            DocumentType::Guideline
        } else if head.contains("handbook") || head.contains("manual") {
            DocumentType::Handbook
        } else {
            DocumentType::Document
        }
    }
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .filter_map(|pattern| pattern.captures(text))
        .find_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
}
