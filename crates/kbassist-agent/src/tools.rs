//! Retrieval tools offered to the model
//!
//! The tool set is closed: every name the model may use maps to a
//! `ToolCall` variant, and dispatch is a `match` over that enum.

use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, instrument};

use kbassist_core::SearchMatch;
use kbassist_retrieval::RetrievalGateway;

use crate::chat::ToolSpec;

const SEARCH_TOOL: &str = "search_policy_documents";
const DETAILS_TOOL: &str = "get_document_details";
const RELATED_TOOL: &str = "search_related_topics";
const LIST_TOOL: &str = "list_available_policies";

const DEFAULT_SEARCH_TOP_K: usize = 3;
const DETAILS_TOP_K: usize = 5;
const RELATED_TOP_K: usize = 5;
const LIST_TOP_K: usize = 10;
const LIST_QUERY: &str = "HR policy employee handbook benefits procedures";

/// Why a tool request could not be turned into a `ToolCall`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    SearchPolicyDocuments { query: String, top_k: usize },
    GetDocumentDetails { document_identifier: String },
    SearchRelatedTopics { topic1: String, topic2: String },
    ListAvailablePolicies,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_search_top_k")]
    top_k: usize,
}

fn default_search_top_k() -> usize {
    DEFAULT_SEARCH_TOP_K
}

#[derive(Deserialize)]
struct DetailsArgs {
    document_identifier: String,
}

#[derive(Deserialize)]
struct RelatedArgs {
    topic1: String,
    topic2: String,
}

impl ToolCall {
    /// Resolve a model request by tool name and JSON arguments
    pub fn parse(name: &str, arguments: &serde_json::Value) -> Result<Self, ToolError> {
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: name.to_string(),
            message: e.to_string(),
        };
        let args = match arguments {
            serde_json::Value::Null => json!({}),
            other => other.clone(),
        };

        match name {
            SEARCH_TOOL => {
                let args: SearchArgs = serde_json::from_value(args).map_err(invalid)?;
                Ok(Self::SearchPolicyDocuments {
                    query: args.query,
                    top_k: args.top_k,
                })
            }
            DETAILS_TOOL => {
                let args: DetailsArgs = serde_json::from_value(args).map_err(invalid)?;
                Ok(Self::GetDocumentDetails {
                    document_identifier: args.document_identifier,
                })
            }
            RELATED_TOOL => {
                let args: RelatedArgs = serde_json::from_value(args).map_err(invalid)?;
                Ok(Self::SearchRelatedTopics {
                    topic1: args.topic1,
                    topic2: args.topic2,
                })
            }
            LIST_TOOL => Ok(Self::ListAvailablePolicies),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchPolicyDocuments { .. } => SEARCH_TOOL,
            Self::GetDocumentDetails { .. } => DETAILS_TOOL,
            Self::SearchRelatedTopics { .. } => RELATED_TOOL,
            Self::ListAvailablePolicies => LIST_TOOL,
        }
    }

    /// Declarations sent to the chat backend
    pub fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: SEARCH_TOOL.to_string(),
                description: "Search HR policy documents by topic or keyword. Use this to find specific policies."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Topic or keywords to search for"},
                        "top_k": {"type": "integer", "description": "Number of results to return", "default": DEFAULT_SEARCH_TOP_K}
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: DETAILS_TOOL.to_string(),
                description: "Get detailed information about a specific document by searching for its exact title or identifier"
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "document_identifier": {"type": "string", "description": "Document title, filename, or policy number"}
                    },
                    "required": ["document_identifier"]
                }),
            },
            ToolSpec {
                name: RELATED_TOOL.to_string(),
                description: "Find policy documents related to multiple topics. Use when you need to understand connections between different policies."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "topic1": {"type": "string", "description": "First topic"},
                        "topic2": {"type": "string", "description": "Second topic"}
                    },
                    "required": ["topic1", "topic2"]
                }),
            },
            ToolSpec {
                name: LIST_TOOL.to_string(),
                description: "List all available policy categories and documents in the knowledge base"
                    .to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
        ]
    }
}

/// Text handed back to the model plus the matches behind it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub matches: Vec<SearchMatch>,
}

impl ToolOutput {
    fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            matches: Vec::new(),
        }
    }

    /// Output for a request that never reached a tool
    pub fn error(error: &ToolError) -> Self {
        Self::text_only(format!(
            "Error: {}. Available tools: {}, {}, {}, {}.",
            error, SEARCH_TOOL, DETAILS_TOOL, RELATED_TOOL, LIST_TOOL
        ))
    }
}

/// Runs tool calls against one namespace of the index
#[derive(Clone)]
pub struct ToolExecutor {
    gateway: RetrievalGateway,
    namespace: String,
}

impl ToolExecutor {
    pub fn new(gateway: RetrievalGateway, namespace: impl Into<String>) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn gateway(&self) -> &RetrievalGateway {
        &self.gateway
    }

    /// Run `call`; `max_top_k` caps the result count the model asked for
    #[instrument(skip(self, call), fields(tool = call.name()))]
    pub async fn execute(&self, call: &ToolCall, max_top_k: Option<usize>) -> ToolOutput {
        let output = match call {
            ToolCall::SearchPolicyDocuments { query, top_k } => {
                let top_k = max_top_k.map_or(*top_k, |cap| (*top_k).min(cap));
                self.search_policy_documents(query, top_k).await
            }
            ToolCall::GetDocumentDetails {
                document_identifier,
            } => self.get_document_details(document_identifier).await,
            ToolCall::SearchRelatedTopics { topic1, topic2 } => {
                self.search_related_topics(topic1, topic2).await
            }
            ToolCall::ListAvailablePolicies => self.list_available_policies().await,
        };

        debug!(matches = output.matches.len(), "Tool finished");
        output
    }

    async fn search(&self, query: &str, top_k: usize) -> Vec<SearchMatch> {
        self.gateway.search(query, top_k, &self.namespace, None).await
    }

    async fn search_policy_documents(&self, query: &str, top_k: usize) -> ToolOutput {
        let matches = self.search(query, top_k).await;
        if matches.is_empty() {
            return ToolOutput::text_only(format!("No policies found for '{}'.", query));
        }

        let text = matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "Policy {} (relevance: {:.2}, source: {}):\n{}",
                    i + 1,
                    m.score,
                    m.metadata.filename,
                    m.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        ToolOutput { text, matches }
    }

    async fn get_document_details(&self, document_identifier: &str) -> ToolOutput {
        let matches = self.search(document_identifier, DETAILS_TOP_K).await;
        if matches.is_empty() {
            return ToolOutput::text_only(format!("Document '{}' not found.", document_identifier));
        }

        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for m in &matches {
            let filename = m.metadata.filename.as_str();
            match groups.iter_mut().find(|(name, _)| *name == filename) {
                Some((_, texts)) => texts.push(&m.text),
                None => groups.push((filename, vec![&m.text])),
            }
        }

        let text = groups
            .iter()
            .map(|(filename, texts)| {
                format!("Document: {}\n\nContent:\n{}", filename, texts.join("\n\n"))
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        ToolOutput { text, matches }
    }

    async fn search_related_topics(&self, topic1: &str, topic2: &str) -> ToolOutput {
        let query = format!("{} {} related policy", topic1, topic2);
        let matches = self.search(&query, RELATED_TOP_K).await;
        if matches.is_empty() {
            return ToolOutput::text_only(format!(
                "No policies found relating '{}' and '{}'.",
                topic1, topic2
            ));
        }

        let (t1, t2) = (topic1.to_lowercase(), topic2.to_lowercase());
        let text = matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let lowered = m.text.to_lowercase();
                let label = if lowered.contains(&t1) && lowered.contains(&t2) {
                    "BOTH TOPICS"
                } else {
                    "RELATED"
                };
                format!(
                    "Policy {} ({}, relevance: {:.2}):\nSource: {}\nContent: {}",
                    i + 1,
                    label,
                    m.score,
                    m.metadata.filename,
                    m.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        ToolOutput { text, matches }
    }

    async fn list_available_policies(&self) -> ToolOutput {
        let matches = self.search(LIST_QUERY, LIST_TOP_K).await;
        if matches.is_empty() {
            return ToolOutput::text_only("No policy documents found in the knowledge base.");
        }

        // filenames and titles share one sorted listing
        let documents: BTreeSet<&str> = matches
            .iter()
            .flat_map(|m| [m.metadata.filename.trim(), m.metadata.title.trim()])
            .filter(|name| !name.is_empty())
            .collect();
        if documents.is_empty() {
            return ToolOutput {
                text: "No policy documents found in the knowledge base.".to_string(),
                matches,
            };
        }

        let listing = documents
            .iter()
            .map(|name| format!("- {}", name))
            .collect::<Vec<_>>()
            .join("\n");

        ToolOutput {
            text: format!(
                "Available policy documents:\n{}\n\nYou can search these documents for specific information.",
                listing
            ),
            matches,
        }
    }
}

/// Collects distinct matches by chunk id, keeping first-seen order
#[derive(Debug, Default)]
pub(crate) struct SourceCollector {
    seen: HashSet<String>,
    sources: Vec<kbassist_core::Source>,
}

impl SourceCollector {
    pub(crate) fn extend(&mut self, matches: &[SearchMatch]) {
        for m in matches {
            if self.seen.insert(m.id.clone()) {
                self.sources.push(kbassist_core::Source::from(m));
            }
        }
    }

    pub(crate) fn into_sources(self) -> Vec<kbassist_core::Source> {
        self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbassist_core::{DocumentType, VectorMetadata, VectorRecord};
    use kbassist_retrieval::{HashEmbedding, InMemoryVectorIndex, VectorIndex};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const DIM: usize = 64;

    async fn executor_with(docs: &[(&str, &str, &str)]) -> ToolExecutor {
        let titled: Vec<_> = docs
            .iter()
            .map(|(id, filename, text)| (*id, *filename, *filename, *text))
            .collect();
        executor_with_titles(&titled).await
    }

    /// Records as (id, filename, title, text)
    async fn executor_with_titles(docs: &[(&str, &str, &str, &str)]) -> ToolExecutor {
        let embedder = Arc::new(HashEmbedding::new(DIM));
        let index = Arc::new(InMemoryVectorIndex::default());

        let records = docs
            .iter()
            .map(|(id, filename, title, text)| VectorRecord {
                id: id.to_string(),
                values: embedder.embed_one(text),
                metadata: VectorMetadata {
                    document_id: "doc_0123456789ab".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    text: text.to_string(),
                    filename: filename.to_string(),
                    title: title.to_string(),
                    document_type: DocumentType::Policy,
                },
            })
            .collect();
        index.upsert(records, "hr_policies").await.unwrap();

        ToolExecutor::new(RetrievalGateway::new(embedder, index, DIM), "hr_policies")
    }

    #[test]
    fn test_parse_known_tools() {
        assert_eq!(
            ToolCall::parse(SEARCH_TOOL, &json!({"query": "leave"})).unwrap(),
            ToolCall::SearchPolicyDocuments {
                query: "leave".to_string(),
                top_k: 3
            }
        );
        assert_eq!(
            ToolCall::parse(RELATED_TOOL, &json!({"topic1": "leave", "topic2": "pay"})).unwrap(),
            ToolCall::SearchRelatedTopics {
                topic1: "leave".to_string(),
                topic2: "pay".to_string()
            }
        );
        assert_eq!(
            ToolCall::parse(LIST_TOOL, &serde_json::Value::Null).unwrap(),
            ToolCall::ListAvailablePolicies
        );
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        assert_eq!(
            ToolCall::parse("delete_everything", &json!({})),
            Err(ToolError::UnknownTool("delete_everything".to_string()))
        );
        assert!(matches!(
            ToolCall::parse(DETAILS_TOOL, &json!({"name": "x"})),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(matches!(
            ToolCall::parse(SEARCH_TOOL, &json!("not an object")),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_specs_cover_every_tool() {
        let names: Vec<_> = ToolCall::specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![SEARCH_TOOL, DETAILS_TOOL, RELATED_TOOL, LIST_TOOL]);
    }

    #[tokio::test]
    async fn test_search_formatting() {
        let executor = executor_with(&[("a_chunk_0", "leave.md", "annual leave accrues monthly")]).await;
        let call = ToolCall::SearchPolicyDocuments {
            query: "annual leave accrues monthly".to_string(),
            top_k: 3,
        };

        let output = executor.execute(&call, None).await;
        assert_eq!(output.matches.len(), 1);
        assert_eq!(
            output.text,
            format!(
                "Policy 1 (relevance: {:.2}, source: leave.md):\nannual leave accrues monthly",
                output.matches[0].score
            )
        );
    }

    #[tokio::test]
    async fn test_search_respects_top_k_cap() {
        let executor = executor_with(&[
            ("a", "a.md", "leave policy one"),
            ("b", "b.md", "leave policy two"),
            ("c", "c.md", "leave policy three"),
        ])
        .await;
        let call = ToolCall::SearchPolicyDocuments {
            query: "leave policy".to_string(),
            top_k: 3,
        };

        assert_eq!(executor.execute(&call, Some(1)).await.matches.len(), 1);
        assert_eq!(executor.execute(&call, None).await.matches.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_index_messages() {
        let executor = executor_with(&[]).await;

        let search = ToolCall::SearchPolicyDocuments {
            query: "parking".to_string(),
            top_k: 3,
        };
        assert_eq!(executor.execute(&search, None).await.text, "No policies found for 'parking'.");

        let details = ToolCall::GetDocumentDetails {
            document_identifier: "HR-001".to_string(),
        };
        assert_eq!(executor.execute(&details, None).await.text, "Document 'HR-001' not found.");

        let related = ToolCall::SearchRelatedTopics {
            topic1: "leave".to_string(),
            topic2: "pay".to_string(),
        };
        assert_eq!(
            executor.execute(&related, None).await.text,
            "No policies found relating 'leave' and 'pay'."
        );

        assert_eq!(
            executor.execute(&ToolCall::ListAvailablePolicies, None).await.text,
            "No policy documents found in the knowledge base."
        );
    }

    #[tokio::test]
    async fn test_document_details_groups_by_filename() {
        let executor = executor_with(&[
            ("l0", "leave.md", "leave part one"),
            ("l1", "leave.md", "leave part two"),
            ("p0", "pay.md", "pay schedule"),
        ])
        .await;

        let output = executor
            .execute(
                &ToolCall::GetDocumentDetails {
                    document_identifier: "leave part".to_string(),
                },
                None,
            )
            .await;

        let sections: Vec<&str> = output.text.split("\n\n---\n\n").collect();
        assert_eq!(sections.len(), 2);
        let leave = sections
            .iter()
            .find(|s| s.starts_with("Document: leave.md"))
            .unwrap();
        assert!(leave.starts_with("Document: leave.md\n\nContent:\n"));
        assert!(leave.contains("leave part one"));
        assert!(leave.contains("leave part two"));
    }

    #[tokio::test]
    async fn test_related_topics_labels() {
        let executor = executor_with(&[
            ("b", "both.md", "Remote work and overtime rules"),
            ("r", "remote.md", "Remote work eligibility"),
        ])
        .await;

        let output = executor
            .execute(
                &ToolCall::SearchRelatedTopics {
                    topic1: "remote work".to_string(),
                    topic2: "Overtime".to_string(),
                },
                None,
            )
            .await;

        assert!(output.text.contains("(BOTH TOPICS, relevance: "));
        assert!(output.text.contains("Source: both.md\nContent: Remote work and overtime rules"));
        assert!(output.text.contains("(RELATED, relevance: "));
    }

    #[tokio::test]
    async fn test_list_sorted_and_deduplicated() {
        let executor = executor_with(&[
            ("z0", "vacation.md", "HR policy vacation"),
            ("z1", "vacation.md", "employee handbook vacation"),
            ("a0", "benefits.md", "benefits procedures"),
        ])
        .await;

        let output = executor.execute(&ToolCall::ListAvailablePolicies, None).await;
        assert_eq!(
            output.text,
            "Available policy documents:\n- benefits.md\n- vacation.md\n\nYou can search these documents for specific information."
        );
    }

    #[tokio::test]
    async fn test_list_includes_titles_and_skips_blanks() {
        let executor = executor_with_titles(&[
            ("v0", "vacation.md", "Vacation Policy", "HR policy vacation"),
            ("v1", "vacation.md", "Vacation Policy", "employee handbook vacation"),
            ("b0", "", "Benefits Guide", "benefits procedures"),
            ("c0", "conduct.md", "  ", "employee code of conduct"),
        ])
        .await;

        let output = executor.execute(&ToolCall::ListAvailablePolicies, None).await;
        assert_eq!(
            output.text,
            "Available policy documents:\n- Benefits Guide\n- Vacation Policy\n- conduct.md\n- vacation.md\n\n\
             You can search these documents for specific information."
        );
        assert_eq!(output.matches.len(), 4);
    }

    #[tokio::test]
    async fn test_list_with_only_blank_names() {
        let executor = executor_with_titles(&[("x0", "", "", "HR policy text")]).await;

        let output = executor.execute(&ToolCall::ListAvailablePolicies, None).await;
        assert_eq!(output.text, "No policy documents found in the knowledge base.");
        assert_eq!(output.matches.len(), 1);
    }

    #[test]
    fn test_source_collector_dedupes() {
        let hit = |id: &str, score: f32| SearchMatch {
            id: id.to_string(),
            score,
            text: String::new(),
            metadata: VectorMetadata {
                document_id: "doc_0123456789ab".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                text: String::new(),
                filename: "leave.md".to_string(),
                title: "Leave".to_string(),
                document_type: DocumentType::Policy,
            },
        };

        let mut collector = SourceCollector::default();
        collector.extend(&[hit("a", 0.9), hit("b", 0.8)]);
        collector.extend(&[hit("b", 0.7), hit("c", 0.6)]);

        let ids: Vec<_> = collector.into_sources().into_iter().map(|s| s.chunk_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
