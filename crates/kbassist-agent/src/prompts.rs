//! Prompts and templates for the HR assistant

/// Role and behavior of the assistant
pub const HR_SYSTEM_PROMPT: &str = "You are a helpful HR Assistant for the company. Your role is to:
1. Answer questions about company HR policies and procedures
2. Help employees understand their benefits, leave policies, and workplace guidelines
3. Provide accurate information based on the company's official HR documentation
4. Be professional, empathetic, and clear in your responses

When answering questions:
- Base your answers on the retrieved policy documents
- If you're unsure or don't have the information, say so clearly
- Provide relevant policy references when applicable
- Be concise but thorough

Always maintain confidentiality and direct sensitive matters to HR personnel.";

/// Tool catalog appended to the agent's system prompt
pub const TOOL_CATALOG: &str = "You have access to these tools for searching the HR knowledge base:
- search_policy_documents(query, top_k): search policy documents by topic or keyword
- get_document_details(document_identifier): fetch the content of one document by title, filename, or policy number
- search_related_topics(topic1, topic2): find policies that connect two topics
- list_available_policies(): list the documents in the knowledge base

Search before answering policy questions. Call one tool at a time, and answer once you have enough information. Cite the source documents you used.";

/// Prompt for a single-shot answer over retrieved context
pub const RAG_RESPONSE_TEMPLATE: &str = "Based on the following HR policy documents:

{context}

Question: {question}

Please provide a helpful answer based on the company's HR policies. Include relevant policy sections or references.";

/// Prompt for a follow-up question with prior turns
pub const CONVERSATION_CONTEXT_TEMPLATE: &str = "Previous conversation:
{history}

Current question: {question}

Context from HR documents:
{context}

Provide a helpful response that considers the conversation history.";

/// Prompt for an audience-tailored policy summary
pub const POLICY_SUMMARY_TEMPLATE: &str = "Summarize the following HR policy document for {audience}:

{document}

Provide a clear, {summary_type} summary that highlights key points, requirements, and important deadlines or procedures.";

pub const BRIEF_SUMMARY_TEMPLATE: &str =
    "Provide a brief 2-3 sentence summary of this HR document:\n\n{document}";

pub const COMPREHENSIVE_SUMMARY_TEMPLATE: &str = "Provide a comprehensive summary covering all major points, policies, and requirements from this document:\n\n{document}";

pub const EXECUTIVE_SUMMARY_TEMPLATE: &str = "Provide an executive summary highlighting key decisions, policies, and action items from this document:\n\n{document}";

/// Prompt for a categorized bullet list of points and actions
pub const KEY_POINTS_TEMPLATE: &str = "Extract the key points, policies, and action items from this HR document.
Format as a bulleted list with categories:

Key Policies:
- [policy points]

Requirements:
- [requirement points]

Action Items:
- [action items]

Document:
{document}";

/// System prompt for the agent loop; `history` is omitted when empty
pub fn agent_system_prompt(history: &str) -> String {
    let mut prompt = format!("{}\n\n{}", HR_SYSTEM_PROMPT, TOOL_CATALOG);
    if !history.trim().is_empty() {
        prompt.push_str("\n\nPrevious conversation:\n");
        prompt.push_str(history);
    }
    prompt
}

pub fn rag_prompt(context: &str, question: &str) -> String {
    RAG_RESPONSE_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

pub fn conversation_prompt(history: &str, question: &str, context: &str) -> String {
    CONVERSATION_CONTEXT_TEMPLATE
        .replace("{history}", history)
        .replace("{question}", question)
        .replace("{context}", context)
}

pub fn audience_summary_prompt(document: &str, audience: &str) -> String {
    POLICY_SUMMARY_TEMPLATE
        .replace("{audience}", audience)
        .replace("{summary_type}", "clear and actionable")
        .replace("{document}", document)
}
