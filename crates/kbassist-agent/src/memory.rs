//! Conversation session memory
//!
//! Sessions live in process memory, keyed by session id. Writes only ever
//! append; readers get cloned snapshots.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};

use kbassist_core::ConversationTurn;

use crate::chat::ChatMessage;

/// Default number of turns kept per session
const DEFAULT_MAX_TURNS: usize = 1000;

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    turns: VecDeque<ConversationTurn>,
    created_at: DateTime<Utc>,
}

/// Render turns as `ROLE: content`, separated by blank lines
pub fn format_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str().to_uppercase(), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// In-memory store of conversation sessions
#[derive(Debug)]
pub struct SessionMemory {
    sessions: RwLock<HashMap<String, Session>>,
    max_turns_per_session: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::with_max_turns(DEFAULT_MAX_TURNS)
    }

    /// Keep at most `max_turns` per session, dropping the oldest
    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns_per_session: max_turns.max(1),
        }
    }

    /// Create the session if it does not exist yet
    pub async fn create_session(&self, session_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) {
            sessions.insert(
                session_id.to_string(),
                Session {
                    user_id: user_id.to_string(),
                    turns: VecDeque::new(),
                    created_at: Utc::now(),
                },
            );
            info!(session_id, user_id, "Created conversation session");
        }
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn user_of(&self, session_id: &str) -> Option<String> {
        self.sessions.read().await.get(session_id).map(|s| s.user_id.clone())
    }

    pub async fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions.read().await.get(session_id).map(|s| s.created_at)
    }

    /// Append a turn, creating an anonymous session when needed
    pub async fn add_message(&self, session_id: &str, turn: ConversationTurn) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| Session {
            user_id: String::new(),
            turns: VecDeque::new(),
            created_at: Utc::now(),
        });

        while session.turns.len() >= self.max_turns_per_session {
            session.turns.pop_front();
        }
        debug!(session_id, role = %turn.role, chars = turn.content.len(), "Appending turn");
        session.turns.push_back(turn);
    }

    /// Snapshot of the session, optionally only the last `limit` turns
    pub async fn conversation(&self, session_id: &str, limit: Option<usize>) -> Vec<ConversationTurn> {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(session_id) else {
            return Vec::new();
        };

        let skip = limit.map_or(0, |n| session.turns.len().saturating_sub(n));
        session.turns.iter().skip(skip).cloned().collect()
    }

    pub async fn formatted_history(&self, session_id: &str, limit: Option<usize>) -> String {
        format_turns(&self.conversation(session_id, limit).await)
    }

    /// The last `max_messages` turns as chat messages
    pub async fn context_for_llm(&self, session_id: &str, max_messages: usize) -> Vec<ChatMessage> {
        self.conversation(session_id, Some(max_messages))
            .await
            .iter()
            .map(ChatMessage::from)
            .collect()
    }

    /// Remove a session; returns whether it existed
    pub async fn clear_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "Cleared session");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbassist_core::Role;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let memory = SessionMemory::new();
        memory.create_session("s1", "alice").await;
        memory.add_message("s1", ConversationTurn::user("hi")).await;
        memory.create_session("s1", "bob").await;

        assert_eq!(memory.session_count().await, 1);
        assert_eq!(memory.user_of("s1").await.as_deref(), Some("alice"));
        assert_eq!(memory.conversation("s1", None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_conversation_limit_takes_latest() {
        let memory = SessionMemory::new();
        for i in 0..5 {
            memory.add_message("s", ConversationTurn::user(format!("q{}", i))).await;
        }

        let last_two: Vec<_> = memory
            .conversation("s", Some(2))
            .await
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(last_two, vec!["q3", "q4"]);
        assert_eq!(memory.conversation("s", Some(50)).await.len(), 5);
        assert!(memory.conversation("missing", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_formatted_history() {
        let memory = SessionMemory::new();
        memory.add_message("s", ConversationTurn::user("How much leave?")).await;
        memory.add_message("s", ConversationTurn::assistant("Twenty days.")).await;

        assert_eq!(
            memory.formatted_history("s", None).await,
            "USER: How much leave?\n\nASSISTANT: Twenty days."
        );
    }

    #[tokio::test]
    async fn test_context_for_llm_and_clear() {
        let memory = SessionMemory::new();
        memory.add_message("s", ConversationTurn::user("a")).await;
        memory.add_message("s", ConversationTurn::assistant("b")).await;
        memory.add_message("s", ConversationTurn::user("c")).await;

        let context = memory.context_for_llm("s", 2).await;
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].role, Role::Assistant);
        assert_eq!(context[1].content, "c");

        assert!(memory.clear_session("s").await);
        assert!(!memory.clear_session("s").await);
        assert!(!memory.has_session("s").await);
    }

    #[tokio::test]
    async fn test_oldest_turn_dropped_at_capacity() {
        let memory = SessionMemory::with_max_turns(2);
        for text in ["one", "two", "three"] {
            memory.add_message("s", ConversationTurn::user(text)).await;
        }

        let contents: Vec<_> = memory
            .conversation("s", None)
            .await
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_capacity_holds_over_many_turns() {
        let memory = SessionMemory::with_max_turns(3);
        for i in 0..500 {
            memory
                .add_message("s", ConversationTurn::user(format!("turn {}", i)))
                .await;
        }

        let contents: Vec<_> = memory
            .conversation("s", None)
            .await
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["turn 497", "turn 498", "turn 499"]);
        assert_eq!(memory.conversation("s", Some(1)).await[0].content, "turn 499");
    }
}
