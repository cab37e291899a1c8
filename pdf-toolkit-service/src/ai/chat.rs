//! In-memory chat sessions over a single document.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use super::heuristics::truncate_chars;
use crate::error::{ServiceError, ServiceResult};
use crate::ollama::ChatMessage;

/// Characters of document text kept as session context
pub const CONTEXT_CHARS: usize = 2000;
/// Prior turns replayed to the model
const HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub file_id: String,
    pub context: String,
    pub history: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ChatSession {
    fn system_prompt(&self) -> String {
        format!(
            "You are an assistant helping a user understand a PDF document. \
             Answer from the document excerpt below; say so when the answer is not in it.\n\n\
             Document excerpt:\n{}",
            self.context
        )
    }

    /// Messages for the model: system context, recent history, then `message`
    pub fn to_messages(&self, message: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        let skip = self.history.len().saturating_sub(HISTORY_TURNS);
        for turn in self.history.iter().skip(skip) {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(&turn.message),
                Role::Assistant => ChatMessage::assistant(&turn.message),
            });
        }
        messages.push(ChatMessage::user(message));
        messages
    }
}

#[derive(Default)]
pub struct ChatStore {
    sessions: DashMap<String, ChatSession>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, file_id: &str, document_text: &str) -> ChatSession {
        let now = Utc::now();
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            context: truncate_chars(document_text, CONTEXT_CHARS).to_string(),
            history: Vec::new(),
            created_at: now,
            last_active: now,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, file_id = %file_id, "Chat session started");
        session
    }

    pub fn get(&self, session_id: &str) -> ServiceResult<ChatSession> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| ServiceError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Append a user message and its reply; returns the number of turns
    pub fn record_exchange(
        &self,
        session_id: &str,
        message: &str,
        reply: &str,
    ) -> ServiceResult<usize> {
        let mut session =
            self.sessions
                .get_mut(session_id)
                .ok_or_else(|| ServiceError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        let now = Utc::now();
        session.history.push(ChatTurn {
            role: Role::User,
            message: message.to_string(),
            timestamp: now,
        });
        session.history.push(ChatTurn {
            role: Role::Assistant,
            message: reply.to_string(),
            timestamp: now,
        });
        session.last_active = now;
        Ok(session.history.len())
    }

    /// Drop sessions idle for at least `ttl`
    pub fn purge_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now - s.last_active < ttl);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "Purged idle chat sessions");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
