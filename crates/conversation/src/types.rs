//! Conversation state.

use chrono::{DateTime, Utc};
use relay_llm::{ChatMessage, TokenUsage};
use serde::{Deserialize, Serialize};

/// An in-progress conversation.
///
/// `turn_count` and the token totals cover the whole conversation, while
/// `messages` only holds the most recent window, so the two can diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub conversation_id: String,

    pub chatbot_id: String,

    #[serde(default)]
    pub chatbot_name: String,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Retained messages, oldest first
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Lifetime prompt tokens, never reduced by trimming
    #[serde(default)]
    pub total_prompt_tokens: u64,

    /// Lifetime completion tokens, never reduced by trimming
    #[serde(default)]
    pub total_completion_tokens: u64,

    #[serde(default)]
    pub turn_count: u64,

    pub last_access: DateTime<Utc>,

    /// Save to the durable store before eviction
    #[serde(default)]
    pub persist: bool,

    /// Hard expiry, independent of the cache TTL
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        conversation_id: impl Into<String>,
        chatbot_id: impl Into<String>,
        chatbot_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            chatbot_id: chatbot_id.into(),
            chatbot_name: chatbot_name.into(),
            user_id: None,
            session_id: None,
            messages: Vec::new(),
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            turn_count: 0,
            last_access: now,
            persist: false,
            expires_at: None,
            created_at: now,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mark the conversation for durable storage.
    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Record one turn, keeping at most `max_turns` messages.
    ///
    /// Returns how many old messages were dropped.
    pub fn record_turn(
        &mut self,
        message: ChatMessage,
        usage: TokenUsage,
        max_turns: usize,
    ) -> usize {
        self.messages.push(message);
        self.turn_count += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;
        self.last_access = Utc::now();

        let excess = self.messages.len().saturating_sub(max_turns);
        if excess > 0 {
            self.messages.drain(..excess);
        }
        excess
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
