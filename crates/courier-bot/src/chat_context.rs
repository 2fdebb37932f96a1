//! Per-conversation chat history with TTL and bounded length.
//!
//! Backed by [`DashMap`] so concurrent webhook tasks can read and append
//! without a global lock.  Purging is lazy: every read or write sweeps
//! expired conversations first, so no background task is needed.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// `user` or `assistant`.
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug)]
struct Conversation {
    turns: Vec<ChatTurn>,
    expires_at: Instant,
}

/// Conversation-keyed chat history store.
pub struct ChatContextStore {
    max_turns: usize,
    ttl: Duration,
    conversations: DashMap<String, Conversation>,
}

impl ChatContextStore {
    /// `max_turns` counts user/assistant pairs; the store keeps at most
    /// `2 * max_turns` messages per conversation.
    pub fn new(max_turns: usize, ttl: Duration) -> Self {
        Self {
            max_turns: max_turns.max(1),
            ttl: ttl.max(Duration::from_secs(1)),
            conversations: DashMap::new(),
        }
    }

    /// Snapshot the history for a conversation, refreshing its expiry.
    pub fn get_history(&self, conversation_key: &str) -> Vec<ChatTurn> {
        self.get_history_at(conversation_key, Instant::now())
    }

    /// Append a user/assistant pair, trimming the oldest turns beyond the
    /// size bound and refreshing the expiry.
    pub fn append_turn(&self, conversation_key: &str, user_text: &str, assistant_text: &str) {
        self.append_turn_at(conversation_key, user_text, assistant_text, Instant::now());
    }

    fn get_history_at(&self, conversation_key: &str, now: Instant) -> Vec<ChatTurn> {
        self.purge(now);

        let Some(mut conversation) = self.conversations.get_mut(conversation_key) else {
            return Vec::new();
        };
        conversation.expires_at = now + self.ttl;
        conversation.turns.clone()
    }

    fn append_turn_at(
        &self,
        conversation_key: &str,
        user_text: &str,
        assistant_text: &str,
        now: Instant,
    ) {
        self.purge(now);

        let mut conversation = self
            .conversations
            .entry(conversation_key.to_owned())
            .or_insert_with(|| Conversation {
                turns: Vec::new(),
                expires_at: now + self.ttl,
            });

        conversation.turns.push(ChatTurn {
            role: "user",
            content: user_text.to_owned(),
        });
        conversation.turns.push(ChatTurn {
            role: "assistant",
            content: assistant_text.to_owned(),
        });

        let max_messages = self.max_turns * 2;
        if conversation.turns.len() > max_messages {
            let excess = conversation.turns.len() - max_messages;
            conversation.turns.drain(..excess);
        }

        conversation.expires_at = now + self.ttl;
    }

    fn purge(&self, now: Instant) {
        self.conversations
            .retain(|_, conversation| conversation.expires_at > now);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
