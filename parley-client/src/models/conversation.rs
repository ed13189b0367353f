use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::participant::{ParticipantProfile, ParticipantRef};

/// Last message of a conversation, as embedded in the list payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageSummary {
    pub fn new(
        sender_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp,
        }
    }
}

/// A thread between exactly two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: [ParticipantRef; 2],
    #[serde(default)]
    pub last_message: Option<MessageSummary>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// user_id -> messages not yet acknowledged by that user
    #[serde(default)]
    pub unread_count: HashMap<String, u32>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, participants: [ParticipantRef; 2]) -> Self {
        Self {
            id: id.into(),
            participants,
            last_message: None,
            last_message_at: None,
            unread_count: HashMap::new(),
        }
    }

    pub fn with_last_message(mut self, message: MessageSummary) -> Self {
        self.last_message_at = Some(message.timestamp);
        self.last_message = Some(message);
        self
    }

    /// The participant on the other side from `user_id`.
    ///
    /// Returns `None` when `user_id` is not part of the conversation.
    pub fn other_participant(&self, user_id: &str) -> Option<&ParticipantRef> {
        match &self.participants {
            [a, b] if a.id == user_id => Some(b),
            [a, b] if b.id == user_id => Some(a),
            _ => None,
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }

    /// Apply a message as the latest activity, unless a newer one is already recorded.
    pub(crate) fn record_message(&mut self, message: MessageSummary) {
        let is_newer = self
            .last_message
            .as_ref()
            .map_or(true, |current| message.timestamp > current.timestamp);
        // Option orders None below Some
        self.last_message_at = self.last_message_at.max(Some(message.timestamp));
        if is_newer {
            self.last_message = Some(message);
        }
    }

    /// Fold the server's copy of the same conversation into this one.
    ///
    /// Activity only moves forward, but unread counts are taken from the
    /// server as-is: it is the only side that sees every read receipt.
    pub(crate) fn merge(&mut self, incoming: Conversation) {
        if let Some(message) = incoming.last_message {
            self.record_message(message);
        }
        self.last_message_at = self.last_message_at.max(incoming.last_message_at);
        self.unread_count = incoming.unread_count;
        self.participants = incoming.participants;
    }
}

/// A conversation joined with what the list row needs to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub other_participant: Option<ParticipantRef>,
    /// Cached profile of the other participant, if loaded yet
    pub other_profile: Option<ParticipantProfile>,
    pub my_unread_count: u32,
}
