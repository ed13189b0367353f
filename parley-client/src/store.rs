//! In-memory conversation cache.
//!
//! Every mutator is synchronous and total: unknown ids are ignored rather
//! than reported, so the store can be driven straight from event handlers.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::models::{
    Conversation, ConversationView, MessageSummary, ParticipantProfile, ParticipantRef,
};

#[derive(Debug, Default)]
pub struct ConversationStore {
    /// conversation_id -> conversation
    conversations: HashMap<String, Conversation>,
    /// participant_id -> cached profile
    profiles: HashMap<String, ParticipantProfile>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a conversation, or merge it into the cached copy with the same id.
    ///
    /// `conversation` is taken to be the server's copy, so its unread counts
    /// replace the cached ones.
    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversations.get_mut(&conversation.id) {
            Some(existing) => existing.merge(conversation),
            None => {
                trace!(conversation_id = %conversation.id, "Caching new conversation");
                self.conversations
                    .insert(conversation.id.clone(), conversation);
            }
        }
    }

    /// Record a message as the conversation's latest activity.
    ///
    /// Returns `false` when the conversation is not cached.
    pub fn record_message(&mut self, conversation_id: &str, message: MessageSummary) -> bool {
        match self.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.record_message(message);
                true
            }
            None => false,
        }
    }

    /// Remove a conversation, returning it if it was cached.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.remove(conversation_id)
    }

    pub fn increment_unread(&mut self, conversation_id: &str, user_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            let count = conversation
                .unread_count
                .entry(user_id.to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    pub fn reset_unread(&mut self, conversation_id: &str, user_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.unread_count.insert(user_id.to_string(), 0);
        }
    }

    /// Update the online flag of a cached profile.
    ///
    /// Returns `false` when the participant has no cached profile; the
    /// update is dropped in that case.
    pub fn set_presence(&mut self, participant_id: &str, is_online: bool) -> bool {
        match self.profiles.get_mut(participant_id) {
            Some(profile) => {
                profile.is_online = is_online;
                true
            }
            None => {
                debug!(participant_id, "Dropping presence for uncached participant");
                false
            }
        }
    }

    /// Conversations ordered by most recent activity; never-active ones last.
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| {
            // Option<DateTime> orders None first, so reversing puts it last
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }

    /// Ordered conversations joined with the other participant's profile.
    pub fn conversation_views(&self, current_user_id: &str) -> Vec<ConversationView> {
        self.list_conversations()
            .into_iter()
            .map(|conversation| {
                let other_participant = conversation.other_participant(current_user_id).cloned();
                let other_profile = other_participant
                    .as_ref()
                    .and_then(|p| self.profiles.get(&p.id))
                    .cloned();
                let my_unread_count = conversation.unread_for(current_user_id);
                ConversationView {
                    conversation,
                    other_participant,
                    other_profile,
                    my_unread_count,
                }
            })
            .collect()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn cache_profile(&mut self, profile: ParticipantProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn profile(&self, participant_id: &str) -> Option<&ParticipantProfile> {
        self.profiles.get(participant_id)
    }

    /// Participants referenced by cached conversations that have no profile yet.
    pub fn missing_profiles(&self, exclude_id: &str) -> Vec<ParticipantRef> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for conversation in self.conversations.values() {
            for participant in &conversation.participants {
                if participant.id == exclude_id || self.profiles.contains_key(&participant.id) {
                    continue;
                }
                if seen.insert(participant.id.clone()) {
                    missing.push(participant.clone());
                }
            }
        }
        missing.sort_by(|a, b| a.id.cmp(&b.id));
        missing
    }

    pub fn unread_total(&self, user_id: &str) -> u32 {
        self.conversations
            .values()
            .map(|c| c.unread_for(user_id))
            .fold(0u32, u32::saturating_add)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.profiles.clear();
    }
}
