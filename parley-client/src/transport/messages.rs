use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ParticipantType};

/// WebSocket frame types exchanged with the messaging server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    // Client -> server
    #[serde(rename = "connect")]
    Connect {
        user_id: String,
        participant_type: ParticipantType,
        token: String,
    },
    #[serde(rename = "join_conversation")]
    JoinConversation { conversation_id: String },
    #[serde(rename = "send_message")]
    SendMessage {
        id: String,
        conversation_id: String,
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "mark_read")]
    MarkRead {
        conversation_id: String,
        user_id: String,
    },

    // Server -> client
    #[serde(rename = "auth_response")]
    AuthResponse { success: bool, message: String },
    #[serde(rename = "message")]
    ChatMessage {
        id: String,
        conversation_id: String,
        sender_id: String,
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "conversation_updated")]
    ConversationUpdated { conversation: Conversation },
    #[serde(rename = "presence")]
    Presence {
        participant_id: String,
        is_online: bool,
        last_seen: Option<i64>,
    },
    #[serde(rename = "read_receipt")]
    ReadReceipt {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
