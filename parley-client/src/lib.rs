//! Parley chat client library
//!
//! Client-side conversation cache kept in sync with the messaging server:
//! a WebSocket [`transport`], an in-memory [`store`], and the
//! [`coordinator`] that owns the session lifecycle.

pub mod api;
pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;
pub mod transport;

pub use api::{ConversationApi, RestConversationApi};
pub use config::{ClientConfig, ReconnectPolicy};
pub use coordinator::{ConnectionState, SyncCoordinator};
pub use error::{ChatError, Result};
pub use models::{
    Conversation, ConversationView, MessageSummary, PagingResponse, ParticipantProfile,
    ParticipantRef, ParticipantType, Session,
};
pub use store::ConversationStore;
pub use transport::{
    EventSubscription, Transport, TransportCommand, TransportEvent, WebSocketTransport,
};
