//! Live connection to the messaging server.
//!
//! A [`Transport`] owns at most one connection. Inbound traffic is exposed
//! as an [`EventSubscription`]; reconnecting after [`TransportEvent::ConnectionLost`]
//! is left to the caller.

mod client;
mod messages;

pub use client::WebSocketTransport;
pub use messages::WsMessage;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Conversation, MessageSummary, Session};

/// Commands the client can issue over the live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    JoinConversation(String),
    SendMessage {
        conversation_id: String,
        content: String,
    },
    MarkRead(String),
}

/// Events pushed by the messaging server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    MessageReceived {
        conversation_id: String,
        message: MessageSummary,
    },
    ConversationUpdated(Conversation),
    PresenceChanged {
        participant_id: String,
        is_online: bool,
    },
    /// A participant acknowledged the conversation, possibly from another device
    ReadAcknowledged {
        conversation_id: String,
        user_id: String,
    },
    ConnectionLost,
}

/// Inbound event stream of a single connection.
///
/// The stream is unbounded and cannot be restarted: once it yields `None`
/// (or `ConnectionLost`) a new connection is required.
#[derive(Debug)]
pub struct EventSubscription {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
}

impl EventSubscription {
    /// Create a subscription and the sender that feeds it.
    pub fn channel() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                events: rx,
                cancel: CancellationToken::new(),
            },
        )
    }

    pub(crate) fn with_cancel(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, cancel }
    }

    /// Handle that stops the producing side of this subscription.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }
}

impl Stream for EventSubscription {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and authenticate with the session token.
    ///
    /// Fails with `ChatError::Auth` when the server rejects the token and
    /// `ChatError::Network` when it cannot be reached.
    async fn connect(&self, session: &Session) -> Result<EventSubscription>;

    /// Close the connection gracefully. Safe to call when not connected.
    async fn disconnect(&self);

    fn send(&self, command: TransportCommand) -> Result<()>;
}
