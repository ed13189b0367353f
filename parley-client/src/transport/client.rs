use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::WsMessage;
use super::{EventSubscription, Transport, TransportCommand, TransportEvent};
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::models::{MessageSummary, Session};

/// Log previews are cut to this many characters
const PREVIEW_CHARS: usize = 100;

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// State of the single live connection
struct Live {
    user_id: String,
    write_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// WebSocket client for the messaging server
pub struct WebSocketTransport {
    server_url: String,
    handshake_timeout: Duration,
    live: StdMutex<Option<Live>>,
}

impl WebSocketTransport {
    pub fn new(server_url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            server_url: server_url.into(),
            handshake_timeout,
            live: StdMutex::new(None),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url.clone(), config.handshake_timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|live| !live.write_tx.is_closed())
            .unwrap_or(false)
    }

    fn encode(&self, command: TransportCommand) -> Result<WsMessage> {
        let message = match command {
            TransportCommand::JoinConversation(conversation_id) => {
                WsMessage::JoinConversation { conversation_id }
            }
            TransportCommand::SendMessage {
                conversation_id,
                content,
            } => WsMessage::SendMessage {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id,
                content,
                timestamp: Utc::now().timestamp_millis(),
            },
            TransportCommand::MarkRead(conversation_id) => {
                let user_id = self
                    .live
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(|live| live.user_id.clone())
                    .ok_or_else(|| ChatError::Network("not connected to server".to_string()))?;
                WsMessage::MarkRead {
                    conversation_id,
                    user_id,
                }
            }
        };
        Ok(message)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, session: &Session) -> Result<EventSubscription> {
        // One connection per transport
        self.disconnect().await;

        info!(url = %self.server_url, user_id = %session.user_id, "Connecting to messaging server");

        let (ws_stream, _) = timeout(self.handshake_timeout, connect_async(self.server_url.as_str()))
            .await
            .map_err(|_| {
                ChatError::Network(format!("timed out connecting to {}", self.server_url))
            })??;

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let connect_msg = WsMessage::Connect {
            user_id: session.user_id.clone(),
            participant_type: session.participant_type,
            token: session.token.clone(),
        };
        ws_write
            .send(Message::Text(serde_json::to_string(&connect_msg)?.into()))
            .await?;

        timeout(self.handshake_timeout, wait_for_auth(&mut ws_read))
            .await
            .map_err(|_| ChatError::Network("timed out waiting for auth response".to_string()))??;

        info!(user_id = %session.user_id, "Connected to messaging server");

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(run_pump(
            ws_write,
            ws_read,
            write_rx,
            event_tx,
            cancel.clone(),
        ));

        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(Live {
            user_id: session.user_id.clone(),
            write_tx,
            cancel: cancel.clone(),
            pump,
        });

        Ok(EventSubscription::with_cancel(event_rx, cancel))
    }

    async fn disconnect(&self) {
        let live = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(live) = live {
            info!(user_id = %live.user_id, "Initiating graceful disconnect");
            live.cancel.cancel();
            drop(live.write_tx);
            // The pump sends the close frame on its way out
            if timeout(self.handshake_timeout, live.pump).await.is_err() {
                warn!("Close handshake did not finish in time");
            }
        }
    }

    fn send(&self, command: TransportCommand) -> Result<()> {
        let message = self.encode(command)?;
        let json = serde_json::to_string(&message)?;
        debug!(preview = %preview(&json), "Sending message to server");

        let guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(live) => live
                .write_tx
                .send(json)
                .map_err(|_| ChatError::Network("connection closed".to_string())),
            None => {
                warn!("Cannot send message: not connected to server");
                Err(ChatError::Network("not connected to server".to_string()))
            }
        }
    }
}

/// Read frames until the server answers the connect message.
async fn wait_for_auth<R>(ws_read: &mut R) -> Result<()>
where
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = ws_read.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::AuthResponse { success: true, message }) => {
                    debug!(%message, "Authenticated with server");
                    return Ok(());
                }
                Ok(WsMessage::AuthResponse { success: false, message }) => {
                    error!(%message, "Authentication failed");
                    return Err(ChatError::Auth(message));
                }
                Ok(_) => warn!("Unexpected frame during auth"),
                Err(e) => warn!(error = %e, "Failed to parse auth response"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ChatError::Network(
        "connection closed during handshake".to_string(),
    ))
}

/// Multiplex outgoing commands and incoming frames until the connection ends.
///
/// Emits `ConnectionLost` only when the connection ends without a local
/// disconnect.
async fn run_pump<W, R>(
    mut ws_write: W,
    mut ws_read: R,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) where
    W: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = ws_write.send(Message::Close(None)).await {
                    warn!(error = %e, "Failed to send close frame");
                }
                return;
            }
            Some(data) = write_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(data.into())).await {
                    error!(error = %e, "Failed to send message to server");
                    break;
                }
            }
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        debug!(preview = %preview(&text), "Received from server");
                        if let Some(event) = decode_event(&text) {
                            if event_tx.send(event).is_err() {
                                info!("Event subscriber dropped, closing connection");
                                let _ = ws_write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = event_tx.send(TransportEvent::ConnectionLost);
}

fn decode_event(text: &str) -> Option<TransportEvent> {
    let message = match serde_json::from_str::<WsMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, preview = %preview(text), "Failed to parse frame from server");
            return None;
        }
    };

    match message {
        WsMessage::ChatMessage {
            conversation_id,
            sender_id,
            content,
            timestamp,
            ..
        } => {
            let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_else(|| {
                warn!(timestamp, "Message timestamp out of range, using local time");
                Utc::now()
            });
            Some(TransportEvent::MessageReceived {
                conversation_id,
                message: MessageSummary::new(sender_id, content, timestamp),
            })
        }
        WsMessage::ConversationUpdated { conversation } => {
            Some(TransportEvent::ConversationUpdated(conversation))
        }
        WsMessage::Presence {
            participant_id,
            is_online,
            ..
        } => Some(TransportEvent::PresenceChanged {
            participant_id,
            is_online,
        }),
        WsMessage::ReadReceipt {
            conversation_id,
            user_id,
        } => Some(TransportEvent::ReadAcknowledged {
            conversation_id,
            user_id,
        }),
        WsMessage::Error { message } => {
            warn!(%message, "Server reported error");
            None
        }
        other => {
            debug!(?other, "Ignoring frame not meant for clients");
            None
        }
    }
}
