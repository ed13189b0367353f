//! Session lifecycle and synchronization between the transport, the REST API
//! and the conversation store.
//!
//! ```text
//! Uninitialized -> Connecting -> Ready -> Disconnected -> Connecting -> Ready
//!                                     \______________________________\-> TornDown
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ConversationApi, RestConversationApi};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{ChatError, Result};
use crate::models::input::{ConversationIdInput, SendMessageInput, ValidateExt};
use crate::models::{ConversationView, MessageSummary, Session};
use crate::store::ConversationStore;
use crate::transport::{
    EventSubscription, Transport, TransportCommand, TransportEvent, WebSocketTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Disconnected,
    TornDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Mutable session state. Guarded by a std mutex that is never held across
/// an await point.
struct Shared {
    state: ConnectionState,
    session: Option<Session>,
    store: ConversationStore,
    /// Conversation the user currently has open; it accrues no unread count
    active_conversation: Option<String>,
    /// Page fetches in flight
    loading: u32,
    next_page: u32,
    has_more: bool,
    /// Removed locally, server delete not answered yet; reloads must skip them
    pending_deletes: HashSet<String>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            session: None,
            store: ConversationStore::new(),
            active_conversation: None,
            loading: 0,
            next_page: 0,
            has_more: false,
            pending_deletes: HashSet::new(),
        }
    }

    fn live_session(&self) -> Result<Session> {
        if self.state == ConnectionState::TornDown {
            return Err(ChatError::InvalidState("session torn down".to_string()));
        }
        self.session
            .clone()
            .ok_or_else(|| ChatError::InvalidState("session not initialized".to_string()))
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    api: Arc<dyn ConversationApi>,
    page_size: u32,
    reconnect: ReconnectPolicy,
    shared: StdMutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    /// Cancelled once by teardown; stops the event loop and backoff timers
    shutdown: CancellationToken,
}

/// Owns one authenticated chat session.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        api: Arc<dyn ConversationApi>,
        config: &ClientConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                transport,
                api,
                page_size: config.page_size,
                reconnect: config.reconnect.clone(),
                shared: StdMutex::new(Shared::new()),
                state_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire up the WebSocket transport and REST client described by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.check()?;
        let transport = Arc::new(WebSocketTransport::from_config(config));
        let api = Arc::new(RestConversationApi::from_config(config)?);
        Ok(Self::new(transport, api, config))
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            debug!(from = %shared.state, to = %state, "Connection state changed");
            shared.state = state;
            self.inner.state_tx.send_replace(state);
        }
    }

    fn is_torn_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Connect, seed the store and start consuming transport events.
    ///
    /// A failed connect is returned as-is and leaves the coordinator
    /// `Uninitialized` so the caller may retry. A failed seed is returned
    /// too, but the connection stays up and `load_conversations` can be
    /// called again.
    pub async fn initialize(&self, session: Session) -> Result<()> {
        {
            let mut shared = self.lock();
            if shared.state != ConnectionState::Uninitialized {
                return Err(ChatError::InvalidState(format!(
                    "cannot initialize while {}",
                    shared.state
                )));
            }
            shared.session = Some(session.clone());
            self.set_state(&mut shared, ConnectionState::Connecting);
        }

        info!(user_id = %session.user_id, participant_type = %session.participant_type, "Initializing chat session");

        let subscription = match self.inner.transport.connect(&session).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Failed to connect to messaging server");
                let mut shared = self.lock();
                if shared.state == ConnectionState::Connecting {
                    shared.session = None;
                    self.set_state(&mut shared, ConnectionState::Uninitialized);
                }
                return Err(e);
            }
        };

        let torn_down = {
            let mut shared = self.lock();
            if shared.state == ConnectionState::TornDown {
                true
            } else {
                self.set_state(&mut shared, ConnectionState::Ready);
                false
            }
        };
        if torn_down {
            // Teardown ran while connecting; its disconnect may have missed this connection
            debug!("Discarding connection established after teardown");
            subscription.cancel();
            self.inner.transport.disconnect().await;
            return Ok(());
        }

        let seeded = self.load_conversations().await;

        if self.is_torn_down() {
            return Ok(());
        }
        tokio::spawn(self.clone().run_event_loop(subscription));

        seeded
    }

    /// Fetch the first page of conversations and merge it into the store.
    pub async fn load_conversations(&self) -> Result<()> {
        self.fetch_page(0).await
    }

    /// Fetch the next page, if the last response reported more.
    pub async fn load_more_conversations(&self) -> Result<()> {
        let next_page = {
            let shared = self.lock();
            if !shared.has_more {
                return Ok(());
            }
            shared.next_page
        };
        self.fetch_page(next_page).await
    }

    async fn fetch_page(&self, page: u32) -> Result<()> {
        let session = {
            let mut shared = self.lock();
            let session = shared.live_session()?;
            shared.loading += 1;
            session
        };

        let result = self
            .inner
            .api
            .list_conversations(&session, page, self.inner.page_size)
            .await;

        {
            let mut shared = self.lock();
            if shared.state == ConnectionState::TornDown {
                debug!(page, "Discarding conversation page received after teardown");
                return Ok(());
            }
            shared.loading = shared.loading.saturating_sub(1);
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, page, "Failed to load conversations");
                    return Err(e);
                }
            };

            info!(
                page = response.page,
                count = response.data.len(),
                total = response.total_elements,
                "Loaded conversations"
            );
            // Reloading an earlier page must not rewind the cursor
            if response.page + 1 >= shared.next_page {
                shared.next_page = response.page + 1;
                shared.has_more = response.has_more();
            }
            for conversation in response.data {
                if shared.pending_deletes.contains(&conversation.id) {
                    debug!(conversation_id = %conversation.id, "Skipping conversation pending delete");
                    continue;
                }
                shared.store.upsert_conversation(conversation);
            }
        }

        self.refresh_profiles(&session).await;
        Ok(())
    }

    /// Fetch profiles for participants the store references but has not cached.
    async fn refresh_profiles(&self, session: &Session) {
        let missing = self.lock().store.missing_profiles(&session.user_id);
        if missing.is_empty() {
            return;
        }

        debug!(count = missing.len(), "Fetching participant profiles");
        let results = join_all(
            missing
                .iter()
                .map(|participant| self.inner.api.fetch_profile(session, participant)),
        )
        .await;

        let mut shared = self.lock();
        if shared.state == ConnectionState::TornDown {
            return;
        }
        for (participant, result) in missing.iter().zip(results) {
            match result {
                Ok(profile) => shared.store.cache_profile(profile),
                Err(e) => {
                    warn!(participant_id = %participant.id, error = %e, "Failed to fetch profile")
                }
            }
        }
    }

    /// Remove a conversation locally, then on the server.
    ///
    /// If the server call fails the conversation is restored and the error
    /// returned. A conversation already gone on the server counts as deleted.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        ConversationIdInput::new(conversation_id).validate_input()?;

        let (session, removed) = {
            let mut shared = self.lock();
            let session = shared.live_session()?;
            shared
                .pending_deletes
                .insert(conversation_id.to_string());
            (session, shared.store.remove_conversation(conversation_id))
        };

        let result = self
            .inner
            .api
            .delete_conversation(&session, conversation_id)
            .await;

        let mut shared = self.lock();
        if shared.state == ConnectionState::TornDown {
            debug!(conversation_id, "Discarding delete result received after teardown");
            return Ok(());
        }
        shared.pending_deletes.remove(conversation_id);
        match result {
            Ok(()) => {
                info!(conversation_id, "Deleted conversation");
                // An event may have brought it back meanwhile
                shared.store.remove_conversation(conversation_id);
                Ok(())
            }
            Err(ChatError::NotFound(_)) => {
                debug!(conversation_id, "Conversation already deleted on server");
                shared.store.remove_conversation(conversation_id);
                Ok(())
            }
            Err(e) => {
                error!(conversation_id, error = %e, "Failed to delete conversation, restoring it");
                if let Some(conversation) = removed {
                    shared.store.upsert_conversation(conversation);
                }
                Err(e)
            }
        }
    }

    /// Mark a conversation as the one on screen and acknowledge it.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        ConversationIdInput::new(conversation_id).validate_input()?;
        {
            let mut shared = self.lock();
            let session = shared.live_session()?;
            shared.active_conversation = Some(conversation_id.to_string());
            shared.store.reset_unread(conversation_id, &session.user_id);
        }

        self.send_best_effort(TransportCommand::JoinConversation(
            conversation_id.to_string(),
        ));
        self.send_best_effort(TransportCommand::MarkRead(conversation_id.to_string()));
        Ok(())
    }

    pub fn close_conversation(&self) {
        self.lock().active_conversation = None;
    }

    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        ConversationIdInput::new(conversation_id).validate_input()?;
        {
            let mut shared = self.lock();
            let session = shared.live_session()?;
            shared.store.reset_unread(conversation_id, &session.user_id);
        }
        self.send_best_effort(TransportCommand::MarkRead(conversation_id.to_string()));
        Ok(())
    }

    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        let input = SendMessageInput {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
        };
        input.validate_input()?;

        let session = self.lock().live_session()?;
        self.inner.transport.send(TransportCommand::SendMessage {
            conversation_id: input.conversation_id.clone(),
            content: input.content.clone(),
        })?;

        self.lock().store.record_message(
            &input.conversation_id,
            MessageSummary::new(session.user_id, input.content, Utc::now()),
        );
        Ok(())
    }

    fn send_best_effort(&self, command: TransportCommand) {
        if let Err(e) = self.inner.transport.send(command.clone()) {
            warn!(?command, error = %e, "Command not delivered");
        }
    }

    /// End the session: stop reconnecting, disconnect and clear the cache.
    ///
    /// Calling it again is a no-op.
    pub async fn teardown(&self) {
        {
            let mut shared = self.lock();
            if shared.state == ConnectionState::TornDown {
                debug!("Teardown requested on a session already torn down");
                return;
            }
            self.inner.shutdown.cancel();
            shared.session = None;
            shared.store.clear();
            shared.active_conversation = None;
            shared.loading = 0;
            shared.next_page = 0;
            shared.has_more = false;
            shared.pending_deletes.clear();
            self.set_state(&mut shared, ConnectionState::TornDown);
        }

        info!("Tearing down chat session");
        self.inner.transport.disconnect().await;
    }

    async fn run_event_loop(self, mut subscription: EventSubscription) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = subscription.next_event() => event,
            };

            match event {
                Some(TransportEvent::ConnectionLost) | None => match self.reconnect().await {
                    Some(next) => subscription = next,
                    None => break,
                },
                Some(event) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.handle_event(event) => {}
                    }
                }
            }
        }
        debug!("Event loop stopped");
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::MessageReceived {
                conversation_id,
                message,
            } => {
                if !self.apply_message(&conversation_id, message) {
                    // Someone started a conversation we have not seen yet
                    debug!(%conversation_id, "Message for unknown conversation, reloading");
                    if let Err(e) = self.load_conversations().await {
                        warn!(error = %e, "Failed to reload conversations");
                    }
                }
            }
            TransportEvent::ConversationUpdated(conversation) => {
                let session = {
                    let mut shared = self.lock();
                    if shared.pending_deletes.contains(&conversation.id) {
                        return;
                    }
                    shared.store.upsert_conversation(conversation);
                    shared.session.clone()
                };
                if let Some(session) = session {
                    self.refresh_profiles(&session).await;
                }
            }
            TransportEvent::PresenceChanged {
                participant_id,
                is_online,
            } => {
                self.lock().store.set_presence(&participant_id, is_online);
            }
            TransportEvent::ReadAcknowledged {
                conversation_id,
                user_id,
            } => {
                self.lock().store.reset_unread(&conversation_id, &user_id);
            }
            TransportEvent::ConnectionLost => {}
        }
    }

    /// Returns `false` when the conversation is not cached.
    fn apply_message(&self, conversation_id: &str, message: MessageSummary) -> bool {
        let mut shared = self.lock();
        if shared.pending_deletes.contains(conversation_id) {
            return true;
        }
        let Some(existing) = shared.store.conversation(conversation_id) else {
            return false;
        };

        let recipient = existing
            .other_participant(&message.sender_id)
            .map(|p| p.id.clone());
        shared.store.record_message(conversation_id, message);

        let is_open = shared.active_conversation.as_deref() == Some(conversation_id);
        if !is_open {
            if let Some(recipient) = recipient {
                shared.store.increment_unread(conversation_id, &recipient);
            }
        }
        true
    }

    /// Reconnect with backoff after the live connection dropped.
    ///
    /// Returns the new subscription, or `None` after teardown, an auth
    /// rejection, or running out of attempts.
    async fn reconnect(&self) -> Option<EventSubscription> {
        let session = {
            let mut shared = self.lock();
            if shared.state == ConnectionState::TornDown {
                return None;
            }
            let session = shared.session.clone()?;
            self.set_state(&mut shared, ConnectionState::Disconnected);
            session
        };
        warn!("Connection to messaging server lost");

        let shutdown = self.inner.shutdown.clone();
        let mut backoff = self.inner.reconnect.backoff();

        loop {
            if let Some(max) = self.inner.reconnect.max_attempts {
                if backoff.attempt() >= max {
                    error!(attempts = max, "Giving up reconnecting to messaging server");
                    return None;
                }
            }

            let delay = backoff.next_delay();
            info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let mut shared = self.lock();
                if shared.state == ConnectionState::TornDown {
                    return None;
                }
                self.set_state(&mut shared, ConnectionState::Connecting);
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    // The connect may have finished after teardown's disconnect
                    self.inner.transport.disconnect().await;
                    return None;
                }
                result = self.inner.transport.connect(&session) => result,
            };

            match result {
                Ok(subscription) => {
                    let active = {
                        let mut shared = self.lock();
                        if shared.state == ConnectionState::TornDown {
                            None
                        } else {
                            self.set_state(&mut shared, ConnectionState::Ready);
                            Some(shared.active_conversation.clone())
                        }
                    };
                    let Some(active) = active else {
                        debug!("Discarding connection established after teardown");
                        subscription.cancel();
                        self.inner.transport.disconnect().await;
                        return None;
                    };
                    info!(attempts = backoff.attempt(), "Reconnected to messaging server");

                    if let Some(conversation_id) = active {
                        self.send_best_effort(TransportCommand::JoinConversation(conversation_id));
                    }
                    // Events from the gap are not replayed
                    if let Err(e) = self.load_conversations().await {
                        warn!(error = %e, "Failed to re-seed conversations after reconnect");
                    }
                    return Some(subscription);
                }
                Err(ChatError::Auth(message)) => {
                    error!(%message, "Reconnect rejected, session token is no longer valid");
                    let mut shared = self.lock();
                    if shared.state != ConnectionState::TornDown {
                        self.set_state(&mut shared, ConnectionState::Disconnected);
                    }
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "Reconnect attempt failed");
                    let mut shared = self.lock();
                    if shared.state == ConnectionState::TornDown {
                        return None;
                    }
                    self.set_state(&mut shared, ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Conversations in display order, joined with cached profiles.
    pub fn conversations(&self) -> Vec<ConversationView> {
        let shared = self.lock();
        match &shared.session {
            Some(session) => shared.store.conversation_views(&session.user_id),
            None => Vec::new(),
        }
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.user_id.clone())
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.lock().loading > 0
    }

    pub fn has_more_conversations(&self) -> bool {
        self.lock().has_more
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.lock().active_conversation.clone()
    }

    pub fn unread_total(&self) -> u32 {
        let shared = self.lock();
        shared
            .session
            .as_ref()
            .map(|s| shared.store.unread_total(&s.user_id))
            .unwrap_or(0)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}
