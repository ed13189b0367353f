//! Shared fakes and helpers for coordinator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parley_client::{
    ChatError, ClientConfig, ConnectionState, Conversation, ConversationApi, EventSubscription,
    MessageSummary, PagingResponse, ParticipantProfile, ParticipantRef, ParticipantType,
    ReconnectPolicy, Result, Session, SyncCoordinator, Transport, TransportCommand,
    TransportEvent,
};
use tokio::sync::{mpsc, Notify};

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const ME: &str = "me";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn session() -> Session {
    Session::new(ME, ParticipantType::User, "valid-token")
}

pub fn conversation(id: &str, other: &str, last_at: Option<i64>) -> Conversation {
    let conversation = Conversation::new(
        id,
        [
            ParticipantRef::new(ME, ParticipantType::User),
            ParticipantRef::new(other, ParticipantType::User),
        ],
    );
    match last_at {
        Some(secs) => conversation.with_last_message(MessageSummary::new(other, "seed", at(secs))),
        None => conversation,
    }
}

pub fn profile(id: &str) -> ParticipantProfile {
    ParticipantProfile {
        id: id.to_string(),
        participant_type: ParticipantType::User,
        name: format!("{} name", id),
        avatar: None,
        is_online: false,
    }
}

/// Config with reconnect delays short enough for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            max_attempts: None,
        },
        ..ClientConfig::default()
    }
}

pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley_client=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory transport whose connection is driven by the test.
#[derive(Default)]
pub struct FakeTransport {
    connect_results: Mutex<VecDeque<ChatError>>,
    /// When set, connects wait for a notification before answering
    connect_gate: Mutex<Option<Arc<Notify>>>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Mutex<Vec<TransportCommand>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `connect` call fail with `error`.
    pub fn fail_next_connect(&self, error: ChatError) {
        self.connect_results.lock().unwrap().push_back(error);
    }

    pub fn gate_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: TransportEvent) {
        let guard = self.event_tx.lock().unwrap();
        guard
            .as_ref()
            .expect("no live connection")
            .send(event)
            .expect("subscription dropped");
    }

    /// Simulate the server going away.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::ConnectionLost);
    }

    pub fn sent(&self) -> Vec<TransportCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _session: &Session) -> Result<EventSubscription> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.connect_results.lock().unwrap().pop_front() {
            return Err(error);
        }

        let (tx, subscription) = EventSubscription::channel();
        *self.event_tx.lock().unwrap() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(subscription)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.event_tx.lock().unwrap().take();
    }

    fn send(&self, command: TransportCommand) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ChatError::Network("not connected to server".to_string()));
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

/// In-memory REST API backed by a list of conversations.
#[derive(Default)]
pub struct FakeApi {
    conversations: Mutex<Vec<Conversation>>,
    profiles: Mutex<HashMap<String, ParticipantProfile>>,
    list_errors: Mutex<VecDeque<ChatError>>,
    delete_errors: Mutex<VecDeque<ChatError>>,
    /// When set, deletes wait for a notification before answering
    delete_gate: Mutex<Option<Arc<Notify>>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    /// Page numbers requested, in call order
    list_pages: Mutex<Vec<u32>>,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Arc<Self> {
        let api = Self::default();
        *api.conversations.lock().unwrap() = conversations;
        Arc::new(api)
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.conversations.lock().unwrap().push(conversation);
    }

    pub fn add_profile(&self, profile: ParticipantProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile);
    }

    pub fn fail_next_list(&self, error: ChatError) {
        self.list_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_delete(&self, error: ChatError) {
        self.delete_errors.lock().unwrap().push_back(error);
    }

    pub fn gate_deletes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.delete_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn list_pages(&self) -> Vec<u32> {
        self.list_pages.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn list_conversations(
        &self,
        _session: &Session,
        page: u32,
        size: u32,
    ) -> Result<PagingResponse<Conversation>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_pages.lock().unwrap().push(page);
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.list_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let all = self.conversations.lock().unwrap().clone();
        let total = all.len() as u32;
        let data = all
            .into_iter()
            .skip((page * size) as usize)
            .take(size as usize)
            .collect();
        Ok(PagingResponse {
            data,
            page,
            size,
            total_elements: total as u64,
            total_pages: total.div_ceil(size),
        })
    }

    async fn delete_conversation(&self, _session: &Session, conversation_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.delete_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.delete_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.conversations
            .lock()
            .unwrap()
            .retain(|c| c.id != conversation_id);
        Ok(())
    }

    async fn fetch_profile(
        &self,
        _session: &Session,
        participant: &ParticipantRef,
    ) -> Result<ParticipantProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profiles
            .lock()
            .unwrap()
            .get(&participant.id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(participant.id.clone()))
    }
}

pub fn coordinator(
    transport: &Arc<FakeTransport>,
    api: &Arc<FakeApi>,
    config: &ClientConfig,
) -> SyncCoordinator {
    SyncCoordinator::new(transport.clone(), api.clone(), config)
}

/// Wait until the coordinator reaches `state`.
pub async fn wait_for_state(coordinator: &SyncCoordinator, state: ConnectionState) {
    let mut rx = coordinator.watch_state();
    tokio::time::timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .expect("state channel closed");
}

/// Poll `check` until it holds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", TEST_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
