//! Integration tests for the WebSocket transport
//!
//! These tests spin up a scripted messaging server and connect the real
//! transport to it to verify the handshake, event decoding, and shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_client::{
    ChatError, ParticipantType, Session, Transport, TransportCommand, TransportEvent,
    WebSocketTransport,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const BAD_TOKEN: &str = "bad-token";

type ServerSocket = WebSocketStream<TcpStream>;

/// Start a server that authenticates clients and hands each accepted socket,
/// with the connect frame it sent, to the test.
async fn start_test_server() -> (String, mpsc::UnboundedReceiver<(Value, ServerSocket)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let hello = next_json(&mut ws).await;

                if hello["token"] == BAD_TOKEN {
                    send_json(
                        &mut ws,
                        json!({"type": "auth_response", "success": false, "message": "invalid token"}),
                    )
                    .await;
                    let _ = ws.close(None).await;
                    return;
                }

                send_json(
                    &mut ws,
                    json!({"type": "auth_response", "success": true, "message": "Connected"}),
                )
                .await;
                let _ = tx.send((hello, ws));
            });
        }
    });

    (format!("ws://127.0.0.1:{}", port), rx)
}

async fn next_json(ws: &mut ServerSocket) -> Value {
    loop {
        let frame = timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream closed")
            .expect("Read error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn session(token: &str) -> Session {
    Session::new("me", ParticipantType::User, token)
}

fn transport(url: &str) -> WebSocketTransport {
    WebSocketTransport::new(url, Duration::from_secs(2))
}

async fn accept(rx: &mut mpsc::UnboundedReceiver<(Value, ServerSocket)>) -> (Value, ServerSocket) {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for client")
        .expect("Server stopped")
}

#[tokio::test]
async fn test_connect_sends_credentials() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);

    let _subscription = transport.connect(&session("valid-token")).await.unwrap();
    let (hello, _ws) = accept(&mut clients).await;

    assert_eq!(hello["type"], "connect");
    assert_eq!(hello["user_id"], "me");
    assert_eq!(hello["participant_type"], "USER");
    assert_eq!(hello["token"], "valid-token");
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_rejected_token_is_auth_error() {
    let (url, _clients) = start_test_server().await;
    let transport = transport(&url);

    let result = transport.connect(&session(BAD_TOKEN)).await;

    assert!(matches!(result, Err(ChatError::Auth(ref m)) if m == "invalid token"));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = transport(&format!("ws://127.0.0.1:{}", port));
    let result = transport.connect(&session("valid-token")).await;

    assert!(matches!(result, Err(ChatError::Network(_))));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Read the connect frame and never answer
        while ws.next().await.is_some() {}
    });

    let transport = WebSocketTransport::new(
        format!("ws://127.0.0.1:{}", port),
        Duration::from_millis(200),
    );
    let result = transport.connect(&session("valid-token")).await;

    assert!(matches!(result, Err(ChatError::Network(ref m)) if m.contains("auth")));
}

#[tokio::test]
async fn test_server_frames_become_events() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);
    let mut subscription = transport.connect(&session("valid-token")).await.unwrap();
    let (_, mut ws) = accept(&mut clients).await;

    send_json(&mut ws, json!({"type": "error", "message": "ignored"})).await;
    send_json(
        &mut ws,
        json!({
            "type": "message",
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "bob",
            "content": "hi there",
            "timestamp": 1_700_000_000_000i64
        }),
    )
    .await;
    send_json(
        &mut ws,
        json!({"type": "presence", "participant_id": "bob", "is_online": true, "last_seen": null}),
    )
    .await;
    send_json(
        &mut ws,
        json!({"type": "read_receipt", "conversation_id": "c1", "user_id": "bob"}),
    )
    .await;

    let event = timeout(TEST_TIMEOUT, subscription.next_event()).await.unwrap();
    match event {
        Some(TransportEvent::MessageReceived {
            conversation_id,
            message,
        }) => {
            assert_eq!(conversation_id, "c1");
            assert_eq!(message.sender_id, "bob");
            assert_eq!(message.content, "hi there");
            assert_eq!(message.timestamp.timestamp_millis(), 1_700_000_000_000);
        }
        other => panic!("Expected MessageReceived, got {:?}", other),
    }

    let event = timeout(TEST_TIMEOUT, subscription.next_event()).await.unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::PresenceChanged {
            participant_id: "bob".to_string(),
            is_online: true,
        })
    );

    let event = timeout(TEST_TIMEOUT, subscription.next_event()).await.unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::ReadAcknowledged {
            conversation_id: "c1".to_string(),
            user_id: "bob".to_string(),
        })
    );
}

#[tokio::test]
async fn test_commands_reach_server() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);
    let _subscription = transport.connect(&session("valid-token")).await.unwrap();
    let (_, mut ws) = accept(&mut clients).await;

    transport
        .send(TransportCommand::JoinConversation("c1".to_string()))
        .unwrap();
    transport
        .send(TransportCommand::SendMessage {
            conversation_id: "c1".to_string(),
            content: "hello".to_string(),
        })
        .unwrap();
    transport
        .send(TransportCommand::MarkRead("c1".to_string()))
        .unwrap();

    let join = next_json(&mut ws).await;
    assert_eq!(join, json!({"type": "join_conversation", "conversation_id": "c1"}));

    let message = next_json(&mut ws).await;
    assert_eq!(message["type"], "send_message");
    assert_eq!(message["conversation_id"], "c1");
    assert_eq!(message["content"], "hello");
    assert!(!message["id"].as_str().unwrap().is_empty());
    assert!(message["timestamp"].as_i64().unwrap() > 0);

    let read = next_json(&mut ws).await;
    assert_eq!(
        read,
        json!({"type": "mark_read", "conversation_id": "c1", "user_id": "me"})
    );
}

#[tokio::test]
async fn test_server_close_reports_connection_lost() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);
    let mut subscription = transport.connect(&session("valid-token")).await.unwrap();
    let (_, mut ws) = accept(&mut clients).await;

    ws.close(None).await.unwrap();

    let event = timeout(TEST_TIMEOUT, subscription.next_event()).await.unwrap();
    assert_eq!(event, Some(TransportEvent::ConnectionLost));
}

#[tokio::test]
async fn test_disconnect_closes_quietly() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);
    let mut subscription = transport.connect(&session("valid-token")).await.unwrap();
    let (_, mut ws) = accept(&mut clients).await;

    transport.disconnect().await;

    // A local disconnect ends the stream without ConnectionLost
    let event = timeout(TEST_TIMEOUT, subscription.next_event()).await.unwrap();
    assert_eq!(event, None);
    assert!(!transport.is_connected());

    let frame = timeout(TEST_TIMEOUT, ws.next()).await.unwrap();
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));

    let result = transport.send(TransportCommand::JoinConversation("c1".to_string()));
    assert!(matches!(result, Err(ChatError::Network(_))));

    // Disconnecting twice is harmless
    transport.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let (url, mut clients) = start_test_server().await;
    let transport = transport(&url);

    let mut first = transport.connect(&session("valid-token")).await.unwrap();
    let (_, _first_ws) = accept(&mut clients).await;
    let mut second = transport.connect(&session("valid-token")).await.unwrap();
    let (_, mut second_ws) = accept(&mut clients).await;

    let event = timeout(TEST_TIMEOUT, first.next_event()).await.unwrap();
    assert_eq!(event, None);

    send_json(
        &mut second_ws,
        json!({"type": "read_receipt", "conversation_id": "c9", "user_id": "me"}),
    )
    .await;
    let event = timeout(TEST_TIMEOUT, second.next_event()).await.unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::ReadAcknowledged {
            conversation_id: "c9".to_string(),
            user_id: "me".to_string(),
        })
    );
}
