use std::path::PathBuf;
use std::time::Duration;

use parley_client::{
    logging, ClientConfig, ConnectionState, ParticipantType, Session, SyncCoordinator,
};
use tracing::{error, info, warn};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

fn required_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            error!("{} must be set", key);
            None
        }
    }
}

fn log_conversations(coordinator: &SyncCoordinator) {
    let conversations = coordinator.conversations();
    info!(
        count = conversations.len(),
        unread = coordinator.unread_total(),
        "Conversation list"
    );
    for view in conversations {
        let name = view
            .other_profile
            .as_ref()
            .map(|p| p.name.clone())
            .or_else(|| view.other_participant.as_ref().map(|p| p.id.clone()))
            .unwrap_or_else(|| "?".to_string());
        let online = view.other_profile.as_ref().map(|p| p.is_online).unwrap_or(false);
        let last = view
            .conversation
            .last_message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        info!(
            conversation_id = %view.conversation.id,
            with = %name,
            online,
            unread = view.my_unread_count,
            last_message = %last,
            "  conversation"
        );
    }
}

#[tokio::main]
async fn main() {
    let log_dir = std::env::var("PARLEY_LOG_DIR").ok().map(PathBuf::from);
    let _log_guard = match logging::init(log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (Some(user_id), Some(token)) = (required_env("PARLEY_USER_ID"), required_env("PARLEY_TOKEN"))
    else {
        std::process::exit(1);
    };
    let participant_type = match std::env::var("PARLEY_PARTICIPANT_TYPE") {
        Ok(raw) => match raw.parse::<ParticipantType>() {
            Ok(t) => t,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        Err(_) => ParticipantType::User,
    };

    let coordinator = match SyncCoordinator::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build chat client: {}", e);
            std::process::exit(1);
        }
    };

    let mut state_rx = coordinator.watch_state();
    if let Err(e) = coordinator
        .initialize(Session::new(user_id, participant_type, token))
        .await
    {
        if coordinator.state() != ConnectionState::Ready {
            error!("Failed to start chat session: {}", e);
            std::process::exit(1);
        }
        warn!("Session started without initial conversations: {}", e);
    }
    log_conversations(&coordinator);

    let mut ticker = tokio::time::interval(SUMMARY_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                info!(%state, "Connection state");
                if state == ConnectionState::Ready {
                    log_conversations(&coordinator);
                }
            }
            _ = ticker.tick() => log_conversations(&coordinator),
        }
    }

    coordinator.teardown().await;
}
