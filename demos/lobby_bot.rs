//! # Lobby Bot
//!
//! A headless player that walks through a whole room lifecycle:
//!
//! 1. Resume the cached room, or join one by code
//! 2. Follow the lobby until the host starts the game
//! 3. Answer every question with its first option
//! 4. Leave on Ctrl+C or when the questions run out
//!
//! ## Running
//!
//! ```sh
//! QUIZ_ROOM_CODE=QZ7K2 cargo run --example lobby_bot
//!
//! # Point at another deployment:
//! QUIZ_CONFIG=staging.toml QUIZ_ROOM_CODE=QZ7K2 cargo run --example lobby_bot
//! ```

use std::sync::Arc;

use quiz_room_sync::{
    FileStore, LocalUser, QuizHub, RoomSession, SessionUpdate, SyncConfig,
};
use uuid::Uuid;

const DEFAULT_HUB_URL: &str = "ws://localhost:8080/hub";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = match std::env::var("QUIZ_CONFIG") {
        Ok(path) => SyncConfig::load(path)?,
        Err(_) => SyncConfig::new(DEFAULT_HUB_URL),
    };
    let store = Arc::new(FileStore::open("lobby_bot.cache.json")?);
    let hub = QuizHub::from_config(config, store)?;
    let user = LocalUser::new(Uuid::new_v4(), "lobby-bot");

    // ── Enter a room ────────────────────────────────────────────────
    let session = match hub.resume_room(user.clone()).await? {
        Some(session) => session,
        None => {
            let code = std::env::var("QUIZ_ROOM_CODE")
                .map_err(|_| "set QUIZ_ROOM_CODE to the room to join")?;
            hub.join_room(user, &code).await?
        }
    };
    tracing::info!(room = %session.room().await.code, "entered room");

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            update = session.next_update() => {
                let Some(update) = update else {
                    tracing::info!("session ended");
                    break;
                };
                if !handle(&session, update).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving");
                break;
            }
        }
    }

    if let Err(e) = session.leave().await {
        tracing::warn!("leave failed: {e}");
    }
    hub.disconnect().await;
    Ok(())
}

/// React to one update. Returns `false` once the bot is done.
async fn handle(
    session: &RoomSession,
    update: SessionUpdate,
) -> Result<bool, Box<dyn std::error::Error>> {
    match update {
        SessionUpdate::PlayerJoined(entry) => tracing::info!("{} joined", entry.username),
        SessionUpdate::Countdown { seconds } => tracing::info!("starting in {seconds}s"),
        SessionUpdate::GameStarted { quiz: None, .. } => {
            tracing::warn!("quiz could not be loaded, waiting it out");
        }
        SessionUpdate::GameStarted { .. } => return answer_all(session).await,
        SessionUpdate::Degraded { reason } => {
            tracing::warn!("degraded: {reason}");
            session.retry_connection().await?;
        }
        other => tracing::debug!(?other, "update"),
    }
    Ok(true)
}

async fn answer_all(session: &RoomSession) -> Result<bool, Box<dyn std::error::Error>> {
    let mut question = session.current_question().await;
    while let Some(current) = question {
        if let Some(answer) = current.answers.first() {
            let earned = session.submit_answer(current.id, answer.id).await?;
            tracing::info!(question = %current.value, earned, "answered");
        }
        question = session.advance_question().await?;
    }
    tracing::info!(points = session.local_points().await, "quiz finished");
    Ok(false)
}
