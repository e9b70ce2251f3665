//! # Quiz Room Sync
//!
//! Real-time room synchronization for a multiplayer quiz client.
//!
//! Players meet in a room, watch each other arrive, wait for the host to
//! start, answer questions and see the scoreboard move. This crate keeps the
//! local copy of a room consistent with everyone else's over a pub/sub hub,
//! talks to the quiz backend's REST API for everything authoritative, and
//! keeps a durable snapshot so a restarted client can pick up where it left.
//!
//! ## Features
//!
//! - **One connection** per client, shared by every room; concurrent
//!   [`ConnectionManager::connect`] calls share one attempt
//! - **Race-tolerant scoreboard**: joins, exits and score deltas converge in
//!   any arrival order, and the local player's own echoes are not counted
//!   twice
//! - **Durable cache**: every scoreboard change is written before the
//!   application sees it
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for
//!   any backend; the default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **Pluggable REST**: room sessions call the traits in [`services`]; the
//!   default `http-backend` feature provides [`HttpBackend`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quiz_room_sync::{LocalUser, MemoryStore, QuizHub, RoomSettings, SessionUpdate, SyncConfig};
//!
//! let hub = QuizHub::from_config(SyncConfig::default(), Arc::new(MemoryStore::new()))?;
//! let session = hub
//!     .create_room(LocalUser::new(user_id, "ana"), RoomSettings::default())
//!     .await?;
//!
//! while let Some(update) = session.next_update().await {
//!     if let SessionUpdate::PlayerJoined(entry) = update {
//!         println!("{} joined", entry.username);
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod error_codes;
#[cfg(feature = "http-backend")]
pub mod http;
pub mod hub;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod score;
pub mod services;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use cache::{CacheKey, DurableCache, FileStore, MemoryStore, SnapshotStore};
pub use config::SyncConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, SubscriptionHandle};
pub use error::{QuizRoomError, Result};
pub use error_codes::ErrorCode;
#[cfg(feature = "http-backend")]
pub use http::HttpBackend;
pub use hub::QuizHub;
pub use model::{LocalUser, Question, Quiz, Room, RoomSettings, ScoreEntry, Scoreboard};
pub use protocol::{EventKind, RoomCommand, RoomEvent};
pub use registry::SubscriptionRegistry;
pub use services::Services;
pub use session::{RoomPhase, RoomSession, SessionUpdate, StartRequest};
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
