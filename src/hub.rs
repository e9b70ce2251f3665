//! Entry point of the room sync client.
//!
//! A [`QuizHub`] owns everything room sessions share: one hub connection,
//! the subscription registry, the durable cache and the REST collaborators.
//! It is a cheap handle; clones share the same state.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SyncConfig::load("quiz.toml")?;
//! let hub = QuizHub::from_config(config, Arc::new(FileStore::open("cache.json")?))?;
//! let user = LocalUser::new(user_id, "ana");
//!
//! let session = match hub.resume_room(user.clone()).await? {
//!     Some(session) => session,
//!     None => hub.join_room(user, "QZ7K2").await?,
//! };
//!
//! while let Some(update) = session.next_update().await {
//!     match update {
//!         SessionUpdate::PlayerJoined(entry) => println!("{} joined", entry.username),
//!         SessionUpdate::GameStarted { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::cache::{DurableCache, SnapshotStore};
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::model::{LocalUser, RoomSettings};
use crate::registry::SubscriptionRegistry;
use crate::services::{RoomSummary, Services};
use crate::session::RoomSession;
use crate::transport::Connector;

struct HubInner {
    config: SyncConfig,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    cache: DurableCache,
    services: Services,
}

/// Shared client state and the factory for [`RoomSession`]s.
#[derive(Clone)]
pub struct QuizHub {
    inner: Arc<HubInner>,
}

impl QuizHub {
    /// Assemble a hub from its parts.
    pub fn new(
        config: SyncConfig,
        connector: impl Connector,
        services: Services,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let connection = ConnectionManager::new(connector, config.clone());
        let registry = SubscriptionRegistry::new(connection.clone());
        Self {
            inner: Arc::new(HubInner {
                config,
                connection,
                registry,
                cache: DurableCache::new(store),
                services,
            }),
        }
    }

    /// WebSocket hub connection and HTTP backend, both from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Config`](crate::QuizRoomError::Config) if the
    /// HTTP client cannot be built.
    #[cfg(all(feature = "transport-websocket", feature = "http-backend"))]
    pub fn from_config(config: SyncConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let connector = crate::transports::WebSocketConnector::from_config(&config);
        let backend = Arc::new(crate::http::HttpBackend::new(&config)?);
        Ok(Self::new(
            config,
            connector,
            Services::from_shared(backend),
            store,
        ))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &DurableCache {
        &self.inner.cache
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Open the hub connection. Sessions do this on entry; calling it early
    /// only saves the wait.
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Drop every subscription and close the hub connection. Rooms stay in
    /// the cache and can be resumed.
    pub async fn disconnect(&self) {
        let removed = self.inner.registry.clear().await;
        info!(removed, "disconnecting from hub");
        self.inner.connection.disconnect().await;
    }

    /// Rooms anyone can join.
    ///
    /// # Errors
    ///
    /// Returns the REST error.
    pub async fn public_rooms(&self) -> Result<Vec<RoomSummary>> {
        self.inner.services.rooms.public_rooms().await
    }

    /// Create a room owned by `user` and enter its lobby.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::Validation`](crate::QuizRoomError::Validation) for
    /// out-of-range settings, or the REST error. A hub connection failure is
    /// not an error: the session starts degraded and reports it through
    /// [`RoomSession::next_update`].
    pub async fn create_room(&self, user: LocalUser, settings: RoomSettings) -> Result<RoomSession> {
        RoomSession::create(self.clone(), user, settings).await
    }

    /// Join the room with the given code and enter its lobby.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::Validation`](crate::QuizRoomError::Validation) for an
    /// empty code, or the REST error.
    pub async fn join_room(&self, user: LocalUser, code: &str) -> Result<RoomSession> {
        RoomSession::join(self.clone(), user, code).await
    }

    /// Re-enter the room recorded in the cache, if there is one.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for stores that can fail to read.
    pub async fn resume_room(&self, user: LocalUser) -> Result<Option<RoomSession>> {
        RoomSession::resume(self.clone(), user).await
    }
}

impl std::fmt::Debug for QuizHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizHub")
            .field("hub_url", &self.inner.config.hub_url)
            .field("state", &self.inner.connection.state())
            .finish_non_exhaustive()
    }
}
