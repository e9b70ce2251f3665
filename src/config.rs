//! Client configuration.
//!
//! [`SyncConfig`] is built in code with [`SyncConfig::new`] and the `with_*`
//! builders, or loaded from a TOML file with [`SyncConfig::load`]. In TOML,
//! durations are written as integer milliseconds:
//!
//! ```toml
//! hub_url = "wss://quiz.example/establish-websockets-connection"
//! api_base_url = "https://quiz.example/api"
//! reconnect_delay_ms = 5000
//! leave_broadcast_delay_ms = 200
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{QuizRoomError, Result};

/// Default hub endpoint used by the quiz backend.
pub const DEFAULT_HUB_URL: &str = "ws://localhost:8080/establish-websockets-connection";

/// Default REST base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_START_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LEAVE_BROADCAST_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_FALLBACK_POINTS: u32 = 100;

/// Configuration shared by the connection manager, REST backend and room
/// sessions.
///
/// # Example
///
/// ```
/// use quiz_room_sync::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new("ws://localhost:8080/establish-websockets-connection")
///     .with_reconnect_delay(Some(Duration::from_secs(2)))
///     .with_leave_broadcast_delay(Duration::from_millis(100));
/// assert_eq!(config.reconnect_delay, Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket URL of the event hub.
    pub hub_url: String,
    /// Base URL of the REST backend.
    pub api_base_url: String,
    /// Client version sent in the hub handshake.
    /// Defaults to the crate version at compile time.
    pub client_version: Option<String>,
    /// Capacity of the per-session room event channel and the connection
    /// event broadcast.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long opening a transport may take.
    pub connect_timeout: Duration,
    /// How long the hub may take to answer the `connect` frame.
    pub handshake_timeout: Duration,
    /// Delay before the single automatic reconnect attempt after the hub
    /// connection drops. `None` disables automatic reconnection.
    ///
    /// Defaults to **5 seconds**.
    pub reconnect_delay: Option<Duration>,
    /// Delay before a room session retries a failed initial connect.
    pub connect_retry_delay: Duration,
    /// Timeout for the graceful close of a transport. A zero timeout aborts
    /// the transport loop immediately.
    pub shutdown_timeout: Duration,
    /// Timeout applied to every REST call.
    pub request_timeout: Duration,
    /// How long a host waits for the first timer broadcast after
    /// `start_match` before the start is reverted.
    pub start_confirm_timeout: Duration,
    /// Pause between broadcasting `sendPlayerLeft` and the `exit_room` REST
    /// call, so the broadcast reaches the hub first.
    pub leave_broadcast_delay: Duration,
    /// Points awarded locally for a correct answer when no scoreboard is
    /// available.
    pub fallback_points: u32,
}

impl SyncConfig {
    /// Create a configuration for the given hub URL with default values.
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_delay: Some(DEFAULT_RECONNECT_DELAY),
            connect_retry_delay: DEFAULT_CONNECT_RETRY_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            start_confirm_timeout: DEFAULT_START_CONFIRM_TIMEOUT,
            leave_broadcast_delay: DEFAULT_LEAVE_BROADCAST_DELAY,
            fallback_points: DEFAULT_FALLBACK_POINTS,
        }
    }

    /// Set the REST base URL. A trailing slash is removed.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set or clear the client version sent in the handshake.
    #[must_use]
    pub fn with_client_version(mut self, version: Option<String>) -> Self {
        self.client_version = version;
        self
    }

    /// Set the event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the automatic reconnect delay, or `None` to disable reconnection.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_start_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.start_confirm_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_leave_broadcast_delay(mut self, delay: Duration) -> Self {
        self.leave_broadcast_delay = delay;
        self
    }

    #[must_use]
    pub fn with_fallback_points(mut self, points: u32) -> Self {
        self.fallback_points = points;
        self
    }

    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Config`] if the text is not valid TOML or a
    /// key has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| QuizRoomError::Config(e.to_string()))?;
        Ok(file.into_config())
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Io`] if the file cannot be read and
    /// [`QuizRoomError::Config`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "loaded client configuration");
        Self::from_toml_str(&text)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_URL)
    }
}

/// On-disk shape of [`SyncConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    hub_url: Option<String>,
    api_base_url: Option<String>,
    client_version: Option<String>,
    event_channel_capacity: Option<usize>,
    connect_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    /// `0` disables automatic reconnection.
    reconnect_delay_ms: Option<u64>,
    connect_retry_delay_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    start_confirm_timeout_ms: Option<u64>,
    leave_broadcast_delay_ms: Option<u64>,
    fallback_points: Option<u32>,
}

impl ConfigFile {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::new(self.hub_url.unwrap_or_else(|| DEFAULT_HUB_URL.into()));
        if let Some(url) = self.api_base_url {
            config = config.with_api_base_url(url);
        }
        if let Some(version) = self.client_version {
            config.client_version = Some(version);
        }
        if let Some(capacity) = self.event_channel_capacity {
            config = config.with_event_channel_capacity(capacity);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect_delay = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(points) = self.fallback_points {
            config.fallback_points = points;
        }

        let millis = [
            (self.connect_timeout_ms, &mut config.connect_timeout),
            (self.handshake_timeout_ms, &mut config.handshake_timeout),
            (self.connect_retry_delay_ms, &mut config.connect_retry_delay),
            (self.shutdown_timeout_ms, &mut config.shutdown_timeout),
            (self.request_timeout_ms, &mut config.request_timeout),
            (self.start_confirm_timeout_ms, &mut config.start_confirm_timeout),
            (self.leave_broadcast_delay_ms, &mut config.leave_broadcast_delay),
        ];
        for (value, slot) in millis {
            if let Some(ms) = value {
                *slot = Duration::from_millis(ms);
            }
        }
        config
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_conventions() {
        let config = SyncConfig::default();
        assert_eq!(config.hub_url, DEFAULT_HUB_URL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.reconnect_delay, Some(Duration::from_secs(5)));
        assert_eq!(config.leave_broadcast_delay, Duration::from_millis(200));
        assert_eq!(config.fallback_points, 100);
        assert!(config.client_version.is_some());
    }

    #[test]
    fn capacity_is_clamped() {
        let config = SyncConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn api_base_url_drops_trailing_slash() {
        let config = SyncConfig::default().with_api_base_url("https://quiz.example/api/");
        assert_eq!(config.api_base_url, "https://quiz.example/api");
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = SyncConfig::from_toml_str(
            r#"
            hub_url = "wss://quiz.example/ws"
            reconnect_delay_ms = 2500
            leave_broadcast_delay_ms = 50
            fallback_points = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.hub_url, "wss://quiz.example/ws");
        assert_eq!(config.reconnect_delay, Some(Duration::from_millis(2500)));
        assert_eq!(config.leave_broadcast_delay, Duration::from_millis(50));
        assert_eq!(config.fallback_points, 250);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn zero_reconnect_delay_disables_reconnect() {
        let config = SyncConfig::from_toml_str("reconnect_delay_ms = 0").unwrap();
        assert_eq!(config.reconnect_delay, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SyncConfig::from_toml_str("hub = \"ws://x\"").unwrap_err();
        assert!(matches!(err, QuizRoomError::Config(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SyncConfig::load("/definitely/not/here/quiz.toml").unwrap_err();
        assert!(matches!(err, QuizRoomError::Io(_)));
    }
}
