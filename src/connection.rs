//! Connection manager for the event hub.
//!
//! [`ConnectionManager`] owns at most one transport at a time. A background
//! transport loop multiplexes outgoing frames, the shutdown signal and
//! incoming hub frames with `tokio::select!`, and routes every delivered
//! message to the handler registered for its subscription id.
//!
//! `connect()` is race-safe: while an attempt is in flight every caller
//! awaits the same shared result, so concurrent callers never open a second
//! transport. When the transport drops unexpectedly the manager clears its
//! subscriptions, broadcasts [`ConnectionEvent::Disconnected`], and schedules
//! a single reconnect attempt. It never resubscribes on its own; room
//! sessions do that when they observe a new [`ConnectionEvent::Connected`].
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(WebSocketConnector::from_config(&config), config);
//! manager.connect().await?;
//! let handle = manager
//!     .subscribe("/topic/rooms/42/join", Arc::new(|body: &str| println!("{body}")))
//!     .await?;
//! manager.publish("/quizAI/sendPlayerJoin/42", r#"{"scoreId":"..."}"#.into()).await?;
//! manager.unsubscribe(&handle).await;
//! manager.disconnect().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{QuizRoomError, Result};
use crate::protocol::{ClientFrame, RoomCommand, RoomId, ServerFrame};
use crate::transport::{Connector, Transport};

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle notifications broadcast by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A new connection is up. `epoch` increases with every connection;
    /// subscriptions made on older epochs are gone.
    Connected { epoch: u64 },
    /// The connection went down. `will_retry` is `true` when a reconnect
    /// attempt has been scheduled.
    Disconnected {
        reason: Option<String>,
        will_retry: bool,
    },
    /// The scheduled reconnect attempt failed. No further attempt is made.
    ReconnectFailed { reason: String },
}

/// Callback invoked with the raw body of every message on a subscription.
///
/// Runs on the transport loop task and must not block.
pub type RawHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Opaque handle for a raw subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: String,
    destination: String,
    epoch: u64,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Connection epoch the subscription was made on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

// ── Shared state ────────────────────────────────────────────────────

type PendingConnect = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

enum Link {
    Disconnected,
    Connecting {
        attempt: u64,
        pending: PendingConnect,
    },
    Connected(ActiveLink),
}

/// Handles to a running transport loop.
struct ActiveLink {
    epoch: u64,
    cmd_tx: mpsc::UnboundedSender<ClientFrame>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ActiveLink {
    /// Ask the loop to close the transport, then wait up to `timeout` before
    /// aborting it.
    async fn shutdown(mut self, timeout: std::time::Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!(epoch = self.epoch, "transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

struct Route {
    destination: String,
    handler: RawHandler,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    client_id: Uuid,
    /// Lock order: `link` before `routes`.
    link: Mutex<Link>,
    routes: Mutex<HashMap<String, Route>>,
    events: broadcast::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// Last epoch handed out.
    epoch: AtomicU64,
    /// Epoch of the live connection, 0 when not connected.
    live_epoch: AtomicU64,
    attempt: AtomicU64,
    /// Bumped by every explicit `disconnect()`; cancels scheduled reconnects.
    disconnects: AtomicU64,
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!("no connection event listeners");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // No executor context here, so the loop is aborted rather than
        // shut down gracefully.
        if let Link::Connected(active) = self.link.get_mut() {
            if let Some(task) = active.task.take() {
                task.abort();
            }
        }
    }
}

// ── Manager handle ──────────────────────────────────────────────────

/// Cloneable handle to the single hub connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a disconnected manager. Nothing is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(connector: impl Connector, config: SyncConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                client_id: Uuid::new_v4(),
                link: Mutex::new(Link::Disconnected),
                routes: Mutex::new(HashMap::new()),
                events,
                state_tx,
                epoch: AtomicU64::new(0),
                live_epoch: AtomicU64::new(0),
                attempt: AtomicU64::new(0),
                disconnects: AtomicU64::new(0),
            }),
        }
    }

    /// Connect to the hub, or join the attempt already in flight.
    ///
    /// Resolves immediately when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Connection`] if the transport could not be
    /// opened, the handshake failed, or the attempt was abandoned by
    /// [`disconnect`](Self::disconnect). Every concurrent caller receives the
    /// same outcome.
    pub async fn connect(&self) -> Result<()> {
        let pending = {
            let mut link = self.inner.link.lock().await;
            match &*link {
                Link::Connected(_) => return Ok(()),
                Link::Connecting { pending, .. } => pending.clone(),
                Link::Disconnected => {
                    let attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(attempt, "opening event hub connection");
                    let task = tokio::spawn(open_link(Arc::clone(&self.inner), attempt));
                    let pending = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(join_err) => Err(format!("connect task failed: {join_err}")),
                        }
                    }
                    .boxed()
                    .shared();
                    *link = Link::Connecting {
                        attempt,
                        pending: pending.clone(),
                    };
                    self.inner.set_state(ConnectionState::Connecting);
                    pending
                }
            }
        };
        pending.await.map_err(QuizRoomError::Connection)
    }

    /// Close the connection and drop every raw subscription.
    ///
    /// Cancels a scheduled reconnect and makes an in-flight connect attempt
    /// fail. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut link = self.inner.link.lock().await;
            let previous = std::mem::replace(&mut *link, Link::Disconnected);
            self.inner.live_epoch.store(0, Ordering::SeqCst);
            self.inner.routes.lock().await.clear();
            self.inner.set_state(ConnectionState::Disconnected);
            previous
        };

        match previous {
            Link::Connected(active) => {
                let epoch = active.epoch;
                active.shutdown(self.inner.config.shutdown_timeout).await;
                info!(epoch, "disconnected from event hub");
                self.inner.emit(ConnectionEvent::Disconnected {
                    reason: Some("client disconnected".into()),
                    will_retry: false,
                });
            }
            Link::Connecting { attempt, .. } => {
                debug!(attempt, "abandoning in-flight connect attempt");
            }
            Link::Disconnected => {}
        }
    }

    /// Publish `body` to `destination`.
    ///
    /// Fire-and-forget: success means the frame was queued for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::NotConnected`] (and logs a warning) when there
    /// is no live connection.
    pub async fn publish(&self, destination: &str, body: String) -> Result<()> {
        let link = self.inner.link.lock().await;
        let Link::Connected(active) = &*link else {
            warn!(destination, "dropping publish while not connected");
            return Err(QuizRoomError::NotConnected);
        };
        active
            .cmd_tx
            .send(ClientFrame::Send {
                destination: destination.to_string(),
                body,
            })
            .map_err(|_| QuizRoomError::NotConnected)
    }

    /// Publish a room command to its destination.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub async fn publish_command(&self, room_id: RoomId, command: &RoomCommand) -> Result<()> {
        self.publish(&command.destination(room_id), command.body())
            .await
    }

    /// Register `handler` for messages on `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::NotConnected`] when there is no live connection.
    pub async fn subscribe(
        &self,
        destination: &str,
        handler: RawHandler,
    ) -> Result<SubscriptionHandle> {
        let link = self.inner.link.lock().await;
        let Link::Connected(active) = &*link else {
            return Err(QuizRoomError::NotConnected);
        };

        let id = format!("sub-{}", Uuid::new_v4().simple());
        let mut routes = self.inner.routes.lock().await;
        routes.insert(
            id.clone(),
            Route {
                destination: destination.to_string(),
                handler,
            },
        );
        let frame = ClientFrame::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
        };
        if active.cmd_tx.send(frame).is_err() {
            routes.remove(&id);
            return Err(QuizRoomError::NotConnected);
        }

        debug!(destination, subscription = %id, epoch = active.epoch, "subscribed");
        Ok(SubscriptionHandle {
            id,
            destination: destination.to_string(),
            epoch: active.epoch,
        })
    }

    /// Cancel a raw subscription. No-op if it is already gone.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let link = self.inner.link.lock().await;
        let removed = self.inner.routes.lock().await.remove(&handle.id);
        if let (Some(route), Link::Connected(active)) = (removed, &*link) {
            if active.epoch == handle.epoch {
                let _ = active.cmd_tx.send(ClientFrame::Unsubscribe {
                    id: handle.id.clone(),
                });
            }
            debug!(destination = %route.destination, subscription = %handle.id, "unsubscribed");
        }
    }

    /// Returns `true` if `handle` belongs to the live connection.
    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        handle.epoch != 0 && self.inner.live_epoch.load(Ordering::SeqCst) == handle.epoch
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Epoch of the live connection, if any.
    pub fn epoch(&self) -> Option<u64> {
        match self.inner.live_epoch.load(Ordering::SeqCst) {
            0 => None,
            epoch => Some(epoch),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of raw subscriptions on the live connection.
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.routes.lock().await.len()
    }

    /// Client id sent in the hub handshake.
    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("client_id", &self.inner.client_id)
            .finish()
    }
}

// ── Connecting ──────────────────────────────────────────────────────

/// Open a transport and run the hub handshake.
async fn establish(inner: &Inner) -> Result<Box<dyn Transport>> {
    let config = &inner.config;
    let mut transport = tokio::time::timeout(config.connect_timeout, inner.connector.connect())
        .await
        .map_err(|_| QuizRoomError::Timeout)??;

    let hello = ClientFrame::Connect {
        client_id: inner.client_id,
        client_version: config.client_version.clone(),
    };
    transport.send(serde_json::to_string(&hello)?).await?;

    let reply = match tokio::time::timeout(config.handshake_timeout, transport.recv()).await {
        Ok(Some(Ok(text))) => ServerFrame::parse(&text),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(QuizRoomError::Connection(
            "hub closed the connection during the handshake".into(),
        )),
        Err(_) => Err(QuizRoomError::Connection(
            "hub did not answer the handshake in time".into(),
        )),
    };

    match reply {
        Ok(ServerFrame::Connected { session_id }) => {
            debug!(?session_id, "hub accepted handshake");
            Ok(transport)
        }
        Ok(ServerFrame::Error { message, detail }) => {
            let _ = transport.close().await;
            Err(QuizRoomError::Connection(match detail {
                Some(detail) => format!("hub rejected connection: {message} ({detail})"),
                None => format!("hub rejected connection: {message}"),
            }))
        }
        Ok(ServerFrame::Message { destination, .. }) => {
            let _ = transport.close().await;
            Err(QuizRoomError::Connection(format!(
                "unexpected message for {destination} before handshake"
            )))
        }
        Err(e) => {
            let _ = transport.close().await;
            Err(e)
        }
    }
}

/// Run one connect attempt and install the link if it is still wanted.
async fn open_link(inner: Arc<Inner>, attempt: u64) -> std::result::Result<(), String> {
    let result = establish(&inner).await;

    let mut link = inner.link.lock().await;
    let current = matches!(&*link, Link::Connecting { attempt: a, .. } if *a == attempt);

    match result {
        Ok(transport) if current => {
            let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let task = tokio::spawn(transport_loop(
                transport,
                cmd_rx,
                shutdown_rx,
                Arc::downgrade(&inner),
                epoch,
            ));
            *link = Link::Connected(ActiveLink {
                epoch,
                cmd_tx,
                shutdown_tx: Some(shutdown_tx),
                task: Some(task),
            });
            inner.live_epoch.store(epoch, Ordering::SeqCst);
            inner.set_state(ConnectionState::Connected);
            drop(link);

            info!(epoch, "connected to event hub");
            inner.emit(ConnectionEvent::Connected { epoch });
            Ok(())
        }
        Ok(mut transport) => {
            drop(link);
            debug!(attempt, "connect attempt superseded; closing transport");
            let _ = transport.close().await;
            Err("connection attempt cancelled".into())
        }
        Err(e) => {
            if current {
                *link = Link::Disconnected;
                inner.set_state(ConnectionState::Disconnected);
            }
            drop(link);
            warn!(attempt, error = %e, "failed to connect to event hub");
            Err(match e {
                QuizRoomError::Connection(reason) => reason,
                other => other.to_string(),
            })
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop for one connection epoch.
///
/// Exits quietly when the manager replaces the link (shutdown signal or
/// command channel closed). Any other exit is an unexpected loss and is
/// reported through [`link_lost`].
async fn transport_loop(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientFrame>,
    mut shutdown_rx: oneshot::Receiver<()>,
    inner: Weak<Inner>,
    epoch: u64,
) {
    debug!(epoch, "transport loop started");

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => {
                            if let Err(e) = transport.send(json).await {
                                error!(epoch, "transport send error: {e}");
                                break Some(format!("transport send error: {e}"));
                            }
                        }
                        Err(e) => error!("failed to serialize client frame: {e}"),
                    },
                    None => {
                        debug!(epoch, "command channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        return;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!(epoch, "shutdown signal received");
                if let Ok(json) = serde_json::to_string(&ClientFrame::Disconnect) {
                    let _ = transport.send(json).await;
                }
                let _ = transport.close().await;
                return;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        let Some(inner) = inner.upgrade() else {
                            let _ = transport.close().await;
                            return;
                        };
                        dispatch(&inner, &text).await;
                    }
                    Some(Err(e)) => {
                        error!(epoch, "transport receive error: {e}");
                        break Some(format!("transport receive error: {e}"));
                    }
                    None => {
                        debug!(epoch, "transport closed by hub");
                        break None;
                    }
                }
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        link_lost(&inner, epoch, reason).await;
    }
    debug!(epoch, "transport loop exited");
}

/// Route one incoming frame.
async fn dispatch(inner: &Inner, text: &str) {
    match ServerFrame::parse(text) {
        Ok(ServerFrame::Message {
            subscription,
            destination,
            body,
        }) => {
            let handler = inner
                .routes
                .lock()
                .await
                .get(&subscription)
                .map(|route| Arc::clone(&route.handler));
            match handler {
                Some(handler) => handler(&body),
                None => debug!(%subscription, %destination, "message for unknown subscription"),
            }
        }
        Ok(ServerFrame::Error { message, detail }) => {
            warn!(%message, ?detail, "hub reported an error");
        }
        Ok(ServerFrame::Connected { .. }) => debug!("ignoring repeated connected frame"),
        Err(e) => warn!(error = %e, "dropping unparsable hub frame"),
    }
}

/// Tear down after an unexpected loss and schedule the reconnect attempt.
async fn link_lost(inner: &Arc<Inner>, epoch: u64, reason: Option<String>) {
    {
        let mut link = inner.link.lock().await;
        match &*link {
            Link::Connected(active) if active.epoch == epoch => {}
            _ => return,
        }
        *link = Link::Disconnected;
        inner.live_epoch.store(0, Ordering::SeqCst);
        inner.routes.lock().await.clear();
        inner.set_state(ConnectionState::Disconnected);
    }

    let delay = inner.config.reconnect_delay;
    warn!(epoch, ?reason, will_retry = delay.is_some(), "lost connection to event hub");
    inner.emit(ConnectionEvent::Disconnected {
        reason,
        will_retry: delay.is_some(),
    });

    let Some(delay) = delay else {
        return;
    };
    let generation = inner.disconnects.load(Ordering::SeqCst);
    reconnect::schedule(Arc::downgrade(inner), delay, generation);
}

/// The reconnect task awaits `connect`, whose future leads back to
/// `link_lost`. Spawning it from a child module keeps that cycle out of the
/// opaque types of this one, so the task can be proven `Send`.
mod reconnect {
    use std::sync::atomic::Ordering;
    use std::sync::Weak;
    use std::time::Duration;

    use tracing::{debug, info, warn};

    use super::{ConnectionEvent, ConnectionManager, Inner};

    /// Reconnect after `delay` unless a `disconnect` happened since
    /// `generation` was read.
    pub(super) fn schedule(weak: Weak<Inner>, delay: Duration, generation: u64) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disconnects.load(Ordering::SeqCst) != generation {
                debug!("scheduled reconnect cancelled by disconnect");
                return;
            }
            let manager = ConnectionManager { inner };
            match manager.connect().await {
                Ok(()) => info!("reconnected to event hub"),
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    manager.inner.emit(ConnectionEvent::ReconnectFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });
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
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    // ── Scripted transport ──────────────────────────────────────────

    /// Transport fed from a channel; records what the client sends.
    struct ChannelTransport {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Connector whose transports answer the handshake automatically.
    struct ScriptedConnector {
        opened: Arc<AtomicUsize>,
        to_client: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(r#"{"type":"connected","data":{}}"#.to_string())
                .unwrap();
            *self.to_client.lock().unwrap() = Some(tx);
            Ok(Box::new(ChannelTransport {
                incoming: rx,
                sent: Arc::clone(&self.sent),
            }))
        }
    }

    struct Fixture {
        manager: ConnectionManager,
        opened: Arc<AtomicUsize>,
        to_client: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    fn fixture(delay: Duration) -> Fixture {
        let opened = Arc::new(AtomicUsize::new(0));
        let to_client = Arc::new(StdMutex::new(None));
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let connector = ScriptedConnector {
            opened: Arc::clone(&opened),
            to_client: Arc::clone(&to_client),
            sent: Arc::clone(&sent),
            delay,
        };
        let config = SyncConfig::default().with_reconnect_delay(None);
        Fixture {
            manager: ConnectionManager::new(connector, config),
            opened,
            to_client,
            sent,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_connects_share_one_transport() {
        let f = fixture(Duration::from_millis(30));
        let (a, b, c) = tokio::join!(f.manager.connect(), f.manager.connect(), f.manager.connect());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(f.opened.load(Ordering::SeqCst), 1);
        assert!(f.manager.is_connected());
        assert_eq!(f.manager.epoch(), Some(1));
    }

    #[tokio::test]
    async fn handshake_is_first_frame() {
        let f = fixture(Duration::ZERO);
        f.manager.connect().await.unwrap();
        let first = f.sent.lock().unwrap()[0].clone();
        let frame: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(frame["type"], "connect");
        assert_eq!(frame["data"]["client_id"], f.manager.client_id().to_string());
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_rejected() {
        let f = fixture(Duration::ZERO);
        let err = f
            .manager
            .publish("/quizAI/sendStartMatch/x", "{}".into())
            .await
            .unwrap_err();
        assert!(matches!(err, QuizRoomError::NotConnected));
    }

    #[tokio::test]
    async fn messages_reach_the_matching_handler() {
        let f = fixture(Duration::ZERO);
        f.manager.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = f
            .manager
            .subscribe(
                "/topic/rooms/r/join",
                Arc::new(move |body: &str| {
                    let _ = tx.send(body.to_string());
                }),
            )
            .await
            .unwrap();

        let sender = f.to_client.lock().unwrap().clone().unwrap();
        sender
            .send(
                serde_json::json!({
                    "type": "message",
                    "data": {"subscription": "other", "destination": "/x", "body": "skip"}
                })
                .to_string(),
            )
            .unwrap();
        sender.send("garbage".into()).unwrap();
        sender
            .send(
                serde_json::json!({
                    "type": "message",
                    "data": {"subscription": handle.id(), "destination": "/topic/rooms/r/join", "body": "hello"}
                })
                .to_string(),
            )
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, "hello");
        assert!(f.manager.is_live(&handle));
    }

    #[tokio::test]
    async fn hub_closure_clears_subscriptions() {
        let f = fixture(Duration::ZERO);
        let mut events = f.manager.events();
        f.manager.connect().await.unwrap();
        let handle = f
            .manager
            .subscribe("/topic/rooms/r/exit", Arc::new(|_: &str| {}))
            .await
            .unwrap();

        // Dropping the sender ends the scripted stream.
        f.to_client.lock().unwrap().take();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ConnectionEvent::Disconnected { will_retry, .. } = event {
                assert!(!will_retry);
                break;
            }
        }
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        assert!(!f.manager.is_live(&handle));
        assert_eq!(f.manager.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn disconnect_fails_in_flight_connect() {
        let f = fixture(Duration::from_millis(100));
        let manager = f.manager.clone();
        let pending = tokio::spawn(async move { manager.connect().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.manager.disconnect().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(QuizRoomError::Connection(_))));
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
    }
}
