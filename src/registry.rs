//! Per-room topic subscriptions.
//!
//! [`SubscriptionRegistry`] keeps at most one live subscription per
//! `(room, kind)` pair. Message bodies are parsed into [`RoomEvent`]s before
//! they reach the handler; a body that fails to parse is logged and dropped so
//! other subscriptions keep receiving.
//!
//! Subscriptions made with [`SubscriptionRegistry::subscribe_channel`] belong
//! to the receiving end of their channel. Once that receiver is gone the entry
//! is orphaned: it no longer blocks a new subscription for the same pair and
//! [`SubscriptionRegistry::release_orphaned`] removes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::connection::{ConnectionManager, SubscriptionHandle};
use crate::error::Result;
use crate::protocol::{EventKind, RoomEvent, RoomId};

type Key = (RoomId, EventKind);

struct Entry {
    handle: SubscriptionHandle,
    sink: Option<mpsc::Sender<RoomEvent>>,
}

impl Entry {
    fn is_orphaned(&self) -> bool {
        self.sink.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Registry of room topic subscriptions on a shared [`ConnectionManager`].
#[derive(Clone)]
pub struct SubscriptionRegistry {
    connection: ConnectionManager,
    entries: Arc<Mutex<HashMap<Key, Entry>>>,
}

impl SubscriptionRegistry {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe `handler` to the `kind` topic of `room_id`.
    ///
    /// Returns `Ok(false)` without subscribing when a live subscription for
    /// the pair already exists. An entry left over from a previous connection
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::NotConnected`](crate::QuizRoomError::NotConnected)
    /// if the hub connection is down.
    pub async fn subscribe<F>(&self, room_id: RoomId, kind: EventKind, handler: F) -> Result<bool>
    where
        F: Fn(RoomEvent) + Send + Sync + 'static,
    {
        self.insert(room_id, kind, handler, None).await
    }

    /// Subscribe the `kind` topic of `room_id`, delivering into `tx`.
    ///
    /// Events that do not fit in the channel are dropped with a warning. An
    /// existing entry whose receiver has been dropped is replaced.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn subscribe_channel(
        &self,
        room_id: RoomId,
        kind: EventKind,
        tx: mpsc::Sender<RoomEvent>,
    ) -> Result<bool> {
        let sink = tx.clone();
        let handler = move |event: RoomEvent| match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(%room_id, kind = %dropped.kind(), "room event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%room_id, %kind, "room event receiver gone, dropping event");
            }
        };
        self.insert(room_id, kind, handler, Some(sink)).await
    }

    async fn insert<F>(
        &self,
        room_id: RoomId,
        kind: EventKind,
        handler: F,
        sink: Option<mpsc::Sender<RoomEvent>>,
    ) -> Result<bool>
    where
        F: Fn(RoomEvent) + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&(room_id, kind)) {
            if existing.is_orphaned() {
                debug!(%room_id, %kind, "replacing subscription of a dropped receiver");
                self.connection.unsubscribe(&existing.handle).await;
            } else if self.connection.is_live(&existing.handle) {
                warn!(%room_id, %kind, "already subscribed; ignoring duplicate subscribe");
                return Ok(false);
            } else {
                debug!(%room_id, %kind, epoch = existing.handle.epoch(), "replacing stale subscription");
            }
        }

        let raw = move |body: &str| match RoomEvent::parse(kind, body) {
            Ok(event) => handler(event),
            Err(e) => warn!(%room_id, %kind, error = %e, "dropping malformed room event"),
        };
        let handle = self
            .connection
            .subscribe(&kind.topic(room_id), Arc::new(raw))
            .await?;
        entries.insert((room_id, kind), Entry { handle, sink });
        Ok(true)
    }

    /// Cancel the subscription for `(room_id, kind)`. No-op if absent.
    pub async fn unsubscribe(&self, room_id: RoomId, kind: EventKind) {
        let removed = self.entries.lock().await.remove(&(room_id, kind));
        if let Some(entry) = removed {
            self.connection.unsubscribe(&entry.handle).await;
        }
    }

    /// Cancel every subscription of `room_id`. Returns how many were removed.
    pub async fn unsubscribe_all(&self, room_id: RoomId) -> usize {
        let removed = self.remove_where(|(room, _), _| *room == room_id).await;
        if removed > 0 {
            debug!(%room_id, count = removed, "unsubscribed room topics");
        }
        removed
    }

    /// Cancel the subscriptions of `room_id` whose channel receiver is gone.
    /// Subscriptions with a live receiver are kept.
    pub async fn release_orphaned(&self, room_id: RoomId) -> usize {
        let removed = self
            .remove_where(|(room, _), entry| *room == room_id && entry.is_orphaned())
            .await;
        if removed > 0 {
            debug!(%room_id, count = removed, "released orphaned room topics");
        }
        removed
    }

    async fn remove_where(&self, select: impl Fn(&Key, &Entry) -> bool) -> usize {
        let removed: Vec<Entry> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<Key> = entries
                .iter()
                .filter(|(key, entry)| select(*key, *entry))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        for entry in &removed {
            self.connection.unsubscribe(&entry.handle).await;
        }
        removed.len()
    }

    /// Cancel every subscription of every room.
    pub async fn clear(&self) -> usize {
        let removed: Vec<Entry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        for entry in &removed {
            self.connection.unsubscribe(&entry.handle).await;
        }
        removed.len()
    }

    /// Returns `true` if a live, owned subscription exists for
    /// `(room_id, kind)`.
    pub async fn is_subscribed(&self, room_id: RoomId, kind: EventKind) -> bool {
        self.entries
            .lock()
            .await
            .get(&(room_id, kind))
            .is_some_and(|entry| self.is_active(entry))
    }

    /// Kinds with a live subscription for `room_id`, sorted.
    pub async fn active_kinds(&self, room_id: RoomId) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|((room, _), entry)| *room == room_id && self.is_active(entry))
            .map(|((_, kind), _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn is_active(&self, entry: &Entry) -> bool {
        !entry.is_orphaned() && self.connection.is_live(&entry.handle)
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
