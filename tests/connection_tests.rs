#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Connection manager tests against the in-process hub.

mod common;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use quiz_room_sync::protocol::{EventKind, RoomCommand};
use quiz_room_sync::{ConnectionEvent, ConnectionManager, ConnectionState, QuizRoomError};

use common::{eventually, test_config, FakeHub};

fn manager(hub: &FakeHub) -> ConnectionManager {
    ConnectionManager::new(hub.connector(), test_config())
}

fn recorder() -> (Arc<StdMutex<Vec<String>>>, quiz_room_sync::connection::RawHandler) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: quiz_room_sync::connection::RawHandler =
        Arc::new(move |body: &str| sink.lock().unwrap().push(body.to_string()));
    (seen, handler)
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("connection event channel closed")
}

// ════════════════════════════════════════════════════════════════════
// Connecting
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn concurrent_connects_open_one_transport() {
    let hub = FakeHub::new();
    hub.set_connect_delay(Duration::from_millis(50));
    let manager = manager(&hub);

    let (a, b, c) = tokio::join!(manager.connect(), manager.connect(), manager.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(hub.live_clients(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn connect_when_connected_is_a_no_op() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    manager.connect().await.unwrap();
    let epoch = manager.epoch();
    manager.connect().await.unwrap();
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(manager.epoch(), epoch);
}

#[tokio::test]
async fn refused_connect_is_reported_to_every_waiter() {
    let hub = FakeHub::new();
    hub.set_connect_delay(Duration::from_millis(30));
    hub.refuse_next(1);
    let manager = manager(&hub);

    let (a, b) = tokio::join!(manager.connect(), manager.connect());
    assert!(matches!(a, Err(QuizRoomError::Connection(_))));
    assert!(matches!(b, Err(QuizRoomError::Connection(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The next attempt starts fresh.
    manager.connect().await.unwrap();
    assert_eq!(hub.connect_count(), 2);
}

#[tokio::test]
async fn watch_state_follows_the_lifecycle() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    let mut state = manager.watch_state();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    manager.connect().await.unwrap();
    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    manager.disconnect().await;
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// Publishing and subscribing
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn publish_without_connection_fails() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    let err = manager
        .publish_command(Uuid::from_u128(1), &RoomCommand::StartMatch)
        .await
        .unwrap_err();
    assert!(matches!(err, QuizRoomError::NotConnected));
    assert!(hub.published().is_empty());
}

#[tokio::test]
async fn subscribe_without_connection_fails() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    let (_, handler) = recorder();
    let err = manager
        .subscribe("/topic/rooms/x/join", handler)
        .await
        .unwrap_err();
    assert!(matches!(err, QuizRoomError::NotConnected));
}

#[tokio::test]
async fn messages_reach_the_matching_subscription_only() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    manager.connect().await.unwrap();
    let room = Uuid::from_u128(7);

    let (joins, on_join) = recorder();
    let (exits, on_exit) = recorder();
    manager
        .subscribe(&EventKind::Join.topic(room), on_join)
        .await
        .unwrap();
    manager
        .subscribe(&EventKind::Exit.topic(room), on_exit)
        .await
        .unwrap();
    eventually(|| async { hub.subscriber_count(&EventKind::Exit.topic(room)) == 1 }).await;

    hub.broadcast_event(room, EventKind::Join, json!({ "n": 1 }));
    eventually(|| async { joins.lock().unwrap().len() == 1 }).await;
    assert!(exits.lock().unwrap().is_empty());
    assert_eq!(joins.lock().unwrap()[0], r#"{"n":1}"#);
}

#[tokio::test]
async fn published_command_is_routed_back_to_subscribers() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    manager.connect().await.unwrap();
    let room = Uuid::from_u128(7);

    let (scores, on_score) = recorder();
    manager
        .subscribe(&EventKind::ScoreUpdate.topic(room), on_score)
        .await
        .unwrap();
    manager
        .publish_command(
            room,
            &RoomCommand::PlayerScore {
                score_id: Uuid::from_u128(0x51),
                points_earned: 30,
            },
        )
        .await
        .unwrap();

    eventually(|| async { scores.lock().unwrap().len() == 1 }).await;
    let body: serde_json::Value = serde_json::from_str(&scores.lock().unwrap()[0]).unwrap();
    assert_eq!(body["pointsEarned"], 30);
    assert_eq!(hub.published_to("sendPlayerScore", room).len(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    manager.connect().await.unwrap();
    let room = Uuid::from_u128(7);
    let topic = EventKind::Timer.topic(room);

    let (ticks, on_tick) = recorder();
    let handle = manager.subscribe(&topic, on_tick).await.unwrap();
    assert!(manager.is_live(&handle));
    manager.unsubscribe(&handle).await;
    eventually(|| async { hub.subscriber_count(&topic) == 0 }).await;

    hub.broadcast(&topic, &json!({ "timeRemainingInSeconds": 3 }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ticks.lock().unwrap().is_empty());
    assert_eq!(manager.active_subscriptions().await, 0);
}

// ════════════════════════════════════════════════════════════════════
// Losing the connection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn hub_closure_reconnects_with_a_new_epoch() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    let mut events = manager.events();
    manager.connect().await.unwrap();
    let first = manager.epoch().unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected { epoch: first });

    let (_, handler) = recorder();
    let handle = manager
        .subscribe("/topic/rooms/1/join", handler)
        .await
        .unwrap();

    hub.drop_connections();
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected { will_retry, .. } => assert!(will_retry),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(!manager.is_live(&handle));
    assert_eq!(manager.active_subscriptions().await, 0);

    match next_event(&mut events).await {
        ConnectionEvent::Connected { epoch } => assert!(epoch > first),
        other => panic!("expected Connected, got {other:?}"),
    }
    assert_eq!(hub.connect_count(), 2);
}

#[tokio::test]
async fn failed_reconnect_is_reported() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    let mut events = manager.events();
    manager.connect().await.unwrap();
    let _ = next_event(&mut events).await;

    hub.refuse_next(1);
    hub.drop_connections();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::ReconnectFailed { .. }
    ));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn no_reconnect_when_disabled() {
    let hub = FakeHub::new();
    let manager = ConnectionManager::new(hub.connector(), test_config().with_reconnect_delay(None));
    let mut events = manager.events();
    manager.connect().await.unwrap();
    let _ = next_event(&mut events).await;

    hub.drop_connections();
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected { will_retry, .. } => assert!(!will_retry),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(hub.connect_count(), 1);
}

#[tokio::test]
async fn disconnect_closes_the_hub_side_and_cancels_reconnect() {
    let hub = FakeHub::new();
    let manager = manager(&hub);
    manager.connect().await.unwrap();
    assert_eq!(hub.live_clients(), 1);

    manager.disconnect().await;
    assert_eq!(hub.live_clients(), 0);
    assert_eq!(manager.epoch(), None);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(hub.connect_count(), 1);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn disconnect_during_connect_fails_the_attempt() {
    let hub = FakeHub::new();
    hub.set_connect_delay(Duration::from_millis(100));
    let manager = manager(&hub);

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.disconnect().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(QuizRoomError::Connection(_))));
    assert!(!manager.is_connected());
}
