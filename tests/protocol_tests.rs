#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for hub frames, room events and outbound commands.
//!
//! Fixtures are written as the hub sends them, so a change to a serde
//! attribute that breaks compatibility shows up here.

use serde_json::{json, Value};
use uuid::Uuid;

use quiz_room_sync::protocol::{
    ClientFrame, EventKind, RoomCommand, RoomEvent, ServerFrame, APP_DESTINATION_PREFIX,
    TOPIC_PREFIX,
};
use quiz_room_sync::{ErrorCode, QuizRoomError};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn room() -> Uuid {
    Uuid::parse_str("7c9e6679-7425-40de-944b-e07fc1f90ae7").unwrap()
}

fn score_id() -> Uuid {
    Uuid::from_u128(0x51)
}

fn to_value<T: serde::Serialize>(val: &T) -> Value {
    serde_json::to_value(val).expect("serialize")
}

fn assert_malformed(result: Result<RoomEvent, QuizRoomError>) {
    match result {
        Err(QuizRoomError::MalformedEvent { .. }) => {}
        other => panic!("expected MalformedEvent, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Client frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn connect_frame_omits_missing_version() {
    let frame = ClientFrame::Connect {
        client_id: Uuid::nil(),
        client_version: None,
    };
    assert_eq!(
        to_value(&frame),
        json!({
            "type": "connect",
            "data": { "client_id": "00000000-0000-0000-0000-000000000000" }
        })
    );
}

#[test]
fn subscribe_frame_matches_hub_schema() {
    let frame = ClientFrame::Subscribe {
        id: "sub-3".into(),
        destination: EventKind::Join.topic(room()),
    };
    assert_eq!(
        to_value(&frame),
        json!({
            "type": "subscribe",
            "data": {
                "id": "sub-3",
                "destination": "/topic/rooms/7c9e6679-7425-40de-944b-e07fc1f90ae7/join"
            }
        })
    );
}

#[test]
fn send_frame_carries_the_command_body_as_a_string() {
    let command = RoomCommand::StartMatch;
    let frame = ClientFrame::Send {
        destination: command.destination(room()),
        body: command.body(),
    };
    let value = to_value(&frame);
    assert_eq!(value["type"], "send");
    assert_eq!(value["data"]["body"], "{}");
}

#[test]
fn disconnect_frame_has_no_data() {
    let value = to_value(&ClientFrame::Disconnect);
    assert_eq!(value, json!({ "type": "disconnect" }));
}

// ════════════════════════════════════════════════════════════════════
// Server frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn connected_frame_with_session_id() {
    let frame =
        ServerFrame::parse(r#"{"type":"connected","data":{"session_id":"s-1"}}"#).unwrap();
    assert_eq!(
        frame,
        ServerFrame::Connected {
            session_id: Some("s-1".into())
        }
    );
}

#[test]
fn connected_frame_without_session_id() {
    let frame = ServerFrame::parse(r#"{"type":"connected","data":{}}"#).unwrap();
    assert_eq!(frame, ServerFrame::Connected { session_id: None });
}

#[test]
fn message_frame_keeps_the_body_verbatim() {
    let text = json!({
        "type": "message",
        "data": {
            "subscription": "sub-1",
            "destination": EventKind::Timer.topic(room()),
            "body": r#"{"timeRemainingInSeconds":3}"#
        }
    })
    .to_string();

    match ServerFrame::parse(&text).unwrap() {
        ServerFrame::Message {
            subscription, body, ..
        } => {
            assert_eq!(subscription, "sub-1");
            assert_eq!(body, r#"{"timeRemainingInSeconds":3}"#);
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[test]
fn garbage_frames_are_malformed() {
    for text in ["", "null", "[]", r#"{"type":"message"}"#, r#"{"data":{}}"#] {
        assert!(
            matches!(
                ServerFrame::parse(text),
                Err(QuizRoomError::MalformedEvent { .. })
            ),
            "{text:?} should be rejected"
        );
    }
}

// ════════════════════════════════════════════════════════════════════
// Room events
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_event_from_hub() {
    let body = json!({
        "scoreId": score_id(),
        "player": { "id": Uuid::from_u128(0xB2), "username": "bia" },
        "score": 40
    })
    .to_string();

    match RoomEvent::parse(EventKind::Join, &body).unwrap() {
        RoomEvent::PlayerJoined(join) => {
            assert_eq!(join.score_id, score_id());
            assert_eq!(join.player.username, "bia");
            assert_eq!(join.score, Some(40));
        }
        other => panic!("expected PlayerJoined, got {other:?}"),
    }
}

#[test]
fn exit_event_needs_only_the_score_id() {
    let body = json!({ "scoreId": score_id() }).to_string();
    match RoomEvent::parse(EventKind::Exit, &body).unwrap() {
        RoomEvent::PlayerExited(exit) => {
            assert_eq!(exit.score_id, score_id());
            assert!(exit.player.is_none());
        }
        other => panic!("expected PlayerExited, got {other:?}"),
    }
}

#[test]
fn score_event_tolerates_extra_fields() {
    let body = json!({
        "scoreId": score_id(),
        "pointsEarned": 25,
        "totalPoints": 90,
        "roomId": room()
    })
    .to_string();

    match RoomEvent::parse(EventKind::ScoreUpdate, &body).unwrap() {
        RoomEvent::ScoreUpdated(update) => assert_eq!(update.points_earned, 25),
        other => panic!("expected ScoreUpdated, got {other:?}"),
    }
}

#[test]
fn timer_topics_share_a_payload_but_not_a_variant() {
    let body = r#"{"timeRemainingInSeconds":10}"#;
    let tick = RoomEvent::parse(EventKind::Timer, body).unwrap();
    let countdown = RoomEvent::parse(EventKind::QuestionCountdown, body).unwrap();
    assert_eq!(tick.kind(), EventKind::Timer);
    assert_eq!(countdown.kind(), EventKind::QuestionCountdown);
    assert_ne!(tick, countdown);
}

#[test]
fn game_start_needs_a_quiz_id() {
    let ok = json!({ "quizId": Uuid::from_u128(0xD1) }).to_string();
    assert_eq!(
        RoomEvent::parse(EventKind::GameStart, &ok).unwrap().kind(),
        EventKind::GameStart
    );
    assert_malformed(RoomEvent::parse(EventKind::GameStart, "{}"));
}

#[test]
fn malformed_bodies_are_rejected_for_every_kind() {
    for kind in EventKind::ALL {
        assert_malformed(RoomEvent::parse(kind, "not json"));
        assert_malformed(RoomEvent::parse(kind, r#"{"scoreId":"not-a-uuid"}"#));
    }
}

#[test]
fn event_kinds_serialize_in_snake_case() {
    assert_eq!(to_value(&EventKind::ScoreUpdate), json!("score_update"));
    assert_eq!(
        to_value(&EventKind::QuestionCountdown),
        json!("question_countdown")
    );
    assert_eq!(EventKind::ScoreUpdate.to_string(), "update-score");
}

#[test]
fn every_topic_lives_under_its_room() {
    let prefix = format!("{TOPIC_PREFIX}/{}/", room());
    for kind in EventKind::ALL {
        let topic = kind.topic(room());
        assert!(topic.starts_with(&prefix), "{topic}");
        assert!(topic.ends_with(kind.topic_segment()));
    }
}

// ════════════════════════════════════════════════════════════════════
// Outbound commands
// ════════════════════════════════════════════════════════════════════

#[test]
fn command_bodies_use_camel_case_keys() {
    let score: Value = serde_json::from_str(
        &RoomCommand::PlayerScore {
            score_id: score_id(),
            points_earned: 15,
        }
        .body(),
    )
    .unwrap();
    assert_eq!(
        score,
        json!({ "scoreId": score_id(), "pointsEarned": 15 })
    );

    let start: Value = serde_json::from_str(
        &RoomCommand::GameStart {
            quiz_id: Uuid::from_u128(0xD1),
        }
        .body(),
    )
    .unwrap();
    assert_eq!(start, json!({ "quizId": Uuid::from_u128(0xD1) }));
}

#[test]
fn join_and_leave_differ_only_in_destination() {
    let join = RoomCommand::PlayerJoin {
        score_id: score_id(),
    };
    let leave = RoomCommand::PlayerLeft {
        score_id: score_id(),
    };
    assert_eq!(join.body(), leave.body());
    assert_eq!(
        join.destination(room()),
        format!("{APP_DESTINATION_PREFIX}/sendPlayerJoin/{}", room())
    );
    assert_eq!(
        leave.destination(room()),
        format!("{APP_DESTINATION_PREFIX}/sendPlayerLeft/{}", room())
    );
}

// ════════════════════════════════════════════════════════════════════
// Error codes
// ════════════════════════════════════════════════════════════════════

#[test]
fn error_code_round_trips_through_json() {
    let json = serde_json::to_string(&ErrorCode::ServiceUnavailable).unwrap();
    assert_eq!(json, r#""SERVICE_UNAVAILABLE""#);
    let back: ErrorCode = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ErrorCode::ServiceUnavailable);
}

#[test]
fn unknown_statuses_are_not_retried() {
    let code = ErrorCode::from_status(418);
    assert_eq!(code, ErrorCode::Unknown);
    assert!(!code.is_retryable());
    assert!(ErrorCode::from_status(503).is_retryable());
}
