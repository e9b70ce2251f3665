//! Wire types for the quiz event hub.
//!
//! Two layers travel over the transport:
//!
//! - **Envelope frames** ([`ClientFrame`], [`ServerFrame`]) carry the
//!   pub/sub plumbing: handshake, subscribe/unsubscribe, send, and message
//!   delivery. They are JSON objects of the form `{"type": ..., "data": ...}`.
//! - **Room payloads** are the JSON bodies published to `/quizAI/...`
//!   destinations ([`RoomCommand`]) and delivered on `/topic/rooms/...`
//!   topics ([`RoomEvent`]). Field names are camelCase, matching the backend.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{QuizRoomError, Result};

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Identifier of a player's scoreboard entry within one room.
pub type ScoreId = Uuid;

/// Unique identifier for users.
pub type UserId = Uuid;

/// Unique identifier for quizzes.
pub type QuizId = Uuid;

/// Unique identifier for questions.
pub type QuestionId = Uuid;

/// Unique identifier for answer options.
pub type AnswerId = Uuid;

/// Prefix of every destination the client publishes to.
pub const APP_DESTINATION_PREFIX: &str = "/quizAI";

/// Prefix of every room topic the client subscribes to.
pub const TOPIC_PREFIX: &str = "/topic/rooms";

// ── Event kinds ─────────────────────────────────────────────────────

/// The per-room topics a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Join,
    Exit,
    ScoreUpdate,
    GameStart,
    Timer,
    QuestionCountdown,
}

impl EventKind {
    /// Topics every room session subscribes to on entering the lobby.
    pub const LOBBY: [EventKind; 4] = [
        EventKind::Join,
        EventKind::Exit,
        EventKind::ScoreUpdate,
        EventKind::GameStart,
    ];

    /// Every kind, in topic declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::Join,
        EventKind::Exit,
        EventKind::ScoreUpdate,
        EventKind::GameStart,
        EventKind::Timer,
        EventKind::QuestionCountdown,
    ];

    /// Last path segment of this kind's topic.
    pub fn topic_segment(self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Exit => "exit",
            EventKind::ScoreUpdate => "update-score",
            EventKind::GameStart => "game-start",
            EventKind::Timer => "timer",
            EventKind::QuestionCountdown => "question-countdown",
        }
    }

    /// Canonical topic for this kind in `room_id`.
    pub fn topic(self, room_id: RoomId) -> String {
        format!("{TOPIC_PREFIX}/{room_id}/{}", self.topic_segment())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.topic_segment())
    }
}

// ── Event payloads ──────────────────────────────────────────────────

/// Public identity of a player as carried in events and scoreboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: UserId,
    pub username: String,
}

/// Body of a `join` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub score_id: ScoreId,
    pub player: PlayerInfo,
    /// Points the player already had, when the hub knows them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

/// Body of an `exit` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitPayload {
    pub score_id: ScoreId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerInfo>,
}

/// Body of an `update-score` broadcast. `points_earned` is a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdatePayload {
    pub score_id: ScoreId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerInfo>,
    pub points_earned: u32,
}

/// Body of a `game-start` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartPayload {
    pub quiz_id: QuizId,
}

/// Body of a `timer` or `question-countdown` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPayload {
    pub time_remaining_in_seconds: u32,
}

/// A typed event received on a room topic.
///
/// Produced by [`RoomEvent::parse`]; a body that does not match the schema
/// of its topic is rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    PlayerJoined(JoinPayload),
    PlayerExited(ExitPayload),
    ScoreUpdated(ScoreUpdatePayload),
    GameStarted(GameStartPayload),
    TimerTick(TimerPayload),
    QuestionCountdown(TimerPayload),
}

impl RoomEvent {
    /// Parse the body of a message delivered on the topic for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::MalformedEvent`] if the body is not valid JSON
    /// or does not match the payload schema of `kind`.
    pub fn parse(kind: EventKind, body: &str) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(kind: EventKind, body: &str) -> Result<T> {
            serde_json::from_str(body).map_err(|e| QuizRoomError::MalformedEvent {
                context: format!("{kind} event"),
                reason: e.to_string(),
            })
        }

        Ok(match kind {
            EventKind::Join => RoomEvent::PlayerJoined(decode(kind, body)?),
            EventKind::Exit => RoomEvent::PlayerExited(decode(kind, body)?),
            EventKind::ScoreUpdate => RoomEvent::ScoreUpdated(decode(kind, body)?),
            EventKind::GameStart => RoomEvent::GameStarted(decode(kind, body)?),
            EventKind::Timer => RoomEvent::TimerTick(decode(kind, body)?),
            EventKind::QuestionCountdown => RoomEvent::QuestionCountdown(decode(kind, body)?),
        })
    }

    /// The topic kind this event arrives on.
    pub fn kind(&self) -> EventKind {
        match self {
            RoomEvent::PlayerJoined(_) => EventKind::Join,
            RoomEvent::PlayerExited(_) => EventKind::Exit,
            RoomEvent::ScoreUpdated(_) => EventKind::ScoreUpdate,
            RoomEvent::GameStarted(_) => EventKind::GameStart,
            RoomEvent::TimerTick(_) => EventKind::Timer,
            RoomEvent::QuestionCountdown(_) => EventKind::QuestionCountdown,
        }
    }
}

// ── Outbound commands ───────────────────────────────────────────────

/// A message the client publishes to the hub for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCommand {
    /// Announce arrival in the room.
    PlayerJoin { score_id: ScoreId },
    /// Announce departure from the room.
    PlayerLeft { score_id: ScoreId },
    /// Broadcast a score delta.
    PlayerScore {
        score_id: ScoreId,
        points_earned: u32,
    },
    /// Host asks the hub to start the pre-game countdown.
    StartMatch,
    /// Host starts gameplay with the given quiz.
    GameStart { quiz_id: QuizId },
}

impl RoomCommand {
    /// Destination this command is published to for `room_id`.
    pub fn destination(&self, room_id: RoomId) -> String {
        let action = match self {
            RoomCommand::PlayerJoin { .. } => "sendPlayerJoin",
            RoomCommand::PlayerLeft { .. } => "sendPlayerLeft",
            RoomCommand::PlayerScore { .. } => "sendPlayerScore",
            RoomCommand::StartMatch => "sendStartMatch",
            RoomCommand::GameStart { .. } => "sendGameStart",
        };
        format!("{APP_DESTINATION_PREFIX}/{action}/{room_id}")
    }

    /// JSON body of this command.
    pub fn body(&self) -> String {
        let value = match self {
            RoomCommand::PlayerJoin { score_id } | RoomCommand::PlayerLeft { score_id } => {
                json!({ "scoreId": score_id })
            }
            RoomCommand::PlayerScore {
                score_id,
                points_earned,
            } => json!({ "scoreId": score_id, "pointsEarned": points_earned }),
            RoomCommand::StartMatch => json!({}),
            RoomCommand::GameStart { quiz_id } => json!({ "quizId": quiz_id }),
        };
        value.to_string()
    }
}

// ── Envelope frames ─────────────────────────────────────────────────

/// Frames sent from the client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the session. Must be the first frame on a transport.
    Connect {
        client_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    /// Start receiving messages published on `destination`.
    Subscribe { id: String, destination: String },
    /// Stop the subscription with the given id.
    Unsubscribe { id: String },
    /// Publish `body` to `destination`.
    Send { destination: String, body: String },
    /// Close the session.
    Disconnect,
}

/// Frames sent from the hub to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// A message delivered on one of the client's subscriptions.
    Message {
        subscription: String,
        destination: String,
        body: String,
    },
    /// The hub reported a protocol error.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ServerFrame {
    /// Parse one text frame received from the hub.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::MalformedEvent`] for anything that is not a
    /// known frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| QuizRoomError::MalformedEvent {
            context: "hub frame".into(),
            reason: e.to_string(),
        })
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

    fn room() -> RoomId {
        Uuid::from_u128(0x1)
    }

    #[test]
    fn topics_follow_room_layout() {
        let id = room();
        assert_eq!(EventKind::Join.topic(id), format!("/topic/rooms/{id}/join"));
        assert_eq!(
            EventKind::ScoreUpdate.topic(id),
            format!("/topic/rooms/{id}/update-score")
        );
        assert_eq!(
            EventKind::GameStart.topic(id),
            format!("/topic/rooms/{id}/game-start")
        );
    }

    #[test]
    fn lobby_kinds_exclude_timers() {
        assert!(!EventKind::LOBBY.contains(&EventKind::Timer));
        assert!(!EventKind::LOBBY.contains(&EventKind::QuestionCountdown));
        assert_eq!(EventKind::ALL.len(), 6);
    }

    #[test]
    fn commands_target_app_destinations() {
        let id = room();
        let score_id = Uuid::from_u128(0x51);
        let cmd = RoomCommand::PlayerScore {
            score_id,
            points_earned: 15,
        };
        assert_eq!(cmd.destination(id), format!("/quizAI/sendPlayerScore/{id}"));

        let body: serde_json::Value = serde_json::from_str(&cmd.body()).unwrap();
        assert_eq!(body["scoreId"], score_id.to_string());
        assert_eq!(body["pointsEarned"], 15);

        assert_eq!(RoomCommand::StartMatch.body(), "{}");
    }

    #[test]
    fn join_event_parses_optional_score() {
        let body = r#"{
            "scoreId": "00000000-0000-0000-0000-000000000051",
            "player": {"id": "00000000-0000-0000-0000-0000000000a1", "username": "ana"}
        }"#;
        let event = RoomEvent::parse(EventKind::Join, body).unwrap();
        match event {
            RoomEvent::PlayerJoined(p) => {
                assert_eq!(p.player.username, "ana");
                assert_eq!(p.score, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn body_for_wrong_topic_is_malformed() {
        let err = RoomEvent::parse(EventKind::ScoreUpdate, r#"{"quizId":"x"}"#).unwrap_err();
        match err {
            QuizRoomError::MalformedEvent { context, .. } => {
                assert_eq!(context, "update-score event");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn negative_delta_is_rejected() {
        let body = r#"{"scoreId":"00000000-0000-0000-0000-000000000051","pointsEarned":-5}"#;
        assert!(RoomEvent::parse(EventKind::ScoreUpdate, body).is_err());
    }

    #[test]
    fn client_frames_are_adjacently_tagged() {
        let frame = ClientFrame::Subscribe {
            id: "sub-1".into(),
            destination: "/topic/rooms/x/join".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["data"]["id"], "sub-1");

        let json = serde_json::to_string(&ClientFrame::Disconnect).unwrap();
        assert_eq!(json, r#"{"type":"disconnect"}"#);
    }

    #[test]
    fn server_error_frame_parses_without_detail() {
        let frame = ServerFrame::parse(r#"{"type":"error","data":{"message":"bad"}}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Error {
                message: "bad".into(),
                detail: None
            }
        );
    }

    #[test]
    fn unknown_server_frame_is_malformed() {
        let err = ServerFrame::parse(r#"{"type":"receipt","data":{}}"#).unwrap_err();
        assert!(matches!(err, QuizRoomError::MalformedEvent { .. }));
    }
}
