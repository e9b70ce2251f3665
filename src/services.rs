//! Contracts of the REST collaborators.
//!
//! Room sessions never talk HTTP directly; they call these traits. The
//! `http-backend` feature provides [`HttpBackend`](crate::HttpBackend), which
//! implements all of them against the quiz backend. Tests plug in fakes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{LocalUser, Quiz, Room, RoomSettings, ScoreEntry, Scoreboard};
use crate::protocol::{AnswerId, PlayerInfo, QuestionId, QuizId, RoomId, ScoreId, UserId};

// ── DTOs ────────────────────────────────────────────────────────────

/// A scoreboard row as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardDto {
    pub id: ScoreId,
    pub player: PlayerInfo,
    #[serde(default, alias = "points")]
    pub score: u32,
}

impl From<ScoreboardDto> for ScoreEntry {
    fn from(dto: ScoreboardDto) -> Self {
        ScoreEntry {
            score_id: dto.id,
            player_id: dto.player.id,
            username: dto.player.username,
            points: dto.score,
        }
    }
}

/// Response of `POST /rooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub id: RoomId,
    #[serde(alias = "code")]
    pub room_code: String,
    pub is_public: bool,
    #[serde(alias = "maxNumberOfPlayersInRoom")]
    pub max_number_of_players: u32,
    /// Present when the backend created the owner's scoreboard together with
    /// the room.
    #[serde(default)]
    pub owner_scoreboard: Option<ScoreboardDto>,
}

impl CreatedRoom {
    /// Build the local room snapshot, owned by `owner`.
    pub fn to_room(&self, owner: &LocalUser) -> Room {
        let scoreboard = self
            .owner_scoreboard
            .iter()
            .cloned()
            .map(ScoreEntry::from)
            .collect();
        Room {
            id: self.id,
            code: self.room_code.clone(),
            is_public: self.is_public,
            max_players: self.max_number_of_players,
            owner_id: owner.id,
            quiz_id: None,
            scoreboard,
        }
    }
}

/// Response of `POST /rooms/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    pub room_id: RoomId,
    /// The joining player's own scoreboard row.
    pub scoreboard: ScoreboardDto,
    /// Rows of the players already in the room.
    #[serde(default)]
    pub players_scores: Vec<ScoreboardDto>,
    pub owner: PlayerInfo,
    pub room_code: String,
    pub is_public: bool,
    pub max_number_of_players: u32,
    #[serde(default)]
    pub quiz_id: Option<QuizId>,
}

impl JoinedRoom {
    /// Split into the room snapshot (own row first) and the own score id.
    pub fn into_room(self) -> (Room, ScoreId) {
        let own = self.scoreboard.id;
        let scoreboard: Scoreboard = std::iter::once(self.scoreboard)
            .chain(self.players_scores)
            .map(ScoreEntry::from)
            .collect();
        let room = Room {
            id: self.room_id,
            code: self.room_code,
            is_public: self.is_public,
            max_players: self.max_number_of_players,
            owner_id: self.owner.id,
            quiz_id: self.quiz_id,
            scoreboard,
        };
        (room, own)
    }
}

/// Body of `PATCH /rooms/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<QuizId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_number_of_players_in_room: Option<u32>,
}

impl RoomUpdate {
    pub fn settings(owner_id: UserId, settings: RoomSettings) -> Self {
        Self {
            owner_id,
            is_public: Some(settings.is_public),
            max_number_of_players_in_room: Some(settings.max_players),
            ..Self::default()
        }
    }

    pub fn quiz(owner_id: UserId, quiz_id: QuizId) -> Self {
        Self {
            owner_id,
            quiz_id: Some(quiz_id),
            ..Self::default()
        }
    }
}

/// One entry of `GET /rooms/public`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    #[serde(alias = "code")]
    pub room_code: String,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(alias = "maxNumberOfPlayersInRoom")]
    pub max_number_of_players: u32,
    #[serde(default)]
    pub owner: Option<PlayerInfo>,
    #[serde(default)]
    pub number_of_players: u32,
}

fn default_true() -> bool {
    true
}

/// Body of `PATCH /scores/{scoreId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    #[serde(skip)]
    pub score_id: ScoreId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub answer_id: AnswerId,
    pub sent_at: DateTime<Utc>,
}

/// Response of `PATCH /scores/{scoreId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreAwarded {
    pub points_earned: u32,
}

/// Response of `POST /scores/create_scoreboard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardCreated {
    pub id: ScoreId,
}

// ── Collaborators ───────────────────────────────────────────────────

/// Room CRUD.
#[async_trait]
pub trait RoomService: Send + Sync + 'static {
    async fn create_room(&self, owner_id: UserId, settings: RoomSettings) -> Result<CreatedRoom>;

    async fn join_room(&self, code: &str, user_id: UserId) -> Result<JoinedRoom>;

    async fn update_room(&self, room_id: RoomId, update: &RoomUpdate) -> Result<()>;

    /// Delete a room. Only its owner may do this.
    async fn delete_room(&self, room_id: RoomId, user_id: UserId) -> Result<()>;

    async fn public_rooms(&self) -> Result<Vec<RoomSummary>>;
}

/// Scoreboards and answer scoring.
#[async_trait]
pub trait ScoreService: Send + Sync + 'static {
    async fn create_scoreboard(&self, user_id: UserId, room_id: RoomId) -> Result<ScoreboardCreated>;

    /// Score one answer. The returned points are a delta.
    async fn calculate_answer_score(&self, submission: &AnswerSubmission) -> Result<ScoreAwarded>;

    /// Remove a player's scoreboard row, taking them out of the room.
    async fn exit_room(&self, score_id: ScoreId) -> Result<()>;
}

/// Where quizzes come from once a game starts.
#[async_trait]
pub trait QuizSource: Send + Sync + 'static {
    async fn quiz(&self, quiz_id: QuizId) -> Result<Quiz>;
}

/// Answer keys, used when no scoreboard is available.
#[async_trait]
pub trait QuestionService: Send + Sync + 'static {
    async fn correct_answer(&self, question_id: QuestionId) -> Result<AnswerId>;
}

/// The set of collaborators handed to room sessions.
#[derive(Clone)]
pub struct Services {
    pub rooms: Arc<dyn RoomService>,
    pub scores: Arc<dyn ScoreService>,
    pub quizzes: Arc<dyn QuizSource>,
    pub questions: Arc<dyn QuestionService>,
}

impl Services {
    /// Use one backend for every collaborator.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: RoomService + ScoreService + QuizSource + QuestionService,
    {
        Self {
            rooms: backend.clone(),
            scores: backend.clone(),
            quizzes: backend.clone(),
            questions: backend,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
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
    use uuid::Uuid;

    #[test]
    fn joined_room_puts_own_row_on_the_board() {
        let json = r#"{
            "roomId": "00000000-0000-0000-0000-000000000001",
            "scoreboard": {"id": "00000000-0000-0000-0000-000000000052",
                           "player": {"id": "00000000-0000-0000-0000-0000000000b2", "username": "bia"},
                           "score": 0},
            "playersScores": [
                {"id": "00000000-0000-0000-0000-000000000051",
                 "player": {"id": "00000000-0000-0000-0000-0000000000a1", "username": "ana"},
                 "score": 40}
            ],
            "owner": {"id": "00000000-0000-0000-0000-0000000000a1", "username": "ana"},
            "roomCode": "QZ7K2",
            "isPublic": false,
            "maxNumberOfPlayers": 6
        }"#;
        let joined: JoinedRoom = serde_json::from_str(json).unwrap();
        let (room, own) = joined.into_room();

        assert_eq!(own, Uuid::from_u128(0x52));
        assert_eq!(room.code, "QZ7K2");
        assert_eq!(room.owner_id, Uuid::from_u128(0xA1));
        assert_eq!(room.scoreboard.len(), 2);
        assert_eq!(room.scoreboard.get(&Uuid::from_u128(0x51)).unwrap().points, 40);
    }

    #[test]
    fn created_room_accepts_backend_field_names() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "roomCode": "ABCD",
            "isPublic": true,
            "maxNumberOfPlayersInRoom": 10
        }"#;
        let created: CreatedRoom = serde_json::from_str(json).unwrap();
        assert_eq!(created.max_number_of_players, 10);
        assert!(created.owner_scoreboard.is_none());

        let owner = LocalUser::new(Uuid::from_u128(0xA1), "ana");
        let room = created.to_room(&owner);
        assert!(room.is_owned_by(owner.id));
        assert!(room.scoreboard.is_empty());
    }

    #[test]
    fn room_update_omits_unchanged_fields() {
        let update = RoomUpdate::quiz(Uuid::from_u128(0xA1), Uuid::from_u128(0xC1));
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("isPublic").is_none());
        assert_eq!(json["quizId"], Uuid::from_u128(0xC1).to_string());
    }

    #[test]
    fn submission_serializes_iso_timestamp() {
        let submission = AnswerSubmission {
            score_id: Uuid::from_u128(0x51),
            room_id: Uuid::from_u128(1),
            user_id: Uuid::from_u128(0xA1),
            answer_id: Uuid::from_u128(0xD1),
            sent_at: DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&submission).unwrap();
        assert!(json.get("scoreId").is_none());
        assert_eq!(json["sentAt"], "2025-03-01T12:00:00Z");
    }
}
