//! Room, scoreboard and quiz types shared by the session and the cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QuizRoomError, Result};
use crate::protocol::{AnswerId, PlayerInfo, QuestionId, QuizId, RoomId, ScoreId, UserId};

/// Smallest allowed room capacity.
pub const MIN_PLAYERS: u32 = 2;

/// Largest allowed room capacity.
pub const MAX_PLAYERS: u32 = 10;

// ── Scoreboard ──────────────────────────────────────────────────────

/// One player's cumulative points within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub score_id: ScoreId,
    pub player_id: UserId,
    pub username: String,
    pub points: u32,
}

impl ScoreEntry {
    /// A fresh entry with zero points.
    pub fn new(score_id: ScoreId, player: &PlayerInfo) -> Self {
        Self {
            score_id,
            player_id: player.id,
            username: player.username.clone(),
            points: 0,
        }
    }
}

/// The set of score entries of a room, keyed by score id.
///
/// Serialized as a plain list; leaderboard order is computed on demand by
/// [`Scoreboard::leaderboard`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ScoreEntry>", into = "Vec<ScoreEntry>")]
pub struct Scoreboard {
    entries: BTreeMap<ScoreId, ScoreEntry>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` unless its score id is already present.
    /// Returns `true` if the entry was added.
    pub fn insert_if_absent(&mut self, entry: ScoreEntry) -> bool {
        if self.entries.contains_key(&entry.score_id) {
            return false;
        }
        self.entries.insert(entry.score_id, entry);
        true
    }

    pub fn remove(&mut self, score_id: &ScoreId) -> Option<ScoreEntry> {
        self.entries.remove(score_id)
    }

    /// Add `delta` to an entry and return its new total, or `None` if the
    /// score id is unknown. Totals saturate at `u32::MAX`.
    pub fn add_points(&mut self, score_id: &ScoreId, delta: u32) -> Option<u32> {
        let entry = self.entries.get_mut(score_id)?;
        entry.points = entry.points.saturating_add(delta);
        Some(entry.points)
    }

    pub fn get(&self, score_id: &ScoreId) -> Option<&ScoreEntry> {
        self.entries.get(score_id)
    }

    pub fn contains(&self, score_id: &ScoreId) -> bool {
        self.entries.contains_key(score_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoreEntry> {
        self.entries.values()
    }

    /// Entries sorted by points (highest first), then username.
    pub fn leaderboard(&self) -> Vec<ScoreEntry> {
        let mut ranked: Vec<ScoreEntry> = self.entries.values().cloned().collect();
        ranked.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| a.username.cmp(&b.username))
        });
        ranked
    }
}

impl From<Vec<ScoreEntry>> for Scoreboard {
    fn from(entries: Vec<ScoreEntry>) -> Self {
        let mut board = Scoreboard::new();
        for entry in entries {
            board.insert_if_absent(entry);
        }
        board
    }
}

impl From<Scoreboard> for Vec<ScoreEntry> {
    fn from(board: Scoreboard) -> Self {
        board.entries.into_values().collect()
    }
}

impl FromIterator<ScoreEntry> for Scoreboard {
    fn from_iter<I: IntoIterator<Item = ScoreEntry>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

// ── Room ────────────────────────────────────────────────────────────

/// Last known state of a room, as held in memory and in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub is_public: bool,
    pub max_players: u32,
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<QuizId>,
    #[serde(default)]
    pub scoreboard: Scoreboard,
}

impl Room {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }

    pub fn settings(&self) -> RoomSettings {
        RoomSettings {
            is_public: self.is_public,
            max_players: self.max_players,
        }
    }
}

/// Host-editable room settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub is_public: bool,
    pub max_players: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            is_public: true,
            max_players: MAX_PLAYERS,
        }
    }
}

impl RoomSettings {
    /// Check that the capacity is within the supported range.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Validation`] when `max_players` is outside
    /// `2..=10`.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(QuizRoomError::Validation(format!(
                "max players must be between {MIN_PLAYERS} and {MAX_PLAYERS}, got {}",
                self.max_players
            )));
        }
        Ok(())
    }
}

/// The player using this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: UserId,
    pub username: String,
}

impl LocalUser {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    pub fn as_player(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

// ── Quiz ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub value: String,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

/// A quiz as served by the quiz source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub questions: Vec<Question>,
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

    fn entry(n: u128, name: &str, points: u32) -> ScoreEntry {
        ScoreEntry {
            score_id: Uuid::from_u128(n),
            player_id: Uuid::from_u128(n + 100),
            username: name.into(),
            points,
        }
    }

    #[test]
    fn scoreboard_has_set_semantics() {
        let mut board = Scoreboard::new();
        assert!(board.insert_if_absent(entry(1, "ana", 0)));
        assert!(!board.insert_if_absent(entry(1, "ana again", 50)));
        assert_eq!(board.len(), 1);
        assert_eq!(board.get(&Uuid::from_u128(1)).unwrap().username, "ana");
    }

    #[test]
    fn add_points_saturates() {
        let mut board: Scoreboard = vec![entry(1, "ana", u32::MAX - 1)].into();
        assert_eq!(board.add_points(&Uuid::from_u128(1), 10), Some(u32::MAX));
        assert_eq!(board.add_points(&Uuid::from_u128(9), 10), None);
    }

    #[test]
    fn leaderboard_orders_by_points_then_name() {
        let board: Scoreboard = vec![
            entry(1, "carla", 10),
            entry(2, "bruno", 30),
            entry(3, "ana", 10),
        ]
        .into();
        let names: Vec<_> = board.leaderboard().into_iter().map(|e| e.username).collect();
        assert_eq!(names, ["bruno", "ana", "carla"]);
    }

    #[test]
    fn duplicate_entries_collapse_when_decoding() {
        let json = serde_json::to_string(&vec![entry(1, "ana", 5), entry(1, "ana", 7)]).unwrap();
        let board: Scoreboard = serde_json::from_str(&json).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board.get(&Uuid::from_u128(1)).unwrap().points, 5);
    }

    #[test]
    fn settings_validate_capacity() {
        assert!(RoomSettings::default().validate().is_ok());
        let too_small = RoomSettings {
            is_public: false,
            max_players: 1,
        };
        assert!(matches!(
            too_small.validate(),
            Err(QuizRoomError::Validation(_))
        ));
        let too_big = RoomSettings {
            is_public: true,
            max_players: 11,
        };
        assert!(too_big.validate().is_err());
    }
}
