//! Score reconciliation.
//!
//! Two pieces keep scoreboards convergent:
//!
//! - [`PendingAnswers`] rejects a second submission for a question while the
//!   first is still being scored. The entry is held by a [`PendingGuard`] and
//!   released when the guard drops, whatever the outcome.
//! - [`ScoreLedger`] folds join, exit and score events into a [`Scoreboard`].
//!   Deltas are always added. The echo of a delta this client already applied
//!   confirms it instead of counting twice. Deltas for a score id that has not
//!   joined yet are held until the join arrives, and score ids that have
//!   exited stay dead.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::{QuizRoomError, Result};
use crate::model::{ScoreEntry, Scoreboard};
use crate::protocol::{AnswerId, JoinPayload, QuestionId, ScoreId};

// ── Pending answers ─────────────────────────────────────────────────

/// An answer waiting for the scoring service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnswer {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub submitted_at: DateTime<Utc>,
}

/// Set of answers currently being scored, one per question.
#[derive(Debug, Clone, Default)]
pub struct PendingAnswers {
    inner: Arc<Mutex<HashMap<QuestionId, PendingAnswer>>>,
}

impl PendingAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an answer for `question_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::DuplicateSubmission`] if an answer for the
    /// same question is still pending.
    pub fn begin(&self, question_id: QuestionId, answer_id: AnswerId) -> Result<PendingGuard> {
        let mut pending = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(&question_id) {
            return Err(QuizRoomError::DuplicateSubmission { question_id });
        }
        let answer = PendingAnswer {
            question_id,
            answer_id,
            submitted_at: Utc::now(),
        };
        pending.insert(question_id, answer.clone());
        Ok(PendingGuard {
            answers: self.clone(),
            answer,
        })
    }

    pub fn is_pending(&self, question_id: &QuestionId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(question_id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a [`PendingAnswer`] registered until dropped.
#[derive(Debug)]
pub struct PendingGuard {
    answers: PendingAnswers,
    answer: PendingAnswer,
}

impl PendingGuard {
    pub fn answer(&self) -> &PendingAnswer {
        &self.answer
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.answers
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.answer.question_id);
    }
}

// ── Ledger ──────────────────────────────────────────────────────────

/// Outcome of folding a score delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMerge {
    /// The delta was added; `total` is the entry's new value.
    Applied { total: u32 },
    /// Echo of a delta already applied locally.
    Confirmed,
    /// The score id has not joined yet; the delta is held.
    Deferred,
    /// The score id has exited.
    Ignored,
}

/// Outcome of folding a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMerge {
    /// A new entry was added with `points` (initial score plus held deltas).
    Added { points: u32 },
    /// The score id is already on the board.
    Duplicate,
    /// The score id has exited.
    Departed,
}

/// Merge rules for one room's scoreboard.
#[derive(Debug, Clone, Default)]
pub struct ScoreLedger {
    own_score_id: Option<ScoreId>,
    unconfirmed: VecDeque<u32>,
    departed: HashSet<ScoreId>,
    orphaned: HashMap<ScoreId, u32>,
}

impl ScoreLedger {
    pub fn new(own_score_id: Option<ScoreId>) -> Self {
        Self {
            own_score_id,
            ..Self::default()
        }
    }

    pub fn own_score_id(&self) -> Option<ScoreId> {
        self.own_score_id
    }

    /// Add a locally scored delta to the own entry and expect its echo.
    /// Returns the new total, or `None` when there is no own entry.
    pub fn apply_local(&mut self, board: &mut Scoreboard, delta: u32) -> Option<u32> {
        let own = self.own_score_id?;
        let total = board.add_points(&own, delta)?;
        self.unconfirmed.push_back(delta);
        Some(total)
    }

    /// Forget every unconfirmed local delta, e.g. after a reconnect where the
    /// echoes may have been lost.
    pub fn forget_unconfirmed(&mut self) {
        self.unconfirmed.clear();
    }

    /// Stop expecting the echo of one local `delta` whose broadcast was never
    /// sent. The points stay on the board.
    pub fn retract_unconfirmed(&mut self, delta: u32) {
        if let Some(pos) = self.unconfirmed.iter().rposition(|d| *d == delta) {
            self.unconfirmed.remove(pos);
        }
    }

    pub fn unconfirmed(&self) -> usize {
        self.unconfirmed.len()
    }

    /// Fold a delta received on the score topic.
    pub fn apply_remote(&mut self, board: &mut Scoreboard, score_id: ScoreId, delta: u32) -> ScoreMerge {
        if self.departed.contains(&score_id) {
            return ScoreMerge::Ignored;
        }
        if self.own_score_id == Some(score_id) {
            if let Some(pos) = self.unconfirmed.iter().position(|d| *d == delta) {
                self.unconfirmed.remove(pos);
                return ScoreMerge::Confirmed;
            }
        }
        match board.add_points(&score_id, delta) {
            Some(total) => ScoreMerge::Applied { total },
            None => {
                let held = self.orphaned.entry(score_id).or_insert(0);
                *held = held.saturating_add(delta);
                ScoreMerge::Deferred
            }
        }
    }

    /// Fold a join broadcast.
    pub fn apply_join(&mut self, board: &mut Scoreboard, join: &JoinPayload) -> JoinMerge {
        if self.departed.contains(&join.score_id) {
            return JoinMerge::Departed;
        }
        if board.contains(&join.score_id) {
            return JoinMerge::Duplicate;
        }
        let held = self.orphaned.remove(&join.score_id).unwrap_or(0);
        let mut entry = ScoreEntry::new(join.score_id, &join.player);
        entry.points = join.score.unwrap_or(0).saturating_add(held);
        let points = entry.points;
        board.insert_if_absent(entry);
        JoinMerge::Added { points }
    }

    /// Fold an exit broadcast. Returns `true` if an entry was removed.
    pub fn apply_exit(&mut self, board: &mut Scoreboard, score_id: ScoreId) -> bool {
        self.departed.insert(score_id);
        self.orphaned.remove(&score_id);
        board.remove(&score_id).is_some()
    }

    pub fn has_departed(&self, score_id: &ScoreId) -> bool {
        self.departed.contains(score_id)
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
    use crate::protocol::PlayerInfo;
    use uuid::Uuid;

    fn sid(n: u128) -> ScoreId {
        Uuid::from_u128(n)
    }

    fn join(n: u128, name: &str) -> JoinPayload {
        JoinPayload {
            score_id: sid(n),
            player: PlayerInfo {
                id: Uuid::from_u128(n + 0x100),
                username: name.into(),
            },
            score: None,
        }
    }

    #[test]
    fn duplicate_question_is_rejected_until_guard_drops() {
        let pending = PendingAnswers::new();
        let q = Uuid::from_u128(0x91);
        let guard = pending.begin(q, Uuid::from_u128(1)).unwrap();
        assert_eq!(guard.answer().question_id, q);

        let err = pending.begin(q, Uuid::from_u128(2)).unwrap_err();
        assert!(matches!(err, QuizRoomError::DuplicateSubmission { question_id } if question_id == q));

        // Another question is independent.
        let other = pending.begin(Uuid::from_u128(0x92), Uuid::from_u128(3)).unwrap();
        assert_eq!(pending.len(), 2);

        drop(guard);
        drop(other);
        assert!(pending.is_empty());
        assert!(pending.begin(q, Uuid::from_u128(2)).is_ok());
    }

    #[test]
    fn deltas_accumulate() {
        let mut board = Scoreboard::new();
        let mut ledger = ScoreLedger::new(None);
        ledger.apply_join(&mut board, &join(1, "ana"));

        assert_eq!(ledger.apply_remote(&mut board, sid(1), 10), ScoreMerge::Applied { total: 10 });
        assert_eq!(ledger.apply_remote(&mut board, sid(1), 15), ScoreMerge::Applied { total: 25 });
        assert_eq!(board.get(&sid(1)).unwrap().points, 25);
    }

    #[test]
    fn own_echo_confirms_instead_of_double_counting() {
        let mut board = Scoreboard::new();
        let mut ledger = ScoreLedger::new(Some(sid(1)));
        ledger.apply_join(&mut board, &join(1, "ana"));

        assert_eq!(ledger.apply_local(&mut board, 20), Some(20));
        assert_eq!(ledger.apply_remote(&mut board, sid(1), 20), ScoreMerge::Confirmed);
        assert_eq!(board.get(&sid(1)).unwrap().points, 20);
        assert_eq!(ledger.unconfirmed(), 0);

        // A delta for the own id that was not scored here still counts.
        assert_eq!(ledger.apply_remote(&mut board, sid(1), 5), ScoreMerge::Applied { total: 25 });
    }

    #[test]
    fn delta_before_join_is_held() {
        let mut board = Scoreboard::new();
        let mut ledger = ScoreLedger::new(None);

        assert_eq!(ledger.apply_remote(&mut board, sid(2), 7), ScoreMerge::Deferred);
        assert_eq!(ledger.apply_remote(&mut board, sid(2), 3), ScoreMerge::Deferred);
        assert_eq!(ledger.apply_join(&mut board, &join(2, "bia")), JoinMerge::Added { points: 10 });
        assert_eq!(board.get(&sid(2)).unwrap().points, 10);
    }

    #[test]
    fn exit_is_final_whatever_the_order() {
        let mut board = Scoreboard::new();
        let mut ledger = ScoreLedger::new(None);

        // Exit overtakes the join.
        assert!(!ledger.apply_exit(&mut board, sid(3)));
        assert_eq!(ledger.apply_join(&mut board, &join(3, "caio")), JoinMerge::Departed);
        assert_eq!(ledger.apply_remote(&mut board, sid(3), 5), ScoreMerge::Ignored);
        assert!(board.is_empty());

        // Regular order.
        ledger.apply_join(&mut board, &join(4, "duda"));
        assert!(ledger.apply_exit(&mut board, sid(4)));
        assert!(!board.contains(&sid(4)));
    }

    #[test]
    fn repeated_join_keeps_points() {
        let mut board = Scoreboard::new();
        let mut ledger = ScoreLedger::new(None);
        ledger.apply_join(&mut board, &join(5, "edu"));
        ledger.apply_remote(&mut board, sid(5), 30);
        assert_eq!(ledger.apply_join(&mut board, &join(5, "edu")), JoinMerge::Duplicate);
        assert_eq!(board.get(&sid(5)).unwrap().points, 30);
    }

    #[test]
    fn interleavings_converge() {
        // Same events, two delivery orders across topics.
        let events_a: Vec<(&str, u128, u32)> = vec![
            ("join", 1, 0),
            ("join", 2, 0),
            ("score", 1, 10),
            ("score", 2, 4),
            ("exit", 2, 0),
            ("score", 1, 6),
        ];
        let events_b: Vec<(&str, u128, u32)> = vec![
            ("score", 1, 10),
            ("exit", 2, 0),
            ("score", 1, 6),
            ("join", 2, 0),
            ("score", 2, 4),
            ("join", 1, 0),
        ];

        let run = |events: &[(&str, u128, u32)]| {
            let mut board = Scoreboard::new();
            let mut ledger = ScoreLedger::new(None);
            for (kind, n, delta) in events {
                match *kind {
                    "join" => {
                        ledger.apply_join(&mut board, &join(*n, "p"));
                    }
                    "exit" => {
                        ledger.apply_exit(&mut board, sid(*n));
                    }
                    _ => {
                        ledger.apply_remote(&mut board, sid(*n), *delta);
                    }
                }
            }
            board
        };

        let a = run(&events_a);
        let b = run(&events_b);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get(&sid(1)).unwrap().points, 16);
    }
}
