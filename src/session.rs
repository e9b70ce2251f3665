//! Room session state machine.
//!
//! A [`RoomSession`] follows one room from entry to exit:
//!
//! ```text
//! Idle → Joining → InLobby ⇄ Starting → InGame → Finished
//!            └──────────┴─────────┴────────┴─────────┴──→ Left | Closed
//! ```
//!
//! Room events and connection events are buffered on channels and applied
//! when the application calls [`RoomSession::next_update`], which returns
//! the resulting [`SessionUpdate`]s one at a time. Every scoreboard change
//! is written to the cache before its update is handed out.

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::ConnectionEvent;
use crate::error::{QuizRoomError, Result};
use crate::hub::QuizHub;
use crate::model::{LocalUser, Question, Quiz, Room, RoomSettings, ScoreEntry};
use crate::protocol::{
    AnswerId, EventKind, QuestionId, QuizId, RoomCommand, RoomEvent, RoomId, ScoreId,
};
use crate::score::{JoinMerge, PendingAnswers, ScoreLedger, ScoreMerge};
use crate::services::{AnswerSubmission, RoomUpdate};

// ── Phases ──────────────────────────────────────────────────────────

/// Lifecycle phase of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomPhase {
    Idle,
    Joining,
    InLobby,
    Starting,
    InGame,
    Finished,
    /// The local player left.
    Left,
    /// The room is gone or the local player was removed.
    Closed,
}

impl RoomPhase {
    /// Joining through Finished.
    pub fn is_active(self) -> bool {
        !matches!(self, RoomPhase::Idle | RoomPhase::Left | RoomPhase::Closed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoomPhase::Left | RoomPhase::Closed)
    }

    /// Whether `self → to` is a valid transition.
    pub fn can_transition_to(self, to: RoomPhase) -> bool {
        use RoomPhase::*;
        match (self, to) {
            (Idle, Joining)
            | (Joining, InLobby)
            | (InLobby, Starting)
            | (Starting, InLobby)
            | (Starting, InGame)
            | (InGame, Finished) => true,
            (from, Left | Closed) => from.is_active(),
            _ => false,
        }
    }
}

/// Host-side state of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRequest {
    /// Published; waiting for the first timer broadcast until `deadline`.
    Requested { deadline: Instant },
    /// The hub started the countdown.
    Confirmed,
}

/// Something the application should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    PhaseChanged { from: RoomPhase, to: RoomPhase },
    PlayerJoined(ScoreEntry),
    PlayerLeft { score_id: ScoreId },
    /// `points` is the new total.
    ScoreChanged { score_id: ScoreId, points: u32 },
    /// New total of the local-only score kept when the room has no
    /// scoreboard for the local player.
    LocalScoreChanged { points: u32 },
    /// Pre-game countdown tick.
    Countdown { seconds: u32 },
    /// In-game question countdown tick.
    QuestionCountdown { seconds: u32 },
    /// `quiz` is `None` when the quiz could not be loaded.
    GameStarted {
        quiz_id: QuizId,
        quiz: Option<Box<Quiz>>,
    },
    /// The host's start request was withdrawn.
    StartReverted { reason: String },
    /// The hub connection dropped and a reconnect is scheduled.
    Reconnecting { reason: Option<String> },
    /// Room topics were resubscribed on a new connection.
    Resynced { epoch: u64 },
    /// The session works from cached state until the connection is back.
    Degraded { reason: String },
}

// ── State ───────────────────────────────────────────────────────────

struct SessionState {
    phase: RoomPhase,
    room: Room,
    score_id: Option<ScoreId>,
    ledger: ScoreLedger,
    start: Option<StartRequest>,
    quiz: Option<Quiz>,
    question_index: usize,
    /// `sendPlayerJoin` has been published.
    announced: bool,
    /// Connection epoch the room topics were last subscribed on.
    synced_epoch: Option<u64>,
    watch_question_countdown: bool,
    detached: bool,
    /// Game start accepted; its quiz is being resolved.
    launching: Option<QuizId>,
    /// Points awarded locally when no scoreboard is available.
    local_points: u32,
    queued: VecDeque<SessionUpdate>,
}

impl SessionState {
    fn transition(&mut self, to: RoomPhase) -> bool {
        let from = self.phase;
        if !from.can_transition_to(to) {
            warn!(room_id = %self.room.id, ?from, ?to, "ignoring invalid phase transition");
            return false;
        }
        debug!(room_id = %self.room.id, ?from, ?to, "phase transition");
        self.phase = to;
        self.queued.push_back(SessionUpdate::PhaseChanged { from, to });
        true
    }

    fn wanted_kinds(&self) -> Vec<EventKind> {
        let mut kinds = EventKind::LOBBY.to_vec();
        kinds.push(EventKind::Timer);
        if self.watch_question_countdown {
            kinds.push(EventKind::QuestionCountdown);
        }
        kinds
    }
}

struct Inbox {
    events_rx: mpsc::Receiver<RoomEvent>,
    connection_rx: broadcast::Receiver<ConnectionEvent>,
}

enum Input {
    Room(RoomEvent),
    Connection(ConnectionEvent),
    ConnectionLagged(u64),
    StartDeadline,
}

// ── Session ─────────────────────────────────────────────────────────

/// One room, from the local player's point of view.
///
/// Created through [`QuizHub::create_room`], [`QuizHub::join_room`] or
/// [`QuizHub::resume_room`].
pub struct RoomSession {
    hub: QuizHub,
    user: LocalUser,
    room_id: RoomId,
    state: Mutex<SessionState>,
    pending: PendingAnswers,
    events_tx: mpsc::Sender<RoomEvent>,
    inbox: Mutex<Inbox>,
}

impl RoomSession {
    fn new(hub: QuizHub, user: LocalUser, room: Room, score_id: Option<ScoreId>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(hub.config().event_channel_capacity.max(1));
        let connection_rx = hub.connection().events();
        Self {
            room_id: room.id,
            state: Mutex::new(SessionState {
                phase: RoomPhase::Idle,
                ledger: ScoreLedger::new(score_id),
                room,
                score_id,
                start: None,
                quiz: None,
                question_index: 0,
                announced: false,
                synced_epoch: None,
                watch_question_countdown: false,
                detached: false,
                launching: None,
                local_points: 0,
                queued: VecDeque::new(),
            }),
            pending: PendingAnswers::new(),
            events_tx,
            inbox: Mutex::new(Inbox {
                events_rx,
                connection_rx,
            }),
            hub,
            user,
        }
    }

    /// Create a room owned by `user` and enter it.
    pub(crate) async fn create(hub: QuizHub, user: LocalUser, settings: RoomSettings) -> Result<Self> {
        settings.validate()?;
        let created = hub.services().rooms.create_room(user.id, settings).await?;
        let mut room = created.to_room(&user);
        info!(room_id = %room.id, code = %room.code, "room created");

        let score_id = match &created.owner_scoreboard {
            Some(row) => Some(row.id),
            None => match hub.services().scores.create_scoreboard(user.id, room.id).await {
                Ok(row) => {
                    room.scoreboard
                        .insert_if_absent(ScoreEntry::new(row.id, &user.as_player()));
                    Some(row.id)
                }
                Err(e) => {
                    warn!(room_id = %room.id, error = %e, "no owner scoreboard; scoring stays local");
                    None
                }
            },
        };

        let session = Self::new(hub, user, room, score_id);
        session.enter().await;
        Ok(session)
    }

    /// Join the room with the given code and enter it.
    pub(crate) async fn join(hub: QuizHub, user: LocalUser, code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(QuizRoomError::Validation("room code is required".into()));
        }
        let joined = hub.services().rooms.join_room(code, user.id).await?;
        let (room, score_id) = joined.into_room();
        info!(room_id = %room.id, code, %score_id, "joined room");

        let session = Self::new(hub, user, room, Some(score_id));
        session.enter().await;
        Ok(session)
    }

    /// Re-enter the room recorded in the cache, if any.
    pub(crate) async fn resume(hub: QuizHub, user: LocalUser) -> Result<Option<Self>> {
        let cache = hub.cache();
        let Some(room_id) = cache.current_room_id() else {
            return Ok(None);
        };
        let Some(room) = cache.room(room_id) else {
            warn!(%room_id, "current room has no cached snapshot");
            return Ok(None);
        };
        let score_id = cache.score_id();
        info!(%room_id, ?score_id, "resuming room from cache");

        let session = Self::new(hub, user, room, score_id);
        session.enter().await;
        Ok(Some(session))
    }

    /// Seed the cache, connect (retrying once) and subscribe.
    async fn enter(&self) {
        {
            let mut state = self.state.lock().await;
            if let Err(e) = self.hub.cache().seed_session(&state.room, state.score_id) {
                warn!(room_id = %self.room_id, error = %e, "failed to seed room cache");
            }
            state.transition(RoomPhase::Joining);
        }

        let connected = match self.hub.connection().connect().await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(room_id = %self.room_id, error = %first, "connect failed; retrying once");
                tokio::time::sleep(self.hub.config().connect_retry_delay).await;
                self.hub.connection().connect().await
            }
        };

        let mut state = self.state.lock().await;
        let outcome = match connected {
            Ok(()) => self.sync(&mut state).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(room_id = %self.room_id, error = %e, "entering room offline");
            state.queued.push_back(SessionUpdate::Degraded {
                reason: e.user_message(),
            });
        }
    }

    /// Subscribe the room topics on the live connection, announce the local
    /// player once, and finish entry.
    async fn sync(&self, state: &mut SessionState) -> Result<()> {
        if !state.phase.is_active() || state.detached {
            return Ok(());
        }
        let Some(epoch) = self.hub.connection().epoch() else {
            return Err(QuizRoomError::NotConnected);
        };
        if state.synced_epoch == Some(epoch) {
            return Ok(());
        }

        let resync = state.synced_epoch.is_some();
        for kind in state.wanted_kinds() {
            self.hub
                .registry()
                .subscribe_channel(self.room_id, kind, self.events_tx.clone())
                .await?;
        }

        if !state.announced {
            if let Some(score_id) = state.score_id {
                self.hub
                    .connection()
                    .publish_command(self.room_id, &RoomCommand::PlayerJoin { score_id })
                    .await?;
            }
            state.announced = true;
        }

        // Echoes of the previous connection will not arrive.
        state.ledger.forget_unconfirmed();
        state.synced_epoch = Some(epoch);
        if state.phase == RoomPhase::Joining {
            state.transition(RoomPhase::InLobby);
        } else if resync {
            state.queued.push_back(SessionUpdate::Resynced { epoch });
        }
        debug!(room_id = %self.room_id, epoch, "room topics synced");
        Ok(())
    }

    // ── Update pump ─────────────────────────────────────────────────

    /// Wait for the next update.
    ///
    /// Returns queued updates first, then applies incoming room and
    /// connection events. Returns `None` once the session has left or closed
    /// and every update has been handed out.
    ///
    /// # Cancel safety
    ///
    /// Queued updates are never lost. Cancelling while an incoming event is
    /// being applied may drop that event.
    pub async fn next_update(&self) -> Option<SessionUpdate> {
        let mut inbox_guard = self.inbox.lock().await;
        let inbox = &mut *inbox_guard;
        loop {
            let deadline = {
                let mut state = self.state.lock().await;
                if let Some(update) = state.queued.pop_front() {
                    return Some(update);
                }
                if state.phase.is_terminal() {
                    return None;
                }
                match state.start {
                    Some(StartRequest::Requested { deadline }) => Some(deadline),
                    _ => None,
                }
            };

            let input = tokio::select! {
                event = inbox.events_rx.recv() => match event {
                    Some(event) => Input::Room(event),
                    None => return None,
                },
                event = inbox.connection_rx.recv() => match event {
                    Ok(event) => Input::Connection(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => Input::ConnectionLagged(missed),
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                () = sleep_until(deadline) => Input::StartDeadline,
            };

            let mut state = self.state.lock().await;
            let launch = match input {
                Input::Room(event) => self.apply_event(&mut state, event).await,
                Input::Connection(event) => {
                    // Room events already buffered were delivered on the old
                    // connection and go first.
                    let launch = self.apply_buffered(&mut inbox.events_rx, &mut state).await;
                    self.apply_connection_event(&mut state, event).await;
                    launch
                }
                Input::ConnectionLagged(missed) => {
                    debug!(room_id = %self.room_id, missed, "connection events lagged");
                    let launch = self.apply_buffered(&mut inbox.events_rx, &mut state).await;
                    self.resync(&mut state).await;
                    launch
                }
                Input::StartDeadline => {
                    if matches!(state.start, Some(StartRequest::Requested { .. })) {
                        self.revert_start(&mut state, "the hub did not start the countdown".into());
                    }
                    None
                }
            };
            drop(state);
            if let Some(quiz_id) = launch {
                self.finish_launch(quiz_id).await;
            }
        }
    }

    /// Apply every room event already waiting in `events_rx`.
    async fn apply_buffered(
        &self,
        events_rx: &mut mpsc::Receiver<RoomEvent>,
        state: &mut SessionState,
    ) -> Option<QuizId> {
        let mut launch = None;
        while let Ok(event) = events_rx.try_recv() {
            launch = self.apply_event(state, event).await.or(launch);
        }
        launch
    }

    /// Resolve the quiz of an accepted game start without holding the state
    /// lock, then enter the game if nothing ended the session meanwhile.
    async fn finish_launch(&self, quiz_id: QuizId) {
        let quiz = self.resolve_quiz(quiz_id).await;
        let mut state = self.state.lock().await;
        if state.launching != Some(quiz_id) || state.phase != RoomPhase::Starting {
            debug!(room_id = %self.room_id, %quiz_id, phase = ?state.phase, "game start abandoned");
            return;
        }
        state.launching = None;
        state.quiz = quiz.clone();
        state.question_index = 0;
        state.start = None;
        state.transition(RoomPhase::InGame);
        state.queued.push_back(SessionUpdate::GameStarted {
            quiz_id,
            quiz: quiz.map(Box::new),
        });
    }

    async fn resync(&self, state: &mut SessionState) {
        if !self.hub.connection().is_connected() {
            return;
        }
        if let Err(e) = self.sync(state).await {
            warn!(room_id = %self.room_id, error = %e, "resubscribe failed");
            state.queued.push_back(SessionUpdate::Degraded {
                reason: e.user_message(),
            });
        }
    }

    async fn apply_connection_event(&self, state: &mut SessionState, event: ConnectionEvent) {
        if !state.phase.is_active() || state.detached {
            return;
        }
        match event {
            ConnectionEvent::Connected { epoch } => {
                if state.synced_epoch != Some(epoch) {
                    self.resync(state).await;
                }
            }
            ConnectionEvent::Disconnected { reason, will_retry } => {
                if will_retry {
                    state.queued.push_back(SessionUpdate::Reconnecting { reason });
                } else {
                    state.queued.push_back(SessionUpdate::Degraded {
                        reason: reason.unwrap_or_else(|| "disconnected from the game server".into()),
                    });
                }
            }
            ConnectionEvent::ReconnectFailed { reason } => {
                state.queued.push_back(SessionUpdate::Degraded { reason });
            }
        }
    }

    /// Apply one room event. Returns the quiz id of an accepted game start,
    /// which the caller finishes with [`finish_launch`](Self::finish_launch)
    /// once the state lock is released.
    async fn apply_event(&self, state: &mut SessionState, event: RoomEvent) -> Option<QuizId> {
        if !state.phase.is_active() {
            debug!(room_id = %self.room_id, kind = %event.kind(), phase = ?state.phase, "ignoring event for inactive room");
            return None;
        }

        match event {
            RoomEvent::PlayerJoined(join) => {
                let SessionState { ledger, room, .. } = &mut *state;
                match ledger.apply_join(&mut room.scoreboard, &join) {
                    JoinMerge::Added { .. } => {
                        self.persist(state);
                        if let Some(entry) = state.room.scoreboard.get(&join.score_id).cloned() {
                            state.queued.push_back(SessionUpdate::PlayerJoined(entry));
                        }
                    }
                    outcome => debug!(score_id = %join.score_id, ?outcome, "join not applied"),
                }
            }
            RoomEvent::PlayerExited(exit) => {
                let owner_left = state
                    .room
                    .scoreboard
                    .get(&exit.score_id)
                    .is_some_and(|e| e.player_id == state.room.owner_id)
                    || exit
                        .player
                        .as_ref()
                        .is_some_and(|p| p.id == state.room.owner_id);

                let SessionState { ledger, room, .. } = &mut *state;
                let removed = ledger.apply_exit(&mut room.scoreboard, exit.score_id);

                if state.score_id == Some(exit.score_id) {
                    info!(room_id = %self.room_id, "removed from room");
                    self.close(state, RoomPhase::Closed).await;
                } else if owner_left && !state.room.is_owned_by(self.user.id) {
                    info!(room_id = %self.room_id, "host left; room closed");
                    self.close(state, RoomPhase::Closed).await;
                } else if removed {
                    self.persist(state);
                    state.queued.push_back(SessionUpdate::PlayerLeft {
                        score_id: exit.score_id,
                    });
                }
            }
            RoomEvent::ScoreUpdated(update) => {
                let SessionState { ledger, room, .. } = &mut *state;
                match ledger.apply_remote(&mut room.scoreboard, update.score_id, update.points_earned) {
                    ScoreMerge::Applied { total } => {
                        self.persist(state);
                        state.queued.push_back(SessionUpdate::ScoreChanged {
                            score_id: update.score_id,
                            points: total,
                        });
                    }
                    outcome => debug!(score_id = %update.score_id, ?outcome, "score delta not applied"),
                }
            }
            RoomEvent::TimerTick(timer) => {
                match (state.phase, state.start) {
                    (RoomPhase::InLobby, _) => {
                        state.transition(RoomPhase::Starting);
                    }
                    (RoomPhase::Starting, Some(StartRequest::Requested { .. })) => {
                        debug!(room_id = %self.room_id, "start confirmed by hub");
                        state.start = Some(StartRequest::Confirmed);
                    }
                    _ => {}
                }
                state.queued.push_back(SessionUpdate::Countdown {
                    seconds: timer.time_remaining_in_seconds,
                });
            }
            RoomEvent::QuestionCountdown(timer) => {
                if state.phase == RoomPhase::InGame {
                    state.queued.push_back(SessionUpdate::QuestionCountdown {
                        seconds: timer.time_remaining_in_seconds,
                    });
                }
            }
            RoomEvent::GameStarted(start) => {
                if state.launching.is_some() {
                    debug!(room_id = %self.room_id, "game start already in progress");
                    return None;
                }
                if state.phase == RoomPhase::InLobby {
                    state.transition(RoomPhase::Starting);
                }
                if state.phase != RoomPhase::Starting {
                    debug!(room_id = %self.room_id, phase = ?state.phase, "ignoring game start");
                    return None;
                }
                state.room.quiz_id = Some(start.quiz_id);
                self.persist(state);
                state.launching = Some(start.quiz_id);
                return Some(start.quiz_id);
            }
        }
        None
    }

    /// Cached quiz first, then the quiz source.
    async fn resolve_quiz(&self, quiz_id: QuizId) -> Option<Quiz> {
        if let Some(quiz) = self.hub.cache().quiz(quiz_id) {
            return Some(quiz);
        }
        match self.hub.services().quizzes.quiz(quiz_id).await {
            Ok(quiz) => {
                if let Err(e) = self.hub.cache().put_quiz(&quiz) {
                    warn!(%quiz_id, error = %e, "failed to cache quiz");
                }
                Some(quiz)
            }
            Err(e) => {
                warn!(%quiz_id, error = %e, "failed to load quiz");
                None
            }
        }
    }

    fn persist(&self, state: &SessionState) {
        if let Err(e) = self.hub.cache().put_room(&state.room) {
            warn!(room_id = %self.room_id, error = %e, "failed to write room snapshot");
        }
    }

    fn revert_start(&self, state: &mut SessionState, reason: String) {
        state.start = None;
        if state.phase == RoomPhase::Starting {
            state.transition(RoomPhase::InLobby);
        }
        warn!(room_id = %self.room_id, %reason, "start request reverted");
        state.queued.push_back(SessionUpdate::StartReverted { reason });
    }

    /// Drop subscriptions and cached keys, then move to `to`.
    async fn close(&self, state: &mut SessionState, to: RoomPhase) {
        let removed = self.hub.registry().unsubscribe_all(self.room_id).await;
        if let Err(e) = self.hub.cache().evict_session(self.room_id) {
            warn!(room_id = %self.room_id, error = %e, "failed to evict room cache");
        }
        state.start = None;
        state.launching = None;
        state.synced_epoch = None;
        if !state.phase.is_terminal() {
            state.transition(to);
        }
        debug!(room_id = %self.room_id, removed, phase = ?state.phase, "room session closed");
    }

    fn require_host(&self, state: &SessionState, operation: &'static str) -> Result<()> {
        if state.room.is_owned_by(self.user.id) {
            Ok(())
        } else {
            Err(QuizRoomError::NotHost(operation))
        }
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Connect and finish entry or resubscribe after a degraded start.
    ///
    /// # Errors
    ///
    /// Returns the connection or subscription error.
    pub async fn retry_connection(&self) -> Result<()> {
        self.hub.connection().connect().await?;
        // Skip the drain while `next_update` owns the inbox; it drains
        // before it applies the connection event.
        let mut inbox = self.inbox.try_lock().ok();
        let mut state = self.state.lock().await;
        let launch = match inbox.as_deref_mut() {
            Some(inbox) => self.apply_buffered(&mut inbox.events_rx, &mut state).await,
            None => None,
        };
        let result = self.sync(&mut state).await;
        drop(state);
        if let Some(quiz_id) = launch {
            self.finish_launch(quiz_id).await;
        }
        result
    }

    /// Also receive in-game question countdown ticks.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::NotConnected`] if the hub is unreachable; the
    /// topic is still subscribed on the next resync.
    pub async fn watch_question_countdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.phase.is_active() {
            return Err(QuizRoomError::InvalidState {
                operation: "watch the question countdown",
                phase: state.phase,
            });
        }
        state.watch_question_countdown = true;
        self.hub
            .registry()
            .subscribe_channel(self.room_id, EventKind::QuestionCountdown, self.events_tx.clone())
            .await?;
        Ok(())
    }

    // ── Lobby ───────────────────────────────────────────────────────

    /// Change visibility and capacity. Host only.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::Validation`] for out-of-range settings,
    /// [`QuizRoomError::NotHost`], [`QuizRoomError::InvalidState`] outside the
    /// lobby, or the REST error.
    pub async fn update_settings(&self, settings: RoomSettings) -> Result<()> {
        settings.validate()?;
        self.check_lobby_host("change room settings").await?;
        self.hub
            .services()
            .rooms
            .update_room(self.room_id, &RoomUpdate::settings(self.user.id, settings))
            .await?;

        let mut state = self.state.lock().await;
        state.room.is_public = settings.is_public;
        state.room.max_players = settings.max_players;
        self.persist(&state);
        Ok(())
    }

    /// Attach `quiz` to the room and cache it. Host only.
    ///
    /// # Errors
    ///
    /// Same as [`update_settings`](Self::update_settings).
    pub async fn select_quiz(&self, quiz: Quiz) -> Result<()> {
        self.check_lobby_host("select a quiz").await?;
        self.hub
            .services()
            .rooms
            .update_room(self.room_id, &RoomUpdate::quiz(self.user.id, quiz.id))
            .await?;
        if let Err(e) = self.hub.cache().put_quiz(&quiz) {
            warn!(quiz_id = %quiz.id, error = %e, "failed to cache quiz");
        }

        let mut state = self.state.lock().await;
        state.room.quiz_id = Some(quiz.id);
        self.persist(&state);
        info!(room_id = %self.room_id, quiz_id = %quiz.id, "quiz selected");
        Ok(())
    }

    async fn check_lobby_host(&self, operation: &'static str) -> Result<()> {
        let state = self.state.lock().await;
        self.require_host(&state, operation)?;
        match state.phase {
            RoomPhase::Joining | RoomPhase::InLobby => Ok(()),
            phase => Err(QuizRoomError::InvalidState { operation, phase }),
        }
    }

    /// Ask the hub to start the countdown. Host only.
    ///
    /// The session moves to `Starting` right away. If the hub does not start
    /// the countdown within the confirm timeout, or the request cannot be
    /// sent, it goes back to `InLobby` with [`SessionUpdate::StartReverted`].
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::NotHost`], [`QuizRoomError::InvalidState`] outside
    /// `InLobby`, [`QuizRoomError::Validation`] without a quiz, or the publish
    /// error.
    pub async fn start_match(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.require_host(&state, "start the match")?;
        if state.phase != RoomPhase::InLobby {
            return Err(QuizRoomError::InvalidState {
                operation: "start the match",
                phase: state.phase,
            });
        }
        if state.room.quiz_id.is_none() {
            return Err(QuizRoomError::Validation(
                "select a quiz before starting the match".into(),
            ));
        }

        state.transition(RoomPhase::Starting);
        state.start = Some(StartRequest::Requested {
            deadline: Instant::now() + self.hub.config().start_confirm_timeout,
        });
        match self
            .hub
            .connection()
            .publish_command(self.room_id, &RoomCommand::StartMatch)
            .await
        {
            Ok(()) => {
                info!(room_id = %self.room_id, "start requested");
                Ok(())
            }
            Err(e) => {
                self.revert_start(&mut state, e.to_string());
                Err(e)
            }
        }
    }

    /// Broadcast the game start with the room's quiz. Host only.
    ///
    /// The local transition to `InGame` happens when the broadcast comes back.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::NotHost`], [`QuizRoomError::InvalidState`] outside the
    /// lobby or countdown, [`QuizRoomError::Validation`] without a quiz, or the
    /// publish error.
    pub async fn launch_game(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.require_host(&state, "start the game")?;
        if !matches!(state.phase, RoomPhase::InLobby | RoomPhase::Starting) {
            return Err(QuizRoomError::InvalidState {
                operation: "start the game",
                phase: state.phase,
            });
        }
        let Some(quiz_id) = state.room.quiz_id else {
            return Err(QuizRoomError::Validation(
                "select a quiz before starting the game".into(),
            ));
        };
        drop(state);

        self.hub
            .connection()
            .publish_command(self.room_id, &RoomCommand::GameStart { quiz_id })
            .await
    }

    // ── Game ────────────────────────────────────────────────────────

    /// Score an answer and broadcast the points.
    ///
    /// A second call for the same question fails immediately with
    /// [`QuizRoomError::DuplicateSubmission`] while the first is in flight.
    /// Without a score id the answer is checked against the answer key and
    /// scored locally only.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::DuplicateSubmission`], [`QuizRoomError::InvalidState`]
    /// outside `InGame`, or the REST error. A failed broadcast is only logged.
    pub async fn submit_answer(&self, question_id: QuestionId, answer_id: AnswerId) -> Result<u32> {
        let guard = self.pending.begin(question_id, answer_id)?;

        let score_id = {
            let state = self.state.lock().await;
            if state.phase != RoomPhase::InGame {
                return Err(QuizRoomError::InvalidState {
                    operation: "submit an answer",
                    phase: state.phase,
                });
            }
            state.score_id
        };

        let Some(score_id) = score_id else {
            return self.score_locally(question_id, answer_id).await;
        };

        let submission = AnswerSubmission {
            score_id,
            room_id: self.room_id,
            user_id: self.user.id,
            answer_id,
            sent_at: guard.answer().submitted_at,
        };
        let awarded = self
            .hub
            .services()
            .scores
            .calculate_answer_score(&submission)
            .await?;
        let delta = awarded.points_earned;

        let mut guard_state = self.state.lock().await;
        let state = &mut *guard_state;
        if state.phase.is_terminal() {
            return Ok(delta);
        }
        if let Some(total) = state.ledger.apply_local(&mut state.room.scoreboard, delta) {
            self.persist(state);
            state
                .queued
                .push_back(SessionUpdate::ScoreChanged { score_id, points: total });
        }

        let command = RoomCommand::PlayerScore {
            score_id,
            points_earned: delta,
        };
        if let Err(e) = self.hub.connection().publish_command(self.room_id, &command).await {
            warn!(room_id = %self.room_id, error = %e, "score broadcast dropped");
            state.ledger.retract_unconfirmed(delta);
        }
        debug!(room_id = %self.room_id, %question_id, delta, "answer scored");
        Ok(delta)
    }

    async fn score_locally(&self, question_id: QuestionId, answer_id: AnswerId) -> Result<u32> {
        let correct = self
            .hub
            .services()
            .questions
            .correct_answer(question_id)
            .await?;
        let points = if correct == answer_id {
            self.hub.config().fallback_points
        } else {
            0
        };
        let mut state = self.state.lock().await;
        if state.phase.is_terminal() {
            return Ok(points);
        }
        state.local_points = state.local_points.saturating_add(points);
        let total = state.local_points;
        state
            .queued
            .push_back(SessionUpdate::LocalScoreChanged { points: total });
        debug!(room_id = %self.room_id, %question_id, points, "answer scored locally");
        Ok(points)
    }

    /// The question currently being played.
    pub async fn current_question(&self) -> Option<Question> {
        let state = self.state.lock().await;
        if state.phase != RoomPhase::InGame {
            return None;
        }
        state
            .quiz
            .as_ref()
            .and_then(|quiz| quiz.questions.get(state.question_index))
            .cloned()
    }

    /// Move to the next question. Returns `None` and finishes the game when
    /// the questions run out.
    ///
    /// # Errors
    ///
    /// [`QuizRoomError::InvalidState`] outside `InGame`.
    pub async fn advance_question(&self) -> Result<Option<Question>> {
        let mut state = self.state.lock().await;
        if state.phase != RoomPhase::InGame {
            return Err(QuizRoomError::InvalidState {
                operation: "advance to the next question",
                phase: state.phase,
            });
        }
        state.question_index += 1;
        let next = state
            .quiz
            .as_ref()
            .and_then(|quiz| quiz.questions.get(state.question_index))
            .cloned();
        if next.is_none() {
            state.transition(RoomPhase::Finished);
        }
        Ok(next)
    }

    // ── Leaving ─────────────────────────────────────────────────────

    /// Leave the room.
    ///
    /// The host deletes the room. A guest broadcasts its departure, waits
    /// briefly, then exits through the score service. Subscriptions and
    /// cached keys are removed and the session ends whatever the server
    /// answers; the REST error, if any, is returned.
    ///
    /// # Errors
    ///
    /// The REST error from deleting or exiting the room.
    pub async fn leave(&self) -> Result<()> {
        let (is_host, score_id) = {
            let state = self.state.lock().await;
            if state.phase.is_terminal() {
                return Ok(());
            }
            (state.room.is_owned_by(self.user.id), state.score_id)
        };

        let (result, to) = if is_host {
            info!(room_id = %self.room_id, "host leaving; deleting room");
            let result = self
                .hub
                .services()
                .rooms
                .delete_room(self.room_id, self.user.id)
                .await;
            (result, RoomPhase::Closed)
        } else {
            info!(room_id = %self.room_id, "leaving room");
            let result = match score_id {
                Some(score_id) => {
                    let command = RoomCommand::PlayerLeft { score_id };
                    if let Err(e) = self.hub.connection().publish_command(self.room_id, &command).await {
                        warn!(room_id = %self.room_id, error = %e, "departure broadcast dropped");
                    }
                    tokio::time::sleep(self.hub.config().leave_broadcast_delay).await;
                    self.hub.services().scores.exit_room(score_id).await
                }
                None => Ok(()),
            };
            (result, RoomPhase::Left)
        };

        if let Err(e) = &result {
            warn!(room_id = %self.room_id, error = %e, "server-side leave failed; leaving locally");
        }
        let mut state = self.state.lock().await;
        self.close(&mut state, to).await;
        result
    }

    /// Stop receiving room events without leaving. The cache is kept so the
    /// room can be resumed later.
    pub async fn detach(&self) {
        let removed = self.hub.registry().unsubscribe_all(self.room_id).await;
        let mut state = self.state.lock().await;
        state.detached = true;
        state.synced_epoch = None;
        debug!(room_id = %self.room_id, removed, "room session detached");
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    pub async fn phase(&self) -> RoomPhase {
        self.state.lock().await.phase
    }

    /// Snapshot of the room.
    pub async fn room(&self) -> Room {
        self.state.lock().await.room.clone()
    }

    pub async fn score_id(&self) -> Option<ScoreId> {
        self.state.lock().await.score_id
    }

    /// Whether the local user owns the room, from the current snapshot.
    pub async fn is_host(&self) -> bool {
        self.state.lock().await.room.is_owned_by(self.user.id)
    }

    pub async fn leaderboard(&self) -> Vec<ScoreEntry> {
        self.state.lock().await.room.scoreboard.leaderboard()
    }

    /// Points earned in local-only scoring mode.
    pub async fn local_points(&self) -> u32 {
        self.state.lock().await.local_points
    }

    pub async fn start_request(&self) -> Option<StartRequest> {
        self.state.lock().await.start
    }

    pub async fn quiz(&self) -> Option<Quiz> {
        self.state.lock().await.quiz.clone()
    }

    /// Whether an answer for `question_id` is being scored.
    pub fn is_submitting(&self, question_id: &QuestionId) -> bool {
        self.pending.is_pending(question_id)
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // Closing the receiver orphans this session's registry entries, so a
        // later session for the room can subscribe again.
        self.inbox.get_mut().events_rx.close();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.hub.registry().clone();
        let room_id = self.room_id;
        runtime.spawn(async move {
            registry.release_orphaned(room_id).await;
        });
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.room_id)
            .field("user", &self.user.id)
            .finish_non_exhaustive()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
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
    fn lobby_round_trip_is_allowed() {
        assert!(RoomPhase::InLobby.can_transition_to(RoomPhase::Starting));
        assert!(RoomPhase::Starting.can_transition_to(RoomPhase::InLobby));
        assert!(RoomPhase::Starting.can_transition_to(RoomPhase::InGame));
        assert!(!RoomPhase::InLobby.can_transition_to(RoomPhase::InGame));
    }

    #[test]
    fn terminal_phases_are_final() {
        for to in [RoomPhase::Joining, RoomPhase::InLobby, RoomPhase::Left, RoomPhase::Closed] {
            assert!(!RoomPhase::Left.can_transition_to(to));
            assert!(!RoomPhase::Closed.can_transition_to(to));
        }
    }

    #[test]
    fn any_active_phase_can_end() {
        for from in [
            RoomPhase::Joining,
            RoomPhase::InLobby,
            RoomPhase::Starting,
            RoomPhase::InGame,
            RoomPhase::Finished,
        ] {
            assert!(from.can_transition_to(RoomPhase::Left));
            assert!(from.can_transition_to(RoomPhase::Closed));
        }
        assert!(!RoomPhase::Idle.can_transition_to(RoomPhase::Left));
    }

    #[test]
    fn game_cannot_restart() {
        assert!(!RoomPhase::InGame.can_transition_to(RoomPhase::Starting));
        assert!(!RoomPhase::Finished.can_transition_to(RoomPhase::InGame));
    }
}
