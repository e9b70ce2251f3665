#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for quiz room sync integration tests.
//!
//! [`FakeHub`] is an in-process pub/sub broker that speaks the client's
//! envelope frames and routes `send*` commands to room topics the way the
//! real hub does. [`FakeBackend`] implements every REST collaborator over an
//! in-memory room table.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use quiz_room_sync::error_codes::ErrorCode;
use quiz_room_sync::model::Answer;
use quiz_room_sync::protocol::{
    AnswerId, ClientFrame, EventKind, PlayerInfo, QuestionId, QuizId, RoomId, ScoreId, ServerFrame,
    UserId,
};
use quiz_room_sync::services::{
    AnswerSubmission, CreatedRoom, JoinedRoom, QuestionService, QuizSource, RoomService,
    RoomSummary, RoomUpdate, ScoreAwarded, ScoreService, ScoreboardCreated, ScoreboardDto,
};
use quiz_room_sync::{
    Connector, LocalUser, MemoryStore, Question, Quiz, QuizHub, QuizRoomError, RoomSession,
    RoomSettings, Services, SessionUpdate, SyncConfig, Transport,
};

// ── Fixtures ────────────────────────────────────────────────────────

pub fn ana() -> LocalUser {
    LocalUser::new(Uuid::from_u128(0xA1), "ana")
}

pub fn bia() -> LocalUser {
    LocalUser::new(Uuid::from_u128(0xB2), "bia")
}

pub fn caio() -> LocalUser {
    LocalUser::new(Uuid::from_u128(0xC3), "caio")
}

/// A two-question quiz whose first answer is always correct.
pub fn sample_quiz() -> Quiz {
    let question = |n: u128| Question {
        id: Uuid::from_u128(0xE000 + n),
        value: format!("question {n}"),
        answers: vec![
            Answer {
                id: correct_answer(n),
                value: "right".into(),
            },
            Answer {
                id: wrong_answer(n),
                value: "wrong".into(),
            },
        ],
    };
    Quiz {
        id: Uuid::from_u128(0xD1),
        topic: "rust".into(),
        questions: vec![question(1), question(2)],
    }
}

pub fn correct_answer(n: u128) -> AnswerId {
    Uuid::from_u128(0xF100 + n)
}

pub fn wrong_answer(n: u128) -> AnswerId {
    Uuid::from_u128(0xF200 + n)
}

/// Config with delays short enough for tests.
pub fn test_config() -> SyncConfig {
    SyncConfig::new("ws://fake-hub.test/establish-websockets-connection")
        .with_connect_timeout(Duration::from_secs(2))
        .with_handshake_timeout(Duration::from_secs(1))
        .with_reconnect_delay(Some(Duration::from_millis(50)))
        .with_connect_retry_delay(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_millis(200))
        .with_start_confirm_timeout(Duration::from_millis(300))
        .with_leave_broadcast_delay(Duration::from_millis(20))
        .with_fallback_points(100)
}

// ── FakeHub ─────────────────────────────────────────────────────────

struct HubClient {
    tx: mpsc::UnboundedSender<Option<String>>,
    /// subscription id → destination
    subs: HashMap<String, String>,
    alive: bool,
}

#[derive(Default)]
struct HubState {
    clients: Vec<HubClient>,
    published: Vec<(String, String)>,
    players: HashMap<ScoreId, PlayerInfo>,
}

/// In-process event hub.
#[derive(Clone)]
pub struct FakeHub {
    state: Arc<StdMutex<HubState>>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
    delay_ms: Arc<AtomicUsize>,
    auto_timer: Arc<AtomicBool>,
}

impl FakeHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(HubState::default())),
            connects: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicUsize::new(0)),
            delay_ms: Arc::new(AtomicUsize::new(0)),
            auto_timer: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { hub: self.clone() }
    }

    /// Number of transports opened so far, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Whether `sendStartMatch` starts a countdown. On by default.
    pub fn set_auto_timer(&self, enabled: bool) {
        self.auto_timer.store(enabled, Ordering::SeqCst);
    }

    /// Name the player behind `score_id` in join and exit broadcasts.
    pub fn register_player(&self, score_id: ScoreId, player: PlayerInfo) {
        self.state.lock().unwrap().players.insert(score_id, player);
    }

    /// Every `Send` frame received, as `(destination, body)`.
    pub fn published(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().published.clone()
    }

    /// Bodies published to the `/quizAI/{action}/{room_id}` destination.
    pub fn published_to(&self, action: &str, room_id: RoomId) -> Vec<Value> {
        let destination = format!("/quizAI/{action}/{room_id}");
        self.published()
            .into_iter()
            .filter(|(d, _)| *d == destination)
            .map(|(_, body)| serde_json::from_str(&body).unwrap())
            .collect()
    }

    /// Topics of `room_id` with at least one live subscriber, sorted.
    pub fn subscribed_topics(&self, room_id: RoomId) -> Vec<String> {
        let prefix = format!("/topic/rooms/{room_id}/");
        let state = self.state.lock().unwrap();
        let mut topics: Vec<String> = state
            .clients
            .iter()
            .filter(|c| c.alive)
            .flat_map(|c| c.subs.values().cloned())
            .filter(|d| d.starts_with(&prefix))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        topics.sort();
        topics
    }

    /// Number of live subscriptions on `topic`, across all clients.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .clients
            .iter()
            .filter(|c| c.alive)
            .flat_map(|c| c.subs.values())
            .filter(|d| d.as_str() == topic)
            .count()
    }

    pub fn live_clients(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .clients
            .iter()
            .filter(|c| c.alive)
            .count()
    }

    /// Deliver `body` to every subscriber of `topic`.
    pub fn broadcast(&self, topic: &str, body: &Value) {
        deliver(&mut self.state.lock().unwrap(), topic, &body.to_string());
    }

    /// Deliver a raw body, valid JSON or not.
    pub fn broadcast_raw(&self, topic: &str, body: &str) {
        deliver(&mut self.state.lock().unwrap(), topic, body);
    }

    pub fn broadcast_event(&self, room_id: RoomId, kind: EventKind, body: Value) {
        self.broadcast(&kind.topic(room_id), &body);
    }

    /// Close every live transport from the hub side.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        for client in state.clients.iter_mut().filter(|c| c.alive) {
            client.alive = false;
            client.subs.clear();
            let _ = client.tx.send(None);
        }
    }

    fn handle(&self, client: usize, text: &str) {
        let frame: ClientFrame = serde_json::from_str(text).unwrap();
        let mut state = self.state.lock().unwrap();
        match frame {
            ClientFrame::Connect { .. } => {
                let reply = serde_json::to_string(&ServerFrame::Connected {
                    session_id: Some(format!("session-{client}")),
                })
                .unwrap();
                let _ = state.clients[client].tx.send(Some(reply));
            }
            ClientFrame::Subscribe { id, destination } => {
                state.clients[client].subs.insert(id, destination);
            }
            ClientFrame::Unsubscribe { id } => {
                state.clients[client].subs.remove(&id);
            }
            ClientFrame::Send { destination, body } => {
                state.published.push((destination.clone(), body.clone()));
                self.route(&mut state, &destination, &body);
            }
            ClientFrame::Disconnect => {
                state.clients[client].alive = false;
                state.clients[client].subs.clear();
            }
        }
    }

    /// Turn an application destination into a topic broadcast.
    fn route(&self, state: &mut HubState, destination: &str, body: &str) {
        let Some(rest) = destination.strip_prefix("/quizAI/") else {
            return;
        };
        let Some((action, room)) = rest.split_once('/') else {
            return;
        };
        let room_id: RoomId = room.parse().unwrap();
        let body: Value = serde_json::from_str(body).unwrap();
        let player = |state: &HubState| {
            let score_id: ScoreId = serde_json::from_value(body["scoreId"].clone()).unwrap();
            state.players.get(&score_id).cloned().unwrap_or(PlayerInfo {
                id: Uuid::nil(),
                username: "unknown".into(),
            })
        };

        let (kind, out) = match action {
            "sendPlayerJoin" => (
                EventKind::Join,
                json!({ "scoreId": body["scoreId"], "player": player(&*state) }),
            ),
            "sendPlayerLeft" => (
                EventKind::Exit,
                json!({ "scoreId": body["scoreId"], "player": player(&*state) }),
            ),
            "sendPlayerScore" => (
                EventKind::ScoreUpdate,
                json!({ "scoreId": body["scoreId"], "pointsEarned": body["pointsEarned"] }),
            ),
            "sendStartMatch" => {
                if !self.auto_timer.load(Ordering::SeqCst) {
                    return;
                }
                (EventKind::Timer, json!({ "timeRemainingInSeconds": 5 }))
            }
            "sendGameStart" => (EventKind::GameStart, json!({ "quizId": body["quizId"] })),
            _ => return,
        };
        deliver(state, &kind.topic(room_id), &out.to_string());
    }
}

impl Default for FakeHub {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(state: &mut HubState, topic: &str, body: &str) {
    for client in state.clients.iter().filter(|c| c.alive) {
        for (id, destination) in &client.subs {
            if destination == topic {
                let frame = ServerFrame::Message {
                    subscription: id.clone(),
                    destination: destination.clone(),
                    body: body.to_string(),
                };
                let _ = client.tx.send(Some(serde_json::to_string(&frame).unwrap()));
            }
        }
    }
}

/// Opens loopback transports to a [`FakeHub`].
pub struct FakeConnector {
    hub: FakeHub,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, QuizRoomError> {
        self.hub.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.hub.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let refused = self
            .hub
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(QuizRoomError::Connection("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let index = {
            let mut state = self.hub.state.lock().unwrap();
            state.clients.push(HubClient {
                tx,
                subs: HashMap::new(),
                alive: true,
            });
            state.clients.len() - 1
        };
        Ok(Box::new(LoopbackTransport {
            hub: self.hub.clone(),
            index,
            incoming: rx,
        }))
    }
}

struct LoopbackTransport {
    hub: FakeHub,
    index: usize,
    incoming: mpsc::UnboundedReceiver<Option<String>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), QuizRoomError> {
        let alive = self.hub.state.lock().unwrap().clients[self.index].alive;
        if !alive {
            return Err(QuizRoomError::TransportClosed);
        }
        self.hub.handle(self.index, &message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, QuizRoomError>> {
        match self.incoming.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), QuizRoomError> {
        let mut state = self.hub.state.lock().unwrap();
        state.clients[self.index].alive = false;
        state.clients[self.index].subs.clear();
        Ok(())
    }
}

// ── FakeBackend ─────────────────────────────────────────────────────

struct FakeRoom {
    code: String,
    owner: PlayerInfo,
    is_public: bool,
    max_players: u32,
    quiz_id: Option<QuizId>,
    members: Vec<ScoreboardDto>,
}

#[derive(Default)]
struct BackendState {
    rooms: HashMap<RoomId, FakeRoom>,
    users: HashMap<UserId, String>,
    quizzes: HashMap<QuizId, Quiz>,
    answers: HashMap<QuestionId, AnswerId>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
    next_id: u128,
}

/// In-memory quiz backend implementing every REST collaborator.
pub struct FakeBackend {
    hub: FakeHub,
    state: StdMutex<BackendState>,
    award: AtomicUsize,
    score_delay_ms: AtomicUsize,
    quiz_delay_ms: AtomicUsize,
    omit_owner_scoreboard: AtomicBool,
}

impl FakeBackend {
    /// Knows [`ana`], [`bia`], [`caio`] and [`sample_quiz`].
    pub fn new(hub: &FakeHub) -> Arc<Self> {
        let mut state = BackendState {
            next_id: 0x1000,
            ..BackendState::default()
        };
        for user in [ana(), bia(), caio()] {
            state.users.insert(user.id, user.username);
        }
        let quiz = sample_quiz();
        for (n, question) in quiz.questions.iter().enumerate() {
            state.answers.insert(question.id, correct_answer(n as u128 + 1));
        }
        state.quizzes.insert(quiz.id, quiz);

        Arc::new(Self {
            hub: hub.clone(),
            state: StdMutex::new(state),
            award: AtomicUsize::new(100),
            score_delay_ms: AtomicUsize::new(0),
            quiz_delay_ms: AtomicUsize::new(0),
            omit_owner_scoreboard: AtomicBool::new(false),
        })
    }

    pub fn services(self: &Arc<Self>) -> Services {
        Services::from_shared(Arc::clone(self))
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| *c == operation).count()
    }

    /// Make `operation` answer 500 from now on.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Points awarded per scored answer.
    pub fn set_award(&self, points: u32) {
        self.award.store(points as usize, Ordering::SeqCst);
    }

    pub fn set_score_delay(&self, delay: Duration) {
        self.score_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_quiz_delay(&self, delay: Duration) {
        self.quiz_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Create rooms without the owner's scoreboard in the response.
    pub fn omit_owner_scoreboard(&self) {
        self.omit_owner_scoreboard.store(true, Ordering::SeqCst);
    }

    pub fn room_exists(&self, room_id: RoomId) -> bool {
        self.state.lock().unwrap().rooms.contains_key(&room_id)
    }

    pub fn member_count(&self, room_id: RoomId) -> usize {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(&room_id)
            .map_or(0, |r| r.members.len())
    }

    fn record(&self, operation: &'static str) -> Result<(), QuizRoomError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());
        if state.failing.contains(operation) {
            return Err(remote(500, "Erro interno"));
        }
        Ok(())
    }

    fn new_scoreboard(&self, state: &mut BackendState, user_id: UserId) -> ScoreboardDto {
        state.next_id += 1;
        let player = PlayerInfo {
            id: user_id,
            username: state
                .users
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| "player".into()),
        };
        let dto = ScoreboardDto {
            id: Uuid::from_u128(state.next_id),
            player: player.clone(),
            score: 0,
        };
        self.hub.register_player(dto.id, player);
        dto
    }
}

fn remote(status: u16, message: &str) -> QuizRoomError {
    QuizRoomError::RemoteService {
        status,
        code: ErrorCode::from_status(status),
        message: message.to_string(),
        body: None,
    }
}

#[async_trait]
impl RoomService for FakeBackend {
    async fn create_room(&self, owner_id: UserId, settings: RoomSettings) -> Result<CreatedRoom, QuizRoomError> {
        self.record("create_room")?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let room_id = Uuid::from_u128(state.next_id);
        let code = format!("R{:04X}", state.next_id);
        let owner_row = self.new_scoreboard(&mut state, owner_id);
        let owner = owner_row.player.clone();
        state.rooms.insert(
            room_id,
            FakeRoom {
                code: code.clone(),
                owner,
                is_public: settings.is_public,
                max_players: settings.max_players,
                quiz_id: None,
                members: vec![owner_row.clone()],
            },
        );
        let owner_scoreboard = if self.omit_owner_scoreboard.load(Ordering::SeqCst) {
            None
        } else {
            Some(owner_row)
        };
        Ok(CreatedRoom {
            id: room_id,
            room_code: code,
            is_public: settings.is_public,
            max_number_of_players: settings.max_players,
            owner_scoreboard,
        })
    }

    async fn join_room(&self, code: &str, user_id: UserId) -> Result<JoinedRoom, QuizRoomError> {
        self.record("join_room")?;
        let mut state = self.state.lock().unwrap();
        let Some(room_id) = state
            .rooms
            .iter()
            .find(|(_, r)| r.code == code)
            .map(|(id, _)| *id)
        else {
            return Err(remote(404, "Sala não encontrada"));
        };
        let full = {
            let room = &state.rooms[&room_id];
            room.members.len() as u32 >= room.max_players
        };
        if full {
            return Err(remote(409, "Sala cheia"));
        }
        let own = self.new_scoreboard(&mut state, user_id);
        let room = state.rooms.get_mut(&room_id).unwrap();
        let players_scores = room.members.clone();
        room.members.push(own.clone());
        Ok(JoinedRoom {
            room_id,
            scoreboard: own,
            players_scores,
            owner: room.owner.clone(),
            room_code: room.code.clone(),
            is_public: room.is_public,
            max_number_of_players: room.max_players,
            quiz_id: room.quiz_id,
        })
    }

    async fn update_room(&self, room_id: RoomId, update: &RoomUpdate) -> Result<(), QuizRoomError> {
        self.record("update_room")?;
        let mut state = self.state.lock().unwrap();
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| remote(404, "Sala não encontrada"))?;
        if room.owner.id != update.owner_id {
            return Err(remote(403, "Apenas o dono pode alterar a sala"));
        }
        if let Some(is_public) = update.is_public {
            room.is_public = is_public;
        }
        if let Some(max) = update.max_number_of_players_in_room {
            room.max_players = max;
        }
        if update.quiz_id.is_some() {
            room.quiz_id = update.quiz_id;
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), QuizRoomError> {
        self.record("delete_room")?;
        let removed = {
            let mut state = self.state.lock().unwrap();
            match state.rooms.get(&room_id) {
                None => return Err(remote(404, "Sala não encontrada")),
                Some(room) if room.owner.id != user_id => {
                    return Err(remote(403, "Apenas o dono pode excluir a sala"));
                }
                Some(_) => state.rooms.remove(&room_id),
            }
        };
        // The backend tells the room that its owner is gone.
        if let Some(room) = removed {
            if let Some(row) = room.members.iter().find(|m| m.player.id == room.owner.id) {
                self.hub.broadcast_event(
                    room_id,
                    EventKind::Exit,
                    json!({ "scoreId": row.id, "player": row.player }),
                );
            }
        }
        Ok(())
    }

    async fn public_rooms(&self) -> Result<Vec<RoomSummary>, QuizRoomError> {
        self.record("public_rooms")?;
        let state = self.state.lock().unwrap();
        let mut rooms: Vec<RoomSummary> = state
            .rooms
            .iter()
            .filter(|(_, r)| r.is_public)
            .map(|(id, r)| RoomSummary {
                id: *id,
                room_code: r.code.clone(),
                is_public: true,
                max_number_of_players: r.max_players,
                owner: Some(r.owner.clone()),
                number_of_players: r.members.len() as u32,
            })
            .collect();
        rooms.sort_by(|a, b| a.room_code.cmp(&b.room_code));
        Ok(rooms)
    }
}

#[async_trait]
impl ScoreService for FakeBackend {
    async fn create_scoreboard(&self, user_id: UserId, room_id: RoomId) -> Result<ScoreboardCreated, QuizRoomError> {
        self.record("create_scoreboard")?;
        let mut state = self.state.lock().unwrap();
        if !state.rooms.contains_key(&room_id) {
            return Err(remote(404, "Sala não encontrada"));
        }
        let existing = state.rooms[&room_id]
            .members
            .iter()
            .find(|m| m.player.id == user_id)
            .map(|m| m.id);
        let id = match existing {
            Some(id) => id,
            None => {
                let row = self.new_scoreboard(&mut state, user_id);
                let id = row.id;
                state.rooms.get_mut(&room_id).unwrap().members.push(row);
                id
            }
        };
        Ok(ScoreboardCreated { id })
    }

    async fn calculate_answer_score(&self, submission: &AnswerSubmission) -> Result<ScoreAwarded, QuizRoomError> {
        let delay = self.score_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.record("calculate_answer_score")?;
        let points = self.award.load(Ordering::SeqCst) as u32;
        let mut state = self.state.lock().unwrap();
        if let Some(room) = state.rooms.get_mut(&submission.room_id) {
            if let Some(row) = room.members.iter_mut().find(|m| m.id == submission.score_id) {
                row.score += points;
            }
        }
        Ok(ScoreAwarded {
            points_earned: points,
        })
    }

    async fn exit_room(&self, score_id: ScoreId) -> Result<(), QuizRoomError> {
        self.record("exit_room")?;
        let mut state = self.state.lock().unwrap();
        for room in state.rooms.values_mut() {
            room.members.retain(|m| m.id != score_id);
        }
        Ok(())
    }
}

#[async_trait]
impl QuizSource for FakeBackend {
    async fn quiz(&self, quiz_id: QuizId) -> Result<Quiz, QuizRoomError> {
        let delay = self.quiz_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.record("quiz")?;
        self.state
            .lock()
            .unwrap()
            .quizzes
            .get(&quiz_id)
            .cloned()
            .ok_or_else(|| remote(404, "Quiz não encontrado"))
    }
}

#[async_trait]
impl QuestionService for FakeBackend {
    async fn correct_answer(&self, question_id: QuestionId) -> Result<AnswerId, QuizRoomError> {
        self.record("correct_answer")?;
        self.state
            .lock()
            .unwrap()
            .answers
            .get(&question_id)
            .copied()
            .ok_or_else(|| remote(404, "Pergunta não encontrada"))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// One fake hub and backend shared by any number of clients.
pub struct Harness {
    pub hub: FakeHub,
    pub backend: Arc<FakeBackend>,
}

impl Harness {
    pub fn new() -> Self {
        let hub = FakeHub::new();
        let backend = FakeBackend::new(&hub);
        Self { hub, backend }
    }

    /// A fresh client with its own connection and cache.
    pub fn client(&self) -> (QuizHub, Arc<MemoryStore>) {
        self.client_with(test_config())
    }

    pub fn client_with(&self, config: SyncConfig) -> (QuizHub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (self.client_on(config, store.clone()), store)
    }

    /// A client over an existing store, as after an app restart.
    pub fn client_on(&self, config: SyncConfig, store: Arc<MemoryStore>) -> QuizHub {
        QuizHub::new(config, self.hub.connector(), self.backend.services(), store)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ── Waiting ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(3);

/// Pull updates until one matches `pred`; panics after a timeout or when
/// the session ends first.
pub async fn wait_for<F>(session: &RoomSession, mut pred: F) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    let result = tokio::time::timeout(WAIT, async {
        while let Some(update) = session.next_update().await {
            if pred(&update) {
                return Some(update);
            }
        }
        None
    })
    .await;
    match result {
        Ok(Some(update)) => update,
        Ok(None) => panic!("session ended before the expected update"),
        Err(_) => panic!("timed out waiting for session update"),
    }
}

/// Collect every update available within `window`.
pub async fn drain(session: &RoomSession, window: Duration) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Some(update) = session.next_update().await {
            updates.push(update);
        }
    })
    .await;
    updates
}

/// Poll `check` until it returns `true`; panics after a timeout.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
