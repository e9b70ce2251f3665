//! REST collaborators over HTTP, using `reqwest`.
//!
//! [`HttpBackend`] implements every trait in [`services`](crate::services)
//! against the quiz backend. Every request carries the configured timeout.
//! Failed responses become [`QuizRoomError::RemoteService`] with the message
//! the backend put in `message` or `detail`.
//!
//! # Feature gate
//!
//! Only available with the `http-backend` feature (enabled by default).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::SyncConfig;
use crate::error::{QuizRoomError, Result};
use crate::error_codes::ErrorCode;
use crate::model::{Quiz, RoomSettings};
use crate::protocol::{AnswerId, QuestionId, QuizId, RoomId, ScoreId, UserId};
use crate::services::{
    AnswerSubmission, CreatedRoom, JoinedRoom, QuestionService, QuizSource, RoomService,
    RoomSummary, RoomUpdate, ScoreAwarded, ScoreService, ScoreboardCreated,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrectAnswer {
    correct_answer_id: AnswerId,
}

/// HTTP client for the quiz backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client for `config.api_base_url` with `config.request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| QuizRoomError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.api_base_url))
    }

    /// Use a preconfigured client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and turn non-2xx answers into errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        let err = remote_error(status.as_u16(), body.as_deref());
        if status.is_server_error() {
            error!(%url, status = status.as_u16(), "backend error: {err}");
        } else {
            warn!(%url, status = status.as_u16(), "request rejected: {err}");
        }
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(request_error)
    }
}

/// Build the error for a failed response from its status and body.
///
/// The message comes from the body's `message` field, then `detail`, then
/// the description of the status.
pub fn remote_error(status: u16, body: Option<&str>) -> QuizRoomError {
    let code = ErrorCode::from_status(status);
    let message = body
        .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
        .and_then(|v| {
            ["message", "detail"].iter().find_map(|field| {
                v.get(field)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| code.description().to_string());
    QuizRoomError::RemoteService {
        status,
        code,
        message,
        body: body.map(str::to_string),
    }
}

fn request_error(e: reqwest::Error) -> QuizRoomError {
    if e.is_timeout() {
        QuizRoomError::Timeout
    } else if e.is_decode() {
        QuizRoomError::Request(format!("unexpected response body: {e}"))
    } else {
        QuizRoomError::Request(e.to_string())
    }
}

#[async_trait]
impl RoomService for HttpBackend {
    async fn create_room(&self, owner_id: UserId, settings: RoomSettings) -> Result<CreatedRoom> {
        debug!(%owner_id, ?settings, "creating room");
        let body = json!({
            "ownerId": owner_id,
            "isPublic": settings.is_public,
            "maxNumberOfPlayersInRoom": settings.max_players,
        });
        self.send_json(self.client.post(self.url("/rooms")).json(&body))
            .await
    }

    async fn join_room(&self, code: &str, user_id: UserId) -> Result<JoinedRoom> {
        debug!(code, %user_id, "joining room");
        let body = json!({ "roomCode": code, "userId": user_id });
        self.send_json(self.client.post(self.url("/rooms/join")).json(&body))
            .await
    }

    async fn update_room(&self, room_id: RoomId, update: &RoomUpdate) -> Result<()> {
        let url = self.url(&format!("/rooms/{room_id}"));
        self.send(self.client.patch(url).json(update)).await?;
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        // The backend reads the bare user id as the JSON body.
        let url = self.url(&format!("/rooms/{room_id}"));
        self.send(self.client.delete(url).json(&user_id)).await?;
        Ok(())
    }

    async fn public_rooms(&self) -> Result<Vec<RoomSummary>> {
        self.send_json(self.client.get(self.url("/rooms/public")))
            .await
    }
}

#[async_trait]
impl ScoreService for HttpBackend {
    async fn create_scoreboard(&self, user_id: UserId, room_id: RoomId) -> Result<ScoreboardCreated> {
        let body = json!({ "userId": user_id, "roomId": room_id });
        self.send_json(
            self.client
                .post(self.url("/scores/create_scoreboard"))
                .json(&body),
        )
        .await
    }

    async fn calculate_answer_score(&self, submission: &AnswerSubmission) -> Result<ScoreAwarded> {
        let url = self.url(&format!("/scores/{}", submission.score_id));
        self.send_json(self.client.patch(url).json(submission)).await
    }

    async fn exit_room(&self, score_id: ScoreId) -> Result<()> {
        let url = self.url(&format!("/scores/{score_id}"));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}

#[async_trait]
impl QuizSource for HttpBackend {
    async fn quiz(&self, quiz_id: QuizId) -> Result<Quiz> {
        let url = self.url(&format!("/quiz/{quiz_id}"));
        self.send_json(self.client.get(url)).await
    }
}

#[async_trait]
impl QuestionService for HttpBackend {
    async fn correct_answer(&self, question_id: QuestionId) -> Result<AnswerId> {
        let url = self.url(&format!("/questions/{question_id}/correct-answer"));
        let answer: CorrectAnswer = self.send_json(self.client.get(url)).await?;
        Ok(answer.correct_answer_id)
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
    fn message_field_wins() {
        let err = remote_error(404, Some(r#"{"message":"Sala não encontrada","detail":"x"}"#));
        match err {
            QuizRoomError::RemoteService {
                status,
                code,
                message,
                body,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, ErrorCode::NotFound);
                assert_eq!(message, "Sala não encontrada");
                assert!(body.unwrap().contains("detail"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn detail_is_used_without_message() {
        let err = remote_error(422, Some(r#"{"detail":"Sala cheia"}"#));
        assert_eq!(err.user_message(), "Sala cheia");
    }

    #[test]
    fn non_json_body_falls_back_to_status_description() {
        let err = remote_error(500, Some("<html>oops</html>"));
        assert_eq!(err.user_message(), ErrorCode::InternalError.description());
        assert!(err.is_retryable());
    }

    #[test]
    fn base_url_is_normalized() {
        let config = SyncConfig::default().with_api_base_url("http://localhost:8080/");
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080");
        assert_eq!(backend.url("/rooms"), "http://localhost:8080/rooms");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_request_error() {
        let config = SyncConfig::default()
            .with_api_base_url("http://127.0.0.1:1")
            .with_request_timeout(std::time::Duration::from_secs(2));
        let backend = HttpBackend::new(&config).unwrap();
        let err = backend.public_rooms().await.unwrap_err();
        assert!(matches!(err, QuizRoomError::Request(_) | QuizRoomError::Timeout));
        assert!(err.is_retryable());
    }
}
