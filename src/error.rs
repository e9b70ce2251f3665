//! Error types for the quiz room synchronization client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::protocol::QuestionId;
use crate::session::RoomPhase;

/// Errors that can occur while synchronizing a quiz room.
#[derive(Debug, Error)]
pub enum QuizRoomError {
    /// The transport to the event hub could not be opened or the hub rejected
    /// the handshake. Recoverable: the caller may retry or wait for the
    /// reconnect attempt.
    #[error("connection error: {0}")]
    Connection(String),

    /// Attempted to publish or subscribe while the hub connection is down.
    #[error("not connected to the event hub")]
    NotConnected,

    /// An answer for this question is already waiting for the scoring service.
    #[error("an answer for question {question_id} is already being scored")]
    DuplicateSubmission {
        /// Question the rejected answer was for.
        question_id: QuestionId,
    },

    /// A required value was missing or out of range; nothing was sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// A REST collaborator answered with an error status.
    #[error("remote service error ({status}): {message}")]
    RemoteService {
        /// HTTP status code.
        status: u16,
        /// Classified status.
        code: ErrorCode,
        /// Message extracted from the response body, or a generic one.
        message: String,
        /// Raw response body, kept for logs.
        body: Option<String>,
    },

    /// An event payload or hub frame could not be parsed.
    #[error("malformed {context}: {reason}")]
    MalformedEvent {
        /// What was being parsed (e.g. `"join event"`).
        context: String,
        /// Parser error message.
        reason: String,
    },

    /// The operation is reserved to the room owner.
    #[error("only the room host can {0}")]
    NotHost(&'static str),

    /// The operation does not apply to the session's current phase.
    #[error("cannot {operation} while the room is {phase:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Phase the session was in.
        phase: RoomPhase,
    },

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A REST request could not be delivered (no response from the server).
    #[error("request failed: {0}")]
    Request(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuizRoomError {
    /// Returns `true` if the same operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::NotConnected
            | Self::Timeout
            | Self::Request(_)
            | Self::TransportClosed
            | Self::TransportSend(_)
            | Self::TransportReceive(_) => true,
            Self::RemoteService { code, .. } => code.is_retryable(),
            _ => false,
        }
    }

    /// A message suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            Self::RemoteService { message, code, .. } if message.is_empty() => {
                code.description().to_string()
            }
            Self::RemoteService { message, .. } => message.clone(),
            Self::Connection(_) | Self::NotConnected | Self::TransportClosed => {
                "Connection to the game server was lost. Reconnecting…".to_string()
            }
            Self::Timeout | Self::Request(_) => {
                "The server is not responding. Please try again.".to_string()
            }
            Self::DuplicateSubmission { .. } => "Your answer is already being scored.".to_string(),
            other => other.to_string(),
        }
    }
}

/// A specialized [`Result`] type for quiz room operations.
pub type Result<T> = std::result::Result<T, QuizRoomError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_status_and_message() {
        let err = QuizRoomError::RemoteService {
            status: 404,
            code: ErrorCode::NotFound,
            message: "Sala não encontrada".into(),
            body: Some(r#"{"message":"Sala não encontrada"}"#.into()),
        };
        assert_eq!(err.to_string(), "remote service error (404): Sala não encontrada");
        assert_eq!(err.user_message(), "Sala não encontrada");
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_remote_message_falls_back_to_code_description() {
        let err = QuizRoomError::RemoteService {
            status: 503,
            code: ErrorCode::ServiceUnavailable,
            message: String::new(),
            body: None,
        };
        assert_eq!(err.user_message(), ErrorCode::ServiceUnavailable.description());
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_failures_are_retryable() {
        assert!(QuizRoomError::Connection("refused".into()).is_retryable());
        assert!(QuizRoomError::Timeout.is_retryable());
        assert!(!QuizRoomError::Validation("missing scoreId".into()).is_retryable());
        assert!(!QuizRoomError::DuplicateSubmission {
            question_id: uuid::Uuid::nil()
        }
        .is_retryable());
    }
}
