//! Error codes for REST failures reported by the quiz backend.
//!
//! The backend answers failed requests with an HTTP status and, usually, a
//! JSON body carrying `message` or `detail`. [`ErrorCode`] classifies the
//! status so callers can pick a user-facing message and decide whether a
//! retry makes sense.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured classification of a failed REST call.
///
/// Serialized as `"SCREAMING_SNAKE_CASE"` strings (e.g., `"NOT_FOUND"`) so the
/// code can be logged or persisted alongside the original status.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client errors
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,

    // Server errors
    InternalError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,

    // Anything else
    Unknown,
}

impl ErrorCode {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::UnprocessableEntity,
            429 => Self::TooManyRequests,
            500 => Self::InternalError,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` if repeating the same request later may succeed.
    ///
    /// Mutating calls are still never retried automatically; this only tells
    /// the UI whether offering a "try again" button is sensible.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TooManyRequests
                | Self::BadGateway
                | Self::ServiceUnavailable
                | Self::GatewayTimeout
                | Self::InternalError
        )
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => {
                "The request was rejected by the server. Check the room code and settings."
            }
            Self::Unauthorized => "You need to sign in again before doing this.",
            Self::Forbidden => "You are not allowed to perform this action in this room.",
            Self::NotFound => {
                "The room or quiz could not be found. It may have been closed or the code is incorrect."
            }
            Self::Conflict => "The room changed while you were editing it. Reload and try again.",
            Self::UnprocessableEntity => {
                "The server could not process the request. Some of the provided values are invalid."
            }
            Self::TooManyRequests => {
                "Too many requests in a short time. Please slow down and try again later."
            }
            Self::InternalError => {
                "An internal server error occurred. Please try again or contact support if the issue persists."
            }
            Self::BadGateway | Self::GatewayTimeout => {
                "The server is not responding. Check that the backend is running."
            }
            Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again in a few moments."
            }
            Self::Unknown => "An unexpected error occurred while talking to the server.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_are_classified() {
        assert_eq!(ErrorCode::from_status(400), ErrorCode::BadRequest);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::UnprocessableEntity);
        assert_eq!(ErrorCode::from_status(500), ErrorCode::InternalError);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::Unknown);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ErrorCode::ServiceUnavailable.is_retryable());
        assert!(ErrorCode::TooManyRequests.is_retryable());
        assert!(!ErrorCode::NotFound.is_retryable());
        assert!(!ErrorCode::BadRequest.is_retryable());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::UnprocessableEntity).unwrap();
        assert_eq!(json, "\"UNPROCESSABLE_ENTITY\"");
    }

    #[test]
    fn display_uses_description() {
        assert_eq!(
            ErrorCode::NotFound.to_string(),
            ErrorCode::NotFound.description()
        );
    }
}
