//! Transport abstraction for the event hub connection.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and the hub. Hub frames are JSON text messages, so every
//! transport implementation must handle message framing internally (e.g.,
//! WebSocket frames, length-prefixed TCP).
//!
//! Opening a transport is the job of a [`Connector`]. The connection manager
//! holds one connector and asks it for a fresh transport on every connect or
//! reconnect attempt.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use quiz_room_sync::error::QuizRoomError;
//! use quiz_room_sync::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), QuizRoomError> {
//!         // Send the JSON text message over your transport
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, QuizRoomError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), QuizRoomError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::QuizRoomError;

/// A bidirectional text message transport to the event hub.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), QuizRoomError>;

    /// Receive the next JSON text frame from the hub.
    ///
    /// Returns:
    /// - `Some(Ok(text))` when a complete message was received
    /// - `Some(Err(e))` on a transport error
    /// - `None` when the connection was closed cleanly by the hub
    async fn recv(&mut self) -> Option<Result<String, QuizRoomError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), QuizRoomError>;
}

/// Opens new [`Transport`]s to the event hub.
///
/// The connection manager calls [`connect`](Connector::connect) once per
/// connection attempt, so implementations must be reusable.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh transport.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Connection`] or [`QuizRoomError::Io`] when the
    /// hub cannot be reached.
    async fn connect(&self) -> Result<Box<dyn Transport>, QuizRoomError>;
}
