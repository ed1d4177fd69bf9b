//! Error types for the rendezvous server

use thiserror::Error;

/// Reasons a session refuses a participant
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The session already holds two participants
    #[error("Room is full")]
    RoomFull,
}

/// Errors raised by gateway operations
///
/// None of these close the connection; they are reported back to the
/// connection that caused them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// `join-room` without a passkey
    #[error("Passkey is required")]
    InvalidRequest,

    /// Admission was refused by the session
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The connection was never opened or has already been closed
    #[error("Unknown connection")]
    UnknownConnection,
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing X-Connection-Id header or connection_id query parameter
    #[error("Missing connection id")]
    MissingConnectionId,

    /// Connection id is not a UUID
    #[error("Invalid connection id: {0}")]
    InvalidConnectionId(#[from] uuid::Error),

    /// Request body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),
}

/// Errors loading configuration from the environment
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors persisting gateway state between requests
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another instance held the state file for too long
    #[error("Timed out waiting for the state file lock")]
    LockTimeout,
}
