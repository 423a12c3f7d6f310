//! Call Controller error types.
//!
//! Error types map to wire `error` event codes for client responses.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Call Controller error type.
///
/// Maps to wire `error` codes:
/// - `Unauthorized`: `UNAUTHORIZED` (2)
/// - `SessionNotFound`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `Draining`: `UNAVAILABLE` (7)
#[derive(Debug, Error)]
pub enum CallError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential validation failed (missing, invalid, or validator failure).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Session not found (unknown or already finalized).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Conflict error (e.g. connection already linked to a session).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Controller is draining (graceful shutdown).
    #[error("Controller is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Returns the wire `error` code value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CallError::Config(_) | CallError::Internal(_) => 6, // INTERNAL_ERROR
            CallError::Unauthorized(_) => 2,                    // UNAUTHORIZED
            CallError::SessionNotFound(_) => 4,                 // NOT_FOUND
            CallError::Conflict(_) => 5,                        // CONFLICT
            CallError::Draining => 7,                           // UNAVAILABLE
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::Config(_) | CallError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            CallError::Unauthorized(_) => "Invalid or expired credential".to_string(),
            CallError::SessionNotFound(_) => "Session not found".to_string(),
            CallError::Conflict(msg) => msg.clone(),
            CallError::Draining => "Server is shutting down, please reconnect".to_string(),
        }
    }
}
