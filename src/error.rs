//! Unified error handling for uberd.
//!
//! Protocol errors continue the session, authn/authz errors answer with
//! `DENIED` or `SERVERMSG`, and only a handful of conditions close the
//! connection. One session's failure never propagates to another.

use thiserror::Error;

use crate::db::DbError;

/// Errors surfaced by command handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Authentication failure: answered with `DENIED <reason>`.
    #[error("denied: {0}")]
    Denied(String),

    /// Registration failure: answered with `REGISTRATIONDENIED <reason>`.
    #[error("registration denied: {0}")]
    RegistrationDenied(String),

    /// Recoverable protocol or permission error: answered with
    /// `SERVERMSG <text>`, the session continues.
    #[error("{0}")]
    ServerMsg(String),

    /// The session must be closed (flood, kick, fatal handler failure).
    #[error("disconnect: {0}")]
    Disconnect(String),

    /// Database failure. Surfaced as `SERVERMSG Internal error` and logged.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl HandlerError {
    /// Shorthand for a [`HandlerError::ServerMsg`] value.
    pub fn msg(text: impl Into<String>) -> Self {
        Self::ServerMsg(text.into())
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;
