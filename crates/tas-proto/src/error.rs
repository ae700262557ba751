//! Error types for the lobby protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Protocol-level errors: framing failures and unparseable commands.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An I/O error occurred while reading or writing a frame.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A line exceeded the maximum frame length.
    #[error("line too long: {actual} bytes (limit {limit})")]
    LineTooLong {
        /// Observed length including the terminator.
        actual: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A line was not valid UTF-8.
    #[error("invalid utf-8 at byte {byte_pos}")]
    InvalidUtf8 {
        /// Offset of the first invalid byte.
        byte_pos: usize,
    },

    /// The line was empty or contained only whitespace.
    #[error("empty line")]
    EmptyLine,

    /// The command word is not part of the protocol.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// The command was recognized but its arguments did not parse.
    #[error("{cmd}: {reason}")]
    BadArguments {
        /// Command name as received.
        cmd: &'static str,
        /// Human-readable description of the problem.
        reason: String,
    },
}

impl ProtocolError {
    /// Shorthand for a [`ProtocolError::BadArguments`] value.
    pub fn bad_args(cmd: &'static str, reason: impl Into<String>) -> Self {
        Self::BadArguments {
            cmd,
            reason: reason.into(),
        }
    }
}
