//! Error types for the sync engine

use thiserror::Error;

/// Result type alias using the engine error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the sync engine and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (config files, sockets behind a reader)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure talking to a remote member
    #[error("Network error: {0}")]
    Network(String),

    /// Failure reported by the local durable oplog
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed or unexpected record received from a remote cursor
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Membership service failure
    #[error("Membership error: {0}")]
    Membership(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse errors from config files
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Collaborator invariant broken (e.g. a cursor used after reset)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a membership error
    pub fn membership(msg: impl Into<String>) -> Self {
        Self::Membership(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the producer loop should treat this as a transient data/store
    /// failure (short backoff) rather than an unexpected one (long backoff).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Store(_) | Error::InvalidRecord(_) => true,
            Error::Io(io_error) => matches!(
                io_error.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
