//! Error types for each layer of the service.
//!
//! None of these ever cross the wire as-is: the session handler renders
//! them into `ERROR|...` lines and the client folds them into empty results,
//! `false`, or a prefixed message.

use std::io;

use thiserror::Error;

/// Failures while turning protocol lines into requests, responses or words.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty request")]
    EmptyLine,

    #[error("Unsupported command: {0}")]
    UnknownCommand(String),

    #[error("{command} requires {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("{command} accepts at most {max} fields")]
    TooManyFields { command: &'static str, max: usize },

    #[error("unknown response status: {0}")]
    UnknownStatus(String),

    #[error("expected SUCCESS response, got {0}")]
    UnexpectedStatus(String),

    #[error("field '{field}' cannot be blank")]
    BlankField { field: &'static str },

    #[error("field '{field}' contains a reserved character")]
    ReservedCharacter { field: &'static str },
}

/// Failures reported by a [`crate::store::LookupStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lookup store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read seed file: {0}")]
    Seed(#[from] io::Error),

    #[error("invalid seed data: {0}")]
    SeedFormat(#[from] serde_json::Error),
}

/// Failures observed by the client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("server closed the connection")]
    ConnectionClosed,

    #[error("server error: {0}")]
    Server(String),

    #[error("timed out waiting for server reply")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
}

impl ClientError {
    /// Whether the underlying connection can no longer be trusted.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed | ClientError::Timeout | ClientError::Io(_)
        )
    }
}
