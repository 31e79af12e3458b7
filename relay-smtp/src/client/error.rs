//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

use super::response::Response;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP reply
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered a command with a negative reply
    #[error("{command} rejected: {reply}")]
    Rejected {
        command: &'static str,
        reply: Response,
    },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// The server's own words, as `<code> <text>`, if this is a rejection
    #[must_use]
    pub fn reply_line(&self) -> Option<String> {
        match self {
            Self::Rejected { reply, .. } => Some(reply.to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
