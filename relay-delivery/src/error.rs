//! Typed error handling for delivery operations.
//!
//! Failures are split the way the state machine treats them:
//! - Permanent failures (5xx replies, queue lifetime exceeded) - bounce
//! - Temporary failures (4xx replies, routing, I/O) - requeue with backoff
//! - System errors - internal faults, retried like temporary failures

use std::net::IpAddr;

use relay_smtp::ReplyLine;
use thiserror::Error;

use crate::route::RouteError;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff (e.g., 4xx SMTP codes).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (I/O, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The remote server refused with a 5xx reply.
    #[error("remote {remote} reply: {message}")]
    RemoteReply { remote: IpAddr, message: String },
}

/// Temporary errors, retried until the job outlives the queue lifetime.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The remote server refused with a non-permanent reply.
    #[error("remote {remote} reply: {message}")]
    RemoteReply { remote: IpAddr, message: String },

    /// The remote server answered with something that is not an SMTP reply.
    #[error(transparent)]
    InvalidReply(#[from] relay_smtp::ReplyError),

    /// No route produced a usable connection.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The session failed below the reply level (I/O, timeout, closed).
    #[error("{0}")]
    Smtp(String),

    /// Local mailbox delivery failed.
    #[error("local delivery failed: {0}")]
    Mailbox(String),

    /// The raw message could not be read back from the blob store.
    #[error("{0}")]
    Store(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// The failure text as recorded on the job and shown in a bounce,
    /// without the category prefix.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Permanent(err) => err.to_string(),
            Self::Temporary(err) => err.to_string(),
            Self::System(err) => err.to_string(),
        }
    }
}

/// Classify a rejection line received from `remote`.
///
/// A line that is not an SMTP reply is a temporary failure, as is anything
/// below 500.
#[must_use]
pub fn handle_smtp_error(reply: &str, remote: IpAddr) -> DeliveryError {
    match ReplyLine::parse(reply) {
        Err(err) => TemporaryError::InvalidReply(err).into(),
        Ok(line) if line.is_permanent() => PermanentError::RemoteReply {
            remote,
            message: line.message,
        }
        .into(),
        Ok(line) => TemporaryError::RemoteReply {
            remote,
            message: line.message,
        }
        .into(),
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(err: std::io::Error) -> Self {
        Self::System(SystemError::Io(err))
    }
}
