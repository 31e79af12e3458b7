//! Error types for queue operations: record and blob persistence, payload
//! encoding and the job broker.

use std::io;

use thiserror::Error;

use crate::types::{JobId, MessageKey};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// No record exists for this job
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The blob store answered, but has no message under this key
    #[error("Message not found in store: {0}")]
    BlobNotFound(MessageKey),

    /// The backing store could not be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Broker error: {0}")]
    Broker(String),

    /// Lock poisoning and the like
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// The record or blob does not exist, as opposed to being unreachable
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BlobNotFound(_))
    }

    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
