use async_trait::async_trait;

use crate::{
    message::QueuedMessage,
    types::{JobId, MessageKey},
};

/// Persistence for queued delivery jobs
///
/// Implementations must be safe to share between workers; two workers never
/// hold the same job at once, but they do touch the store concurrently.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// [`QueueError::NotFound`](crate::QueueError::NotFound) if there is no
    /// record for `id`, anything else if the store could not be read
    async fn lookup(&self, id: &JobId) -> crate::Result<QueuedMessage>;

    /// Insert or overwrite the record for `message.id`
    ///
    /// # Errors
    ///
    /// If the record could not be written
    async fn save(&self, message: &QueuedMessage) -> crate::Result<()>;

    /// # Errors
    ///
    /// If the record does not exist or could not be removed
    async fn delete(&self, id: &JobId) -> crate::Result<()>;

    /// Every job currently persisted, oldest first
    ///
    /// # Errors
    ///
    /// If the store could not be enumerated
    async fn list(&self) -> crate::Result<Vec<JobId>>;
}

/// Content-addressed storage for raw messages
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// [`QueueError::BlobNotFound`](crate::QueueError::BlobNotFound) if the
    /// store holds nothing under `key`,
    /// [`QueueError::Unavailable`](crate::QueueError::Unavailable) if it could
    /// not be reached
    async fn get(&self, key: &MessageKey) -> crate::Result<Vec<u8>>;

    /// Store `data`, returning the key it can be fetched with
    ///
    /// # Errors
    ///
    /// If the data could not be stored
    async fn put(&self, data: &[u8]) -> crate::Result<MessageKey>;
}
