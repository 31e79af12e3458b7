use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    QueueError,
    message::QueuedMessage,
    store::{BlobStore, RecordStore},
    types::{JobId, MessageKey},
};

/// In-memory record store
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and
/// for running without a spool directory; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    pub(crate) records: Arc<RwLock<HashMap<JobId, QueuedMessage>>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recovers the data if the lock is poisoned
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn lookup(&self, id: &JobId) -> crate::Result<QueuedMessage> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or(QueueError::NotFound(*id))
    }

    async fn save(&self, message: &QueuedMessage) -> crate::Result<()> {
        self.records.write()?.insert(message.id, message.clone());
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> crate::Result<()> {
        self.records
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(*id))
    }

    async fn list(&self) -> crate::Result<Vec<JobId>> {
        let mut ids: Vec<_> = self.records.read()?.keys().copied().collect();

        // ULIDs sort by creation time
        ids.sort();

        Ok(ids)
    }
}

/// In-memory blob store keyed by content hash
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    pub(crate) blobs: Arc<RwLock<HashMap<MessageKey, Arc<[u8]>>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a blob, simulating a store that lost it
    pub fn remove(&self, key: &MessageKey) {
        self.blobs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &MessageKey) -> crate::Result<Vec<u8>> {
        self.blobs
            .read()?
            .get(key)
            .map(|data| data.to_vec())
            .ok_or_else(|| QueueError::BlobNotFound(key.clone()))
    }

    async fn put(&self, data: &[u8]) -> crate::Result<MessageKey> {
        let key = MessageKey::for_content(data);
        self.blobs
            .write()?
            .entry(key.clone())
            .or_insert_with(|| Arc::from(data));
        Ok(key)
    }
}
