use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::memory::{MemoryBlobStore, MemoryRecordStore};
use crate::{
    QueueError,
    message::QueuedMessage,
    store::{BlobStore, RecordStore},
    types::{JobId, MessageKey},
};

/// Memory record store with switchable failures, for exercising error paths
#[derive(Debug, Clone, Default)]
pub struct TestRecordStore {
    pub(crate) inner: MemoryRecordStore,
    notify: Arc<Notify>,
    fail_lookup: Arc<AtomicBool>,
    fail_save: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl TestRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Successful deletes so far
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Every stored record, oldest first
    ///
    /// # Errors
    /// If the underlying store cannot be read
    pub async fn records(&self) -> crate::Result<Vec<QueuedMessage>> {
        let mut records = Vec::new();
        for id in self.inner.list().await? {
            records.push(self.inner.lookup(&id).await?);
        }
        Ok(records)
    }

    /// Wait until the store holds at least `expected` records
    ///
    /// # Errors
    /// Returns an error if the timeout is reached before the expected count
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) -> crate::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.inner.len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| QueueError::Internal(format!("Timeout waiting for records: {e}")))
    }
}

#[async_trait]
impl RecordStore for TestRecordStore {
    async fn lookup(&self, id: &JobId) -> crate::Result<QueuedMessage> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected lookup failure".to_string()));
        }
        self.inner.lookup(id).await
    }

    async fn save(&self, message: &QueuedMessage) -> crate::Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected save failure".to_string()));
        }
        self.inner.save(message).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> crate::Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected delete failure".to_string()));
        }
        self.inner.delete(id).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<JobId>> {
        self.inner.list().await
    }
}

/// Memory blob store that can be taken offline and counts reads
#[derive(Debug, Clone, Default)]
pub struct TestBlobStore {
    pub(crate) inner: MemoryBlobStore,
    unavailable: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl TestBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get` calls, failed ones included
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn remove(&self, key: &MessageKey) {
        self.inner.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl BlobStore for TestBlobStore {
    async fn get(&self, key: &MessageKey) -> crate::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected blob store outage".to_string()));
        }
        self.inner.get(key).await
    }

    async fn put(&self, data: &[u8]) -> crate::Result<MessageKey> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected blob store outage".to_string()));
        }
        self.inner.put(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_leave_data_untouched() {
        let store = TestRecordStore::new();
        let msg = QueuedMessage::new(MessageKey::for_content(b"x"), "a@b", "c@d", "d");
        store.save(&msg).await.expect("Failed to save");

        store.fail_delete(true);
        assert!(store.delete(&msg.id).await.unwrap_err().is_unavailable());
        assert_eq!(store.len(), 1);
        assert_eq!(store.deletes(), 0);

        store.fail_delete(false);
        store.delete(&msg.id).await.expect("Failed to delete");
        assert_eq!(store.deletes(), 1);
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn offline_blob_store_counts_reads() {
        let store = TestBlobStore::new();
        let key = store.put(b"hello").await.expect("Failed to put");

        store.set_unavailable(true);
        assert!(store.get(&key).await.unwrap_err().is_unavailable());

        store.set_unavailable(false);
        assert_eq!(store.get(&key).await.expect("Failed to get"), b"hello");
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn wait_for_count_times_out() {
        let store = TestRecordStore::new();
        assert!(
            store
                .wait_for_count(1, Duration::from_millis(20))
                .await
                .is_err()
        );
    }
}
