use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{
    envelope::{Envelope, domain_of},
    internal,
};

use crate::{
    QueueError,
    broker::Publisher,
    message::{JobPayload, QueuedMessage},
    store::{BlobStore, RecordStore},
    types::MessageKey,
};

/// Accepts a message for delivery
#[async_trait]
pub trait Enqueue: Send + Sync + std::fmt::Debug {
    /// Store `raw` and create one delivery job per recipient of `envelope`
    ///
    /// `routing_hint` is consulted by route selection before the recipient
    /// domain.
    ///
    /// # Errors
    ///
    /// If a recipient has no domain, or the message could not be stored or
    /// published. Jobs for earlier recipients may already exist when a later
    /// one fails.
    async fn enqueue(
        &self,
        raw: &[u8],
        envelope: &Envelope,
        routing_hint: Option<&str>,
    ) -> crate::Result<MessageKey>;
}

/// The enqueue path over a record store, a blob store and a broker
#[derive(Debug, Clone)]
pub struct Queue {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    publisher: Arc<dyn Publisher>,
}

impl Queue {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            records,
            blobs,
            publisher,
        }
    }

    /// Publish every persisted job again, e.g. after a restart lost the
    /// broker's in-memory state
    ///
    /// Records that cannot be read are logged and skipped.
    ///
    /// # Errors
    ///
    /// If the record store cannot be listed or the broker rejects a job
    pub async fn restore(&self) -> crate::Result<usize> {
        let ids = self.records.list().await?;
        let mut restored = 0;

        for id in ids {
            if let Err(err) = self.records.lookup(&id).await {
                internal!(level = WARN, job_id = %id, "Skipping unreadable record: {err}");
                continue;
            }

            self.publisher.publish(JobPayload { id }.encode()?).await?;
            restored += 1;
        }

        internal!(level = INFO, "Restored {restored} queued jobs");

        Ok(restored)
    }
}

#[async_trait]
impl Enqueue for Queue {
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, raw, envelope), fields(size = raw.len(), from = envelope.sender()))]
    async fn enqueue(
        &self,
        raw: &[u8],
        envelope: &Envelope,
        routing_hint: Option<&str>,
    ) -> crate::Result<MessageKey> {
        if envelope.recipients().is_empty() {
            return Err(QueueError::InvalidRecipient("no recipients".to_string()));
        }

        let hosts = envelope
            .recipients()
            .iter()
            .map(|rcpt| domain_of(rcpt).ok_or_else(|| QueueError::InvalidRecipient(rcpt.clone())))
            .collect::<crate::Result<Vec<_>>>()?;

        let key = self.blobs.put(raw).await?;

        for (rcpt, host) in envelope.recipients().iter().zip(hosts) {
            let mut message = QueuedMessage::new(key.clone(), envelope.sender(), rcpt, host);
            message.routing_hint = routing_hint.map(ToString::to_string);

            self.records.save(&message).await?;
            self.publisher
                .publish(JobPayload { id: message.id }.encode()?)
                .await?;

            internal!(
                level = DEBUG,
                job_id = %message.id,
                "Queued {} -> {rcpt}",
                envelope.sender()
            );
        }

        Ok(key)
    }
}
