use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use relay_common::internal;
use tokio::sync::mpsc;

use super::{BrokerMessage, Consumer, Publisher};
use crate::QueueError;

/// How many times a message dropped unsettled is handed out again before
/// the broker gives up on it
pub const DEFAULT_MAX_REDELIVERIES: u16 = 24;

#[derive(Debug)]
struct Pending {
    body: Arc<[u8]>,
    attempts: u16,
    /// Times this message came back after being dropped unsettled
    redeliveries: u16,
}

#[derive(Debug)]
struct Inner {
    tx: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Pending>>,
    redelivery_timeout: Duration,
    max_redeliveries: u16,
}

impl Inner {
    fn send(&self, pending: Pending) -> crate::Result<()> {
        self.tx
            .lock()?
            .as_ref()
            .ok_or_else(|| QueueError::Broker("broker is closed".to_string()))?
            .send(pending)
            .map_err(|_| QueueError::Broker("broker is closed".to_string()))
    }

    fn send_after(self: &Arc<Self>, pending: Pending, delay: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = inner.send(pending) {
                internal!(level = WARN, "Dropping delayed broker message: {err}");
            }
        });
    }
}

/// In-process broker
///
/// Messages are held in an unbounded channel. Requeued messages are parked on
/// a timer and re-enter the channel when their delay expires. A message that
/// is dropped unsettled, for example because the worker holding it panicked,
/// comes back after `redelivery_timeout`, at most `max_redeliveries` times.
/// After that it expires.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new(redelivery_timeout: Duration) -> Self {
        Self::with_limits(redelivery_timeout, DEFAULT_MAX_REDELIVERIES)
    }

    #[must_use]
    pub fn with_limits(redelivery_timeout: Duration, max_redeliveries: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                redelivery_timeout,
                max_redeliveries,
            }),
        }
    }

    /// Stop accepting messages; consumers drain what is buffered, then get `None`
    pub fn close(&self) {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, body: Vec<u8>) -> crate::Result<()> {
        self.inner.send(Pending {
            body: Arc::from(body),
            attempts: 1,
            redeliveries: 0,
        })
    }
}

#[async_trait]
impl Consumer for MemoryBroker {
    async fn next(&self) -> Option<Box<dyn BrokerMessage>> {
        let pending = self.inner.rx.lock().await.recv().await?;

        Some(Box::new(MemoryMessage {
            broker: Arc::clone(&self.inner),
            body: pending.body,
            attempts: pending.attempts,
            redeliveries: pending.redeliveries,
            settled: AtomicBool::new(false),
        }))
    }
}

struct MemoryMessage {
    broker: Arc<Inner>,
    body: Arc<[u8]>,
    attempts: u16,
    redeliveries: u16,
    settled: AtomicBool,
}

impl MemoryMessage {
    fn settle(&self) -> crate::Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Broker("message already settled".to_string()));
        }
        Ok(())
    }

    fn next_attempt(&self, redeliveries: u16) -> Pending {
        Pending {
            body: Arc::clone(&self.body),
            attempts: self.attempts.saturating_add(1),
            redeliveries,
        }
    }
}

#[async_trait]
impl BrokerMessage for MemoryMessage {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn attempts(&self) -> u16 {
        self.attempts
    }

    async fn finish(&self) -> crate::Result<()> {
        self.settle()
    }

    async fn requeue(&self, delay: Duration) -> crate::Result<()> {
        self.settle()?;

        let pending = self.next_attempt(self.redeliveries);
        if delay.is_zero() {
            self.broker.send(pending)
        } else {
            self.broker.send_after(pending, delay);
            Ok(())
        }
    }
}

impl Drop for MemoryMessage {
    fn drop(&mut self) {
        if self.settled.load(Ordering::SeqCst) {
            return;
        }

        if self.redeliveries >= self.broker.max_redeliveries {
            internal!(
                level = WARN,
                "Broker message (attempt {}) dropped unsettled {} times, expiring it",
                self.attempts,
                self.redeliveries.saturating_add(1)
            );
            return;
        }

        if tokio::runtime::Handle::try_current().is_ok() {
            internal!(
                level = DEBUG,
                "Broker message (attempt {}) dropped unsettled, redelivering in {:?}",
                self.attempts,
                self.broker.redelivery_timeout
            );
            self.broker.send_after(
                self.next_attempt(self.redeliveries.saturating_add(1)),
                self.broker.redelivery_timeout,
            );
        }
    }
}
