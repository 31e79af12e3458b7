//! The message broker that hands delivery jobs to workers
//!
//! A broker message carries an encoded [`JobPayload`](crate::JobPayload).
//! Each message is settled by exactly one of [`BrokerMessage::finish`] or
//! [`BrokerMessage::requeue`]; a message settled by neither is redelivered
//! once the broker's own timeout passes.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::{DEFAULT_MAX_REDELIVERIES, MemoryBroker};
pub use test::{BrokerOp, TestMessage};

#[async_trait]
pub trait BrokerMessage: Send + Sync {
    fn body(&self) -> &[u8];

    /// Delivery count for this message, starting at 1
    fn attempts(&self) -> u16;

    /// Acknowledge the message; it will not be seen again
    ///
    /// # Errors
    ///
    /// If the broker could not record the acknowledgement
    async fn finish(&self) -> crate::Result<()>;

    /// Hand the message back, to be redelivered after `delay`
    ///
    /// # Errors
    ///
    /// If the broker could not take the message back
    async fn requeue(&self, delay: Duration) -> crate::Result<()>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// The next message, or `None` once the broker is closed
    async fn next(&self) -> Option<Box<dyn BrokerMessage>>;
}

#[async_trait]
pub trait Publisher: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// If the broker rejects the message
    async fn publish(&self, body: Vec<u8>) -> crate::Result<()>;
}
