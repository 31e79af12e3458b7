//! The delivery queue: persisted job records, content-addressed message
//! storage, and the broker that hands jobs to workers.

pub mod backends;
pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod queue;
pub mod store;
pub mod types;

pub use backends::{
    FileBlobStore, FileRecordStore, MemoryBlobStore, MemoryRecordStore, TestBlobStore,
    TestRecordStore,
};
pub use broker::{
    BrokerMessage, BrokerOp, Consumer, DEFAULT_MAX_REDELIVERIES, MemoryBroker, Publisher,
    TestMessage,
};
pub use config::SpoolConfig;
pub use error::{QueueError, Result, SerializationError};
pub use message::{
    DOUBLE_BOUNCE_SENDER, JobPayload, JobState, Lease, QueuedMessage, RequeueTier,
    saturating_after,
};
pub use queue::{Enqueue, Queue};
pub use store::{BlobStore, RecordStore};
pub use types::{JobId, MessageKey, WorkerId};
