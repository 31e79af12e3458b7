//! Outbound delivery: takes queued jobs off the broker and drives each one to
//! delivery, retry, bounce or discard
//!
//! This module provides functionality to:
//! - Resolve routes (configured or from MX records) into live SMTP sessions
//! - Run the per-job state machine over the record and blob stores
//! - Compose bounce reports for permanently failed messages
//! - Deliver to local mailboxes for our own domains

pub mod bounce;
pub mod config;
pub mod dns;
pub mod error;
pub mod processor;
pub mod route;

pub use bounce::{BounceConfig, BounceError, BounceFields, BounceTemplate};
pub use config::{DeliveryConfig, WorkerConfig};
pub use dns::{DnsConfig, DnsError, DnsResolver, MailServer, Resolve};
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError, handle_smtp_error};
pub use processor::{
    Collaborators, Delivery, Outcome, backoff,
    local::{LocalDeliverer, MailboxDeliverer},
    worker::WorkerPool,
};
pub use route::{LocalIpSpec, Route, RouteError, RouteResolver, RouteTable};
