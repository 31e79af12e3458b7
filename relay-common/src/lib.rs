//! Pieces shared by every relay crate: logging setup, the shutdown signal,
//! and the SMTP envelope.

pub mod envelope;
pub mod logging;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
