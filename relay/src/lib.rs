//! The relay daemon: reads its configuration and runs the delivery engine
//! over the configured spool until told to stop.

pub mod controller;

pub use controller::Relay;
