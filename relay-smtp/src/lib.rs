//! Outbound SMTP: reply classification, the line-level client, and dialing
//! sessions from a chosen source address.

pub mod client;
pub mod dialer;
pub mod reply;
pub mod timeouts;

pub use client::{ClientError, Response, SmtpClient};
pub use dialer::{Dialer, SmtpSession, TcpDialer};
pub use reply::{ReplyError, ReplyLine};
pub use timeouts::SmtpTimeouts;
