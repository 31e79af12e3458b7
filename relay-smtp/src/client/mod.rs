//! SMTP client used for outbound delivery.

mod data;
mod error;
mod response;
mod smtp_client;

pub use data::encode_data;
pub use error::{ClientError, Result};
pub use response::Response;
pub use smtp_client::SmtpClient;
