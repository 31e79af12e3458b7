use serde::{Deserialize, Serialize};

/// The reverse-path used for notifications that must never themselves bounce.
pub const NULL_SENDER: &str = "";

/// SMTP envelope of a message: who it is from and who it goes to.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    sender: String,
    recipients: Vec<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
        }
    }

    /// Returns the envelope sender for this message
    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Returns the envelope recipients for this message
    #[inline]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// `MAIL FROM:<>`, i.e. this message is a delivery notification
    #[inline]
    pub fn is_null_sender(&self) -> bool {
        self.sender == NULL_SENDER
    }
}

/// Extract the domain part of an address, lowercased.
///
/// Returns `None` when there is no `@` or nothing after it.
pub fn domain_of(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}
