//! Delivery to recipients in one of our own domains

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_queue::QueuedMessage;
use tracing::debug;

use crate::error::{DeliveryError, TemporaryError};

/// Hands a message to a local mailbox
#[async_trait]
pub trait LocalDeliverer: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// If the message could not be stored; failures are retried
    async fn deliver(&self, message: &QueuedMessage, body: &[u8]) -> Result<(), DeliveryError>;
}

/// Writes each message to `<root>/<recipient>/<job id>.eml`
#[derive(Debug, Clone)]
pub struct MailboxDeliverer {
    root: PathBuf,
}

impl MailboxDeliverer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `recipient`'s mail
    ///
    /// Path separators are replaced and the name is lowercased, so an address
    /// can never point outside the root.
    pub fn mailbox(&self, recipient: &str) -> PathBuf {
        let name: String = recipient
            .trim_matches(['<', '>'])
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        let name = if name.is_empty() || name.chars().all(|c| c == '.') {
            format!("_{name}")
        } else {
            name
        };

        self.root.join(name)
    }

    async fn write(&self, message: &QueuedMessage, body: &[u8]) -> std::io::Result<PathBuf> {
        let mailbox = self.mailbox(&message.rcpt_to);
        tokio::fs::create_dir_all(&mailbox).await?;

        let path = mailbox.join(format!("{}.eml", message.id));
        let tmp = mailbox.join(format!(".{}.eml.tmp", message.id));

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(path)
    }
}

#[async_trait]
impl LocalDeliverer for MailboxDeliverer {
    async fn deliver(&self, message: &QueuedMessage, body: &[u8]) -> Result<(), DeliveryError> {
        let path = self
            .write(message, body)
            .await
            .map_err(|err| TemporaryError::Mailbox(format!("{}: {err}", message.rcpt_to)))?;

        debug!(job_id = %message.id, path = %path.display(), "Delivered to local mailbox");
        Ok(())
    }
}
