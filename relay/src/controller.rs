use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use anyhow::Context;
use relay_common::{Signal, internal, logging};
use relay_delivery::{
    Collaborators, Delivery, DeliveryConfig, DnsResolver, MailboxDeliverer, WorkerConfig,
    WorkerPool,
};
use relay_queue::{MemoryBroker, Queue, SpoolConfig};
use relay_smtp::TcpDialer;
use serde::Deserialize;
use tokio::sync::broadcast;

fn default_mailbox_root() -> PathBuf {
    PathBuf::from("/var/spool/relay/mailboxes")
}

/// The whole daemon, as read from its configuration file
#[derive(Debug, Deserialize)]
pub struct Relay {
    #[serde(default)]
    delivery: DeliveryConfig,
    #[serde(default)]
    worker: WorkerConfig,
    #[serde(default)]
    spool: SpoolConfig,
    /// Where mail for `delivery.local_domains` is written
    #[serde(default = "default_mailbox_root")]
    mailbox_root: PathBuf,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            delivery: DeliveryConfig::default(),
            worker: WorkerConfig::default(),
            spool: SpoolConfig::default(),
            mailbox_root: default_mailbox_root(),
        }
    }
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Relay {
    pub const fn delivery(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub const fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    pub const fn spool(&self) -> &SpoolConfig {
        &self.spool
    }

    pub fn mailbox_root(&self) -> &std::path::Path {
        &self.mailbox_root
    }

    /// Run the relay until a termination signal arrives
    ///
    /// # Errors
    ///
    /// If the stores, resolver or bounce template cannot be set up, or the
    /// persisted queue cannot be restored
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let ret = tokio::select! {
            r = self.serve(SHUTDOWN_BROADCAST.subscribe()) => r,
            r = shutdown() => r,
        };

        internal!("Shutting down...");

        ret
    }

    /// Wire the queue and delivery engine together, restore persisted jobs
    /// and deliver until `shutdown` fires
    ///
    /// # Errors
    ///
    /// See [`Relay::run`]
    pub async fn serve(self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let (records, blobs) = self
            .spool
            .into_stores()
            .context("Unable to initialise the spool")?;

        let broker = MemoryBroker::with_limits(
            self.worker.redelivery_timeout(),
            self.worker.max_redeliveries,
        );
        let queue = Queue::new(
            Arc::clone(&records),
            Arc::clone(&blobs),
            Arc::new(broker.clone()),
        );

        let resolver = DnsResolver::with_dns_config(self.delivery.dns.clone())
            .context("Unable to create the DNS resolver")?;
        let dialer = TcpDialer::new(self.delivery.smtp_timeouts.clone());

        let delivery = Delivery::from_config(
            Arc::new(self.delivery),
            Collaborators {
                records,
                blobs,
                enqueue: Arc::new(queue.clone()),
                dialer: Arc::new(dialer),
                resolver: Arc::new(resolver),
                local: Arc::new(MailboxDeliverer::new(self.mailbox_root)),
            },
        )
        .context("Unable to set up delivery")?;

        let restored = queue
            .restore()
            .await
            .context("Unable to restore the queue")?;
        internal!(level = INFO, "{restored} queued jobs picked up from the spool");

        let pool = WorkerPool::new(Arc::new(delivery), Arc::new(broker), &self.worker);
        pool.serve(shutdown).await;

        Ok(())
    }
}
