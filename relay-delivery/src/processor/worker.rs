//! Pulls jobs off the broker and runs them concurrently

use std::{sync::Arc, time::Duration};

use relay_common::{Signal, internal};
use relay_queue::{Consumer, WorkerId};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use super::{Delivery, Outcome};
use crate::config::WorkerConfig;

/// How long in-flight jobs get to finish once shutdown is requested
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WorkerPool {
    id: WorkerId,
    delivery: Arc<Delivery>,
    consumer: Arc<dyn Consumer>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(delivery: Arc<Delivery>, consumer: Arc<dyn Consumer>, config: &WorkerConfig) -> Self {
        Self {
            id: WorkerId::generate(),
            delivery,
            consumer,
            concurrency: config.concurrency.max(1),
        }
    }

    /// The owner recorded on the leases this pool takes
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Run jobs until shutdown is signalled or the broker closes
    ///
    /// A job that panics is logged and left unsettled, so the broker hands it
    /// out again once its redelivery timeout passes.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(worker = %self.id))]
    pub async fn serve(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        internal!(
            "Worker pool starting with {} concurrent jobs",
            self.concurrency
        );

        let mut jobs: JoinSet<Outcome> = JoinSet::new();

        loop {
            while let Some(result) = jobs.try_join_next() {
                Self::reap(result);
            }

            if jobs.len() >= self.concurrency {
                tokio::select! {
                    Some(result) = jobs.join_next() => Self::reap(result),
                    sig = shutdown.recv() => {
                        Self::log_signal(sig);
                        break;
                    }
                }
                continue;
            }

            tokio::select! {
                message = self.consumer.next() => {
                    let Some(message) = message else {
                        internal!(level = INFO, "Broker closed, worker pool stopping");
                        break;
                    };

                    let delivery = Arc::clone(&self.delivery);
                    let worker = self.id;
                    jobs.spawn(async move { delivery.process(worker, message.as_ref()).await });
                }
                sig = shutdown.recv() => {
                    Self::log_signal(sig);
                    break;
                }
            }
        }

        Self::drain(jobs).await;
        internal!("Worker pool shutdown complete");
    }

    async fn drain(mut jobs: JoinSet<Outcome>) {
        if jobs.is_empty() {
            return;
        }

        internal!(level = INFO, "Waiting for {} in-flight jobs", jobs.len());

        let finished = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while let Some(result) = jobs.join_next().await {
                Self::reap(result);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = jobs.len(),
                "Shutdown timeout exceeded, remaining jobs will be redelivered"
            );
            jobs.abort_all();
        } else {
            internal!(level = INFO, "All in-flight jobs completed");
        }
    }

    fn reap(result: Result<Outcome, JoinError>) {
        match result {
            Ok(outcome) => debug!(?outcome, "Job finished"),
            Err(err) if err.is_panic() => {
                error!("Delivery job panicked, leaving it for broker redelivery");
            }
            Err(err) => warn!("Delivery job was cancelled: {err}"),
        }
    }

    fn log_signal(sig: Result<Signal, tokio::sync::broadcast::error::RecvError>) {
        match sig {
            Ok(Signal::Shutdown | Signal::Finalised) => {
                internal!(level = INFO, "Worker pool received shutdown signal");
            }
            Err(err) => error!("Worker pool shutdown channel error: {err}"),
        }
    }
}
