//! The delivery job state machine
//!
//! [`Delivery::process`] takes one broker message from dequeue to exactly
//! one settlement (finish or requeue), apart from the cases where leaving the
//! message alone is the right thing to do: the job belongs to another worker
//! ([`Outcome::Skipped`]) or its payload is unreadable ([`Outcome::Abandoned`]).
//!
//! ```text
//!          lookup ──not found──► finish (already delivered)
//!            │
//!   InProgress ──fresh lease──► skip
//!            │ └─stale─────────► requeue (retry)
//!   Discard ─┼─────────────────► claim, discard
//!   Bounce ──┤ (flag)
//!   Pending ─┤
//!          claim, fetch body ──► bounce if flagged
//!            │
//!      local / remote strategy
//!            │
//!   ok ► delete, finish      temporary ► requeue until queue lifetime
//!                            permanent ► bounce (or discard a bounce)
//! ```

pub mod local;
pub mod remote;
pub mod worker;

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use relay_common::{
    envelope::{Envelope, NULL_SENDER},
    internal,
};
use relay_queue::{
    BlobStore, BrokerMessage, Enqueue, JobPayload, JobState, MessageKey, QueueError,
    QueuedMessage, RecordStore, RequeueTier, WorkerId, saturating_after,
};
use relay_smtp::Dialer;
use tracing::{error, info, warn};

use crate::{
    bounce::{BounceFields, BounceTemplate},
    config::DeliveryConfig,
    dns::Resolve,
    error::{DeliveryError, SystemError},
    processor::local::LocalDeliverer,
    route::RouteResolver,
};

/// Requeue delay added per delivery attempt
pub const BACKOFF_STEP: Duration = Duration::from_secs(60);

const EXPIRED_SUFFIX: &str =
    "\r\nI'm not going to try again, this message has been in the queue for too long.";

const BOUNCED_BY_ADMIN: &str = "bounced by admin";

/// How processing a broker message ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handed to the next hop; the job is gone
    Delivered,
    /// Removed without delivery (already delivered, discarded, or a bounce
    /// that could not be delivered)
    Discarded,
    /// A report was queued for the sender and the job removed
    Bounced {
        /// Blob key of the queued report
        bounce_id: MessageKey,
    },
    /// Handed back to the broker
    Requeued { delay: Duration, tier: RequeueTier },
    /// Another worker holds the job; the message was left alone
    Skipped,
    /// The payload could not be decoded; the message was left alone
    Abandoned,
}

/// Linear backoff: one [`BACKOFF_STEP`] per attempt so far
pub fn backoff(attempts: u16) -> Duration {
    BACKOFF_STEP * u32::from(attempts)
}

/// Everything a job talks to besides its configuration
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Where bounce reports are queued
    pub enqueue: Arc<dyn Enqueue>,
    pub dialer: Arc<dyn Dialer>,
    pub resolver: Arc<dyn Resolve>,
    pub local: Arc<dyn LocalDeliverer>,
}

/// Runs delivery jobs; one instance is shared by every worker
#[derive(Debug)]
pub struct Delivery {
    config: Arc<DeliveryConfig>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    enqueue: Arc<dyn Enqueue>,
    local: Arc<dyn LocalDeliverer>,
    routes: RouteResolver,
    template: BounceTemplate,
}

impl Delivery {
    pub fn new(
        config: Arc<DeliveryConfig>,
        template: BounceTemplate,
        collaborators: Collaborators,
    ) -> Self {
        let routes = RouteResolver::new(
            collaborators.dialer,
            collaborators.resolver,
            config.routes.clone(),
            config.default_local_ip.clone(),
            config.me.clone(),
            config.dial_timeout(),
        );

        Self {
            config,
            records: collaborators.records,
            blobs: collaborators.blobs,
            enqueue: collaborators.enqueue,
            local: collaborators.local,
            routes,
            template,
        }
    }

    /// Build from configuration, loading the bounce template it names
    ///
    /// # Errors
    ///
    /// If the configured bounce template cannot be read
    pub fn from_config(
        config: Arc<DeliveryConfig>,
        collaborators: Collaborators,
    ) -> Result<Self, DeliveryError> {
        let template = BounceTemplate::from_config(&config.bounce)
            .map_err(|err| SystemError::Configuration(err.to_string()))?;

        Ok(Self::new(config, template, collaborators))
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Drive one broker message to its outcome
    #[tracing::instrument(level = tracing::Level::DEBUG, skip_all, fields(%worker, attempts = message.attempts()))]
    pub async fn process(&self, worker: WorkerId, message: &dyn BrokerMessage) -> Outcome {
        let payload = match JobPayload::decode(message.body()) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Unable to decode job payload, leaving it to the broker: {err}");
                return Outcome::Abandoned;
            }
        };

        let record = match self.records.lookup(&payload.id).await {
            Ok(record) => record,
            Err(QueueError::NotFound(id)) => {
                info!(job_id = %id, "Job not in the store, already delivered, discarding");
                finish(message).await;
                return Outcome::Discarded;
            }
            Err(err) => {
                error!(job_id = %payload.id, "Unable to load job: {err}");
                return requeue_message(message, RequeueTier::Retry).await;
            }
        };

        Job {
            delivery: self,
            message,
            worker,
            record,
            body: None,
        }
        .run()
        .await
    }
}

/// One processing attempt of one job
struct Job<'a> {
    delivery: &'a Delivery,
    message: &'a dyn BrokerMessage,
    worker: WorkerId,
    record: QueuedMessage,
    body: Option<Arc<[u8]>>,
}

impl Job<'_> {
    async fn run(mut self) -> Outcome {
        let delivery = self.delivery;
        let config = &delivery.config;
        let now = Utc::now();

        let bounce_requested = match self.record.state {
            JobState::InProgress => {
                if self.record.is_lease_stale(now, config.stale_threshold()) {
                    warn!(
                        job_id = %self.record.id,
                        "Job has been marked in delivery for too long, requeueing"
                    );
                    return self.requeue(RequeueTier::Retry).await;
                }

                info!(job_id = %self.record.id, "Job is being delivered by another worker");
                return Outcome::Skipped;
            }
            JobState::Discard => {
                self.claim().await;
                return self.discard().await;
            }
            JobState::Bounce => true,
            JobState::Pending => false,
        };

        self.claim().await;

        let body: Arc<[u8]> = match delivery.blobs.get(&self.record.key).await {
            Ok(body) => Arc::from(body),
            Err(err) if err.is_unavailable() => {
                error!(job_id = %self.record.id, "Unable to reach the message store: {err}");
                return self.requeue(RequeueTier::Retry).await;
            }
            Err(err) => {
                return self
                    .die_temp(format!("unable to retrieve raw mail from store. {err}"))
                    .await;
            }
        };
        self.body = Some(Arc::clone(&body));

        if bounce_requested {
            // A failed hand-off to the bounce path keeps its reason; anything
            // else in this state was put there by an operator
            let reason = match (self.record.requeue_tier, &self.record.last_error) {
                (Some(RequeueTier::Bounce), Some(reason)) => reason.clone(),
                _ => BOUNCED_BY_ADMIN.to_string(),
            };
            return self.bounce(reason).await;
        }

        let result = if config.is_local(&self.record.host) {
            delivery.local.deliver(&self.record, &body).await
        } else {
            self.deliver_remote().await
        };

        match result {
            Ok(()) => self.die_ok().await,
            Err(DeliveryError::Permanent(err)) => self.die_perm(err.to_string()).await,
            Err(err) => self.die_temp(err.reason()).await,
        }
    }

    /// Mark the job as ours. Losing this write only delays staleness
    /// detection, so it is not fatal.
    async fn claim(&mut self) {
        let now = Utc::now();
        self.record
            .claim(self.worker, self.delivery.config.stale_threshold(), now);
        self.record.touch(now);

        if let Err(err) = self.delivery.records.save(&self.record).await {
            warn!(job_id = %self.record.id, "Unable to mark job in delivery: {err}");
        }
    }

    async fn die_ok(&mut self) -> Outcome {
        info!(job_id = %self.record.id, rcpt = %self.record.rcpt_to, "Delivered");

        if let Err(err) = self.delivery.records.delete(&self.record.id).await {
            error!(job_id = %self.record.id, "Unable to remove delivered job: {err}");
        }

        finish(self.message).await;
        Outcome::Delivered
    }

    async fn die_temp(&mut self, reason: String) -> Outcome {
        info!(job_id = %self.record.id, "Temporary failure: {reason}");

        let lifetime = TimeDelta::from_std(self.delivery.config.queue_lifetime())
            .unwrap_or(TimeDelta::MAX);

        if self.record.age(Utc::now()) < lifetime {
            self.record.last_error = Some(reason);
            return self.requeue(RequeueTier::Retry).await;
        }

        self.die_perm(reason + EXPIRED_SUFFIX).await
    }

    async fn die_perm(&mut self, reason: String) -> Outcome {
        info!(job_id = %self.record.id, "Permanent failure: {reason}");
        self.bounce(reason).await
    }

    async fn discard(&mut self) -> Outcome {
        info!(job_id = %self.record.id, "Discarding job");

        match self.delivery.records.delete(&self.record.id).await {
            Ok(()) => {
                finish(self.message).await;
                Outcome::Discarded
            }
            Err(err) => {
                error!(job_id = %self.record.id, "Unable to remove job: {err}");
                self.requeue(RequeueTier::Discard).await
            }
        }
    }

    async fn bounce(&mut self, reason: String) -> Outcome {
        if self.record.is_bounce() || self.record.is_double_bounce() {
            info!(
                job_id = %self.record.id,
                from = %self.record.mail_from,
                rcpt = %self.record.rcpt_to,
                "Undeliverable bounce, discarding"
            );
            return self.discard().await;
        }

        let rendered = self.delivery.template.render(&BounceFields {
            date: Utc::now(),
            me: &self.delivery.config.me,
            rcpt_to: &self.record.mail_from,
            ori_rcpt_to: &self.record.rcpt_to,
            err_msg: &reason,
            bounced_mail: self.body.as_deref(),
        });

        let report = match rendered {
            Ok(report) => report,
            Err(err) => {
                error!(job_id = %self.record.id, "Unable to render bounce: {err}");
                self.record.last_error = Some(reason);
                return self.requeue(RequeueTier::Bounce).await;
            }
        };

        let envelope = Envelope::new(NULL_SENDER, vec![self.record.mail_from.clone()]);
        let bounce_id = match self.delivery.enqueue.enqueue(&report, &envelope, None).await {
            Ok(key) => key,
            Err(err) => {
                error!(job_id = %self.record.id, "Unable to queue bounce: {err}");
                self.record.last_error = Some(reason);
                return self.requeue(RequeueTier::Bounce).await;
            }
        };

        info!(
            job_id = %self.record.id,
            from = %self.record.mail_from,
            rcpt = %self.record.rcpt_to,
            %bounce_id,
            "Queued bounce"
        );

        match self.delivery.records.delete(&self.record.id).await {
            Ok(()) => {
                finish(self.message).await;
                Outcome::Bounced { bounce_id }
            }
            Err(err) => {
                error!(job_id = %self.record.id, "Unable to remove bounced job: {err}");
                self.requeue(RequeueTier::Discard).await
            }
        }
    }

    /// Give the job back, to resume in the state `tier` implies.
    ///
    /// The broker decides when the job comes back; the record is only
    /// bookkeeping, so failing to write it is logged and ignored.
    async fn requeue(&mut self, tier: RequeueTier) -> Outcome {
        let delay = backoff(self.message.attempts());
        let now = Utc::now();

        self.record.schedule(tier, saturating_after(now, delay));
        self.record.touch(now);

        if let Err(err) = self.delivery.records.save(&self.record).await {
            error!(job_id = %self.record.id, "Unable to record requeue: {err}");
        }

        requeue_message(self.message, tier).await
    }
}

async fn finish(message: &dyn BrokerMessage) {
    if let Err(err) = message.finish().await {
        error!("Unable to acknowledge broker message: {err}");
    }
}

async fn requeue_message(message: &dyn BrokerMessage, tier: RequeueTier) -> Outcome {
    let delay = backoff(message.attempts());

    internal!(level = DEBUG, "Requeueing with tier {} in {delay:?}", tier.step());
    if let Err(err) = message.requeue(delay).await {
        error!("Unable to requeue broker message: {err}");
    }

    Outcome::Requeued { delay, tier }
}
