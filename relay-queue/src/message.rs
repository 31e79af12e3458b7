//! The persisted record of a queued delivery job, and the payload the broker
//! carries to point at it.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::SerializationError,
    types::{JobId, MessageKey, WorkerId},
};

/// Sender used by a bounce that itself could not be bounced.
///
/// Only ever compared against; a new job is never created with this sender.
pub const DOUBLE_BOUNCE_SENDER: &str = "#@[]";

/// Where a job currently stands.
///
/// The numeric codes are the ones older tooling stores for the same states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for its next delivery attempt
    Pending,
    /// Held by a worker, see [`QueuedMessage::lease`]
    InProgress,
    /// Marked by an operator (or a failed clean-up) for removal
    Discard,
    /// Marked for bouncing back to the sender on the next attempt
    Bounce,
}

impl JobState {
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::InProgress => 0,
            Self::Discard => 1,
            Self::Pending => 2,
            Self::Bounce => 3,
        }
    }

    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::InProgress),
            1 => Some(Self::Discard),
            2 => Some(Self::Pending),
            3 => Some(Self::Bounce),
            _ => None,
        }
    }
}

/// Tier given to a requeue; decides which state the job resumes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequeueTier {
    /// Removing the job failed, try removing it again
    Discard = 1,
    /// Ordinary retry of the delivery
    #[default]
    Retry = 2,
    /// Handing the job over to a bounce failed, try bouncing again
    Bounce = 3,
}

impl RequeueTier {
    #[must_use]
    pub const fn step(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn resume_state(self) -> JobState {
        match self {
            Self::Discard => JobState::Discard,
            Self::Retry => JobState::Pending,
            Self::Bounce => JobState::Bounce,
        }
    }
}

/// Advisory claim a worker holds on a job while delivering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// A queued (sender, recipient, message) delivery job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: JobId,
    /// Address of the raw message in the blob store
    pub key: MessageKey,
    pub mail_from: String,
    pub rcpt_to: String,
    /// Recipient domain, used for routing
    pub host: String,
    /// Extra route table key consulted before `host`
    pub routing_hint: Option<String>,
    pub added_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub next_delivery_scheduled_at: DateTime<Utc>,
    pub state: JobState,
    pub lease: Option<Lease>,
    pub requeue_tier: Option<RequeueTier>,
    pub last_error: Option<String>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(
        key: MessageKey,
        mail_from: impl Into<String>,
        rcpt_to: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::generate(),
            key,
            mail_from: mail_from.into(),
            rcpt_to: rcpt_to.into(),
            host: host.into(),
            routing_hint: None,
            added_at: now,
            last_update: now,
            next_delivery_scheduled_at: now,
            state: JobState::Pending,
            lease: None,
            requeue_tier: None,
            last_error: None,
        }
    }

    /// The sender is empty, so this job is itself a bounce
    pub fn is_bounce(&self) -> bool {
        self.mail_from.is_empty()
    }

    /// The sender is the double-bounce sentinel
    pub fn is_double_bounce(&self) -> bool {
        self.mail_from == DOUBLE_BOUNCE_SENDER
    }

    pub const fn touch(&mut self, now: DateTime<Utc>) {
        self.last_update = now;
    }

    /// How long the job has been in the queue
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.added_at
    }

    /// Take ownership of the job for `ttl`.
    pub fn claim(&mut self, owner: WorkerId, ttl: Duration, now: DateTime<Utc>) {
        self.state = JobState::InProgress;
        self.lease = Some(Lease {
            owner,
            expires_at: saturating_after(now, ttl),
        });
    }

    /// Whoever holds this job has not been heard from for too long.
    ///
    /// Records written before leases existed only have `last_update` to go by.
    pub fn is_lease_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.lease.as_ref().map_or_else(
            || now - self.last_update >= to_delta(threshold),
            |lease| now >= lease.expires_at,
        )
    }

    /// Give the job up until `at`, resuming in the state implied by `tier`.
    pub fn schedule(&mut self, tier: RequeueTier, at: DateTime<Utc>) {
        self.state = tier.resume_state();
        self.requeue_tier = Some(tier);
        self.next_delivery_scheduled_at = at;
        self.lease = None;
    }
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `now + duration`, pinned to the latest representable time on overflow
#[must_use]
pub fn saturating_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// What travels through the broker: just enough to find the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub id: JobId,
}

impl JobPayload {
    /// # Errors
    ///
    /// If the payload cannot be encoded
    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    /// # Errors
    ///
    /// If `body` is not an encoded payload
    pub fn decode(body: &[u8]) -> Result<Self, SerializationError> {
        let (payload, _) =
            bincode::serde::decode_from_slice::<Self, _>(body, bincode::config::standard())?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn message() -> QueuedMessage {
        QueuedMessage::new(
            MessageKey::for_content(b"body"),
            "a@b.com",
            "c@d.com",
            "d.com",
        )
    }

    #[test]
    fn state_codes_round_trip() {
        for state in [
            JobState::Pending,
            JobState::InProgress,
            JobState::Discard,
            JobState::Bounce,
        ] {
            assert_eq!(JobState::from_code(state.code()), Some(state));
        }
        assert_eq!(JobState::InProgress.code(), 0);
        assert_eq!(JobState::Bounce.code(), 3);
        assert_eq!(JobState::from_code(7), None);
    }

    #[test]
    fn tiers_resume_into_matching_state() {
        assert_eq!(RequeueTier::default(), RequeueTier::Retry);
        assert_eq!(RequeueTier::Discard.step(), 1);
        assert_eq!(RequeueTier::Retry.step(), 2);
        assert_eq!(RequeueTier::Bounce.step(), 3);

        assert_eq!(RequeueTier::Discard.resume_state(), JobState::Discard);
        assert_eq!(RequeueTier::Retry.resume_state(), JobState::Pending);
        assert_eq!(RequeueTier::Bounce.resume_state(), JobState::Bounce);
    }

    #[test]
    fn bounce_senders() {
        let mut msg = message();
        assert!(!msg.is_bounce());
        assert!(!msg.is_double_bounce());

        msg.mail_from = String::new();
        assert!(msg.is_bounce());

        msg.mail_from = DOUBLE_BOUNCE_SENDER.to_string();
        assert!(msg.is_double_bounce());
        assert!(!msg.is_bounce());
    }

    #[test]
    fn fresh_lease_is_not_stale() {
        let now = Utc::now();
        let mut msg = message();
        msg.claim(WorkerId::generate(), Duration::from_secs(3600), now);

        assert_eq!(msg.state, JobState::InProgress);
        assert!(!msg.is_lease_stale(now + TimeDelta::minutes(59), Duration::from_secs(3600)));
        assert!(msg.is_lease_stale(now + TimeDelta::minutes(61), Duration::from_secs(3600)));
    }

    #[test]
    fn huge_lease_saturates() {
        let now = Utc::now();
        let mut msg = message();
        msg.claim(WorkerId::generate(), Duration::from_secs(u64::MAX), now);

        let lease = msg.lease.as_ref().unwrap();
        assert_eq!(lease.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!msg.is_lease_stale(now, Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn leaseless_record_uses_last_update() {
        let now = Utc::now();
        let mut msg = message();
        msg.state = JobState::InProgress;
        msg.last_update = now - TimeDelta::hours(2);

        assert!(msg.is_lease_stale(now, Duration::from_secs(3600)));

        msg.last_update = now - TimeDelta::minutes(5);
        assert!(!msg.is_lease_stale(now, Duration::from_secs(3600)));
    }

    #[test]
    fn schedule_releases_lease() {
        let now = Utc::now();
        let mut msg = message();
        msg.claim(WorkerId::generate(), Duration::from_secs(60), now);

        msg.schedule(RequeueTier::Bounce, now + TimeDelta::minutes(3));

        assert_eq!(msg.state, JobState::Bounce);
        assert_eq!(msg.requeue_tier, Some(RequeueTier::Bounce));
        assert_eq!(msg.next_delivery_scheduled_at, now + TimeDelta::minutes(3));
        assert!(msg.lease.is_none());
    }

    #[test]
    fn payload_decoding() {
        let payload = JobPayload {
            id: JobId::generate(),
        };
        let body = payload.encode().unwrap();
        assert_eq!(JobPayload::decode(&body).unwrap(), payload);

        assert!(JobPayload::decode(b"definitely not a job payload").is_err());
        assert!(JobPayload::decode(&[]).is_err());
    }
}
