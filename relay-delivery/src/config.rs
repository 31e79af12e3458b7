use std::time::Duration;

use relay_queue::DEFAULT_MAX_REDELIVERIES;
use relay_smtp::SmtpTimeouts;
use serde::Deserialize;

use crate::{bounce::BounceConfig, dns::DnsConfig, route::RouteTable};

fn default_me() -> String {
    "localhost".to_string()
}

fn default_local_ip() -> String {
    "0.0.0.0".to_string()
}

const fn default_queue_lifetime() -> u64 {
    7200 // 5 days
}

const fn default_stale_threshold() -> u64 {
    3600
}

const fn default_dial_timeout() -> u64 {
    30
}

const fn default_concurrency() -> usize {
    16
}

const fn default_redelivery_timeout() -> u64 {
    300
}

const fn default_max_redeliveries() -> u16 {
    DEFAULT_MAX_REDELIVERIES
}

/// How outbound delivery behaves
///
/// Built once at start-up and shared read-only by every job.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Our host name: the EHLO identity and the bounce sender's domain
    #[serde(default = "default_me")]
    pub me: String,

    /// How long a job may keep failing temporarily before it is bounced
    /// (in minutes)
    ///
    /// Default: 7200 (5 days)
    #[serde(default = "default_queue_lifetime")]
    pub queue_lifetime_mins: u64,

    /// How long a claimed job may go without news before another worker
    /// takes it back (in seconds)
    ///
    /// Default: 3600 (1 hour)
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// Domains delivered to local mailboxes instead of over SMTP
    #[serde(default)]
    pub local_domains: Vec<String>,

    /// Source address specification for routes synthesised from MX records
    #[serde(default = "default_local_ip")]
    pub default_local_ip: String,

    #[serde(default)]
    pub routes: RouteTable,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    #[serde(default)]
    pub bounce: BounceConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            me: default_me(),
            queue_lifetime_mins: default_queue_lifetime(),
            stale_threshold_secs: default_stale_threshold(),
            dial_timeout_secs: default_dial_timeout(),
            local_domains: Vec::new(),
            default_local_ip: default_local_ip(),
            routes: RouteTable::default(),
            dns: DnsConfig::default(),
            smtp_timeouts: SmtpTimeouts::default(),
            bounce: BounceConfig::default(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn queue_lifetime(&self) -> Duration {
        Duration::from_secs(self.queue_lifetime_mins.saturating_mul(60))
    }

    #[must_use]
    pub const fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// `domain` is one of ours
    pub fn is_local(&self, domain: &str) -> bool {
        self.local_domains
            .iter()
            .any(|local| local.eq_ignore_ascii_case(domain))
    }
}

/// Sizing of the worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Jobs in flight at once
    ///
    /// Default: 16
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long the broker waits for a job that was never settled before
    /// handing it out again (in seconds)
    ///
    /// Default: 300
    #[serde(default = "default_redelivery_timeout")]
    pub redelivery_timeout_secs: u64,

    /// How many times an unsettled job is handed out again before the broker
    /// drops it. Keep `max_redeliveries * redelivery_timeout_secs` above the
    /// stale threshold, or a job whose holder crashed is dropped before its
    /// lease can be reclaimed.
    ///
    /// Default: 24
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            redelivery_timeout_secs: default_redelivery_timeout(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub const fn redelivery_timeout(&self) -> Duration {
        Duration::from_secs(self.redelivery_timeout_secs)
    }
}
