//! DNS resolution for mail delivery.
//!
//! Implements MX record lookups with A/AAAA fallback per RFC 5321 section 5.1,
//! plus plain host lookups for routes that name a relay by hostname.
//!
//! # Caching Strategy
//!
//! - **DNS TTL by default**: Uses the actual TTL from DNS records
//! - **Bounded TTLs**: Applies min (60s) and max (3600s) bounds to prevent extremes
//! - **Optional override**: `cache_ttl_secs` config can override DNS TTL for all entries
//! - **Lock-free**: `DashMap` provides concurrent access without mutex contention
//!
//! Only MX answers are cached; host lookups go straight to the resolver, which
//! keeps its own cache.

use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DnsError {
    /// No MX, A, or AAAA records found for the domain.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// The host name has no A or AAAA records.
    #[error("No addresses found for host: {0}")]
    NoAddresses(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

/// Configuration for the DNS resolver.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cache TTL override in seconds; the record TTL is used when unset
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Minimum cache TTL in seconds (default: 60)
    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Maximum cache TTL in seconds (default: 3600)
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    60
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
        }
    }
}

/// A mail exchanger for a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServer {
    /// Hostname, or an IP literal for the A/AAAA fallback
    pub host: String,
    /// MX preference (lower is preferred). 0 for the A/AAAA fallback.
    pub priority: u16,
}

impl MailServer {
    #[must_use]
    pub const fn new(host: String, priority: u16) -> Self {
        Self { host, priority }
    }
}

/// Name resolution used by route selection
#[async_trait]
pub trait Resolve: Send + Sync + std::fmt::Debug {
    /// Every address `host` resolves to
    ///
    /// # Errors
    ///
    /// If the lookup fails or returns nothing
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;

    /// Mail exchangers for `domain`, most preferred first
    ///
    /// # Errors
    ///
    /// If the lookup fails or the domain accepts no mail
    async fn mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError>;
}

#[derive(Debug, Clone)]
struct CachedResult {
    servers: Arc<Vec<MailServer>>,
    expires_at: Instant,
}

/// Hickory-backed resolver with a concurrent MX cache.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: Arc<DashMap<String, CachedResult>>,
    config: DnsConfig,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn with_dns_config(dns_config: DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(dns_config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: Arc::new(DashMap::new()),
            config: dns_config,
        })
    }

    /// Creates a resolver with an explicit upstream configuration.
    #[must_use]
    pub fn with_resolver_config(
        resolver_config: ResolverConfig,
        opts: ResolverOpts,
        dns_config: DnsConfig,
    ) -> Self {
        let resolver =
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self {
            resolver,
            cache: Arc::new(DashMap::new()),
            config: dns_config,
        }
    }

    /// Look up MX records, falling back to A/AAAA, without the cache.
    ///
    /// Returns the servers and the smallest TTL among the records.
    async fn resolve_mail_servers_uncached(
        &self,
        domain: &str,
    ) -> Result<(Vec<MailServer>, u32), DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(mx_lookup) => {
                let min_ttl = mx_lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(300);

                let mut servers: Vec<MailServer> = mx_lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        let host = host.trim_end_matches('.').to_string();
                        debug!("Found MX record: {host} (priority: {})", mx.preference());
                        MailServer::new(host, mx.preference())
                    })
                    .collect();

                if servers.is_empty() {
                    return self.fallback_to_a_aaaa(domain).await;
                }

                servers.sort_by_key(|s| s.priority);
                Ok((servers, min_ttl))
            }
            Err(err) if err.is_no_records_found() => {
                debug!("No MX records found for {domain}, falling back to A/AAAA");
                self.fallback_to_a_aaaa(domain).await
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }

    /// The domain itself as an implicit MX (RFC 5321 §5.1).
    async fn fallback_to_a_aaaa(&self, domain: &str) -> Result<(Vec<MailServer>, u32), DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(ip_lookup) => {
                #[allow(clippy::redundant_closure_for_method_calls)]
                let min_ttl = ip_lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(|r| r.ttl())
                    .min()
                    .unwrap_or(300);

                let servers: Vec<MailServer> = ip_lookup
                    .iter()
                    .map(|ip| MailServer::new(ip.to_string(), 0))
                    .collect();

                if servers.is_empty() {
                    Err(DnsError::NoMailServers(domain.to_string()))
                } else {
                    Ok((servers, min_ttl))
                }
            }
            Err(err) if err.is_no_records_found() => {
                Err(DnsError::NoMailServers(domain.to_string()))
            }
            Err(err) => {
                warn!("A/AAAA lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let addresses: Vec<IpAddr> = self.resolver.lookup_ip(host).await?.iter().collect();

        if addresses.is_empty() {
            Err(DnsError::NoAddresses(host.to_string()))
        } else {
            Ok(addresses)
        }
    }

    async fn mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        if let Some(cached) = self.cache.get(domain)
            && cached.expires_at > Instant::now()
        {
            debug!("Cache hit for {domain}, {} server(s)", cached.servers.len());
            return Ok(Arc::clone(&cached.servers));
        }

        let (servers, dns_ttl) = self.resolve_mail_servers_uncached(domain).await?;
        let servers = Arc::new(servers);

        let cache_ttl = self.config.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(dns_ttl).clamp(
                self.config.min_cache_ttl_secs,
                self.config.max_cache_ttl_secs,
            )
        });

        self.cache.insert(
            domain.to_string(),
            CachedResult {
                servers: Arc::clone(&servers),
                expires_at: Instant::now() + Duration::from_secs(cache_ttl),
            },
        );

        debug!(
            "Cached {} server(s) for {domain}, DNS TTL: {dns_ttl}s, cache TTL: {cache_ttl}s",
            servers.len()
        );
        Ok(servers)
    }
}
