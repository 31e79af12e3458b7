//! Route selection: which local address talks to which remote server.
//!
//! A route's `local_ip` is either a single address or several joined by
//! `&` (failover, tried in the order written) or `|` (round-robin, tried in
//! a fresh random order each time). The two joiners never mix.
//!
//! ```ron
//! routes: {
//!     "example.com": [
//!         (local_ip: "192.0.2.10&192.0.2.11", remote_host: "mx.example.com"),
//!         (local_ip: "2001:db8::10", remote_host: "2001:db8::25", remote_port: 2525),
//!     ],
//!     "*": [(local_ip: "0.0.0.0", remote_host: "smarthost.internal")],
//! }
//! ```

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use rand::seq::SliceRandom;
use relay_common::internal;
use relay_smtp::{Dialer, SmtpSession};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dns::{DnsError, Resolve};

pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Route table key matching every domain without an entry of its own
pub const WILDCARD: &str = "*";

const fn default_port() -> u16 {
    DEFAULT_SMTP_PORT
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("mixing & and | are not allowed in localIp routes: {0}")]
    MixedJoiners(String),

    #[error("invalid IP {ip} found in localIp routes: {spec}")]
    InvalidLocalIp { ip: String, spec: String },

    #[error("unable to resolve {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: DnsError,
    },

    #[error("unable to get a client, all routes have been tested")]
    NoUsableRoute,
}

/// One way of reaching a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub local_ip: String,
    /// IP literal or host name
    pub remote_host: String,
    #[serde(default = "default_port")]
    pub remote_port: u16,
}

impl Route {
    pub fn new(local_ip: impl Into<String>, remote_host: impl Into<String>) -> Self {
        Self {
            local_ip: local_ip.into(),
            remote_host: remote_host.into(),
            remote_port: DEFAULT_SMTP_PORT,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }
}

/// A parsed `local_ip` specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalIpSpec {
    Single(IpAddr),
    /// `a&b&c`: always tried in this order
    Failover(Vec<IpAddr>),
    /// `a|b|c`: tried in a random order
    RoundRobin(Vec<IpAddr>),
}

impl LocalIpSpec {
    /// # Errors
    ///
    /// [`RouteError::MixedJoiners`] if both `&` and `|` appear,
    /// [`RouteError::InvalidLocalIp`] if any part is not an IP literal
    pub fn parse(spec: &str) -> Result<Self, RouteError> {
        let failover = spec.contains('&');
        let round_robin = spec.contains('|');

        let split = |joiner: char| {
            spec.split(joiner)
                .map(|part| parse_ip(part, spec))
                .collect::<Result<Vec<_>, _>>()
        };

        match (failover, round_robin) {
            (true, true) => Err(RouteError::MixedJoiners(spec.to_string())),
            (true, false) => split('&').map(Self::Failover),
            (false, true) => split('|').map(Self::RoundRobin),
            (false, false) => parse_ip(spec, spec).map(Self::Single),
        }
    }

    /// Addresses in the order they should be tried
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        match self {
            Self::Single(ip) => vec![*ip],
            Self::Failover(ips) => ips.clone(),
            Self::RoundRobin(ips) => {
                let mut ips = ips.clone();
                ips.shuffle(&mut rand::rng());
                ips
            }
        }
    }
}

fn parse_ip(part: &str, spec: &str) -> Result<IpAddr, RouteError> {
    let trimmed = part.trim();
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| RouteError::InvalidLocalIp {
            ip: trimmed.to_string(),
            spec: spec.to_string(),
        })
}

/// Configured routes, keyed by destination domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable(HashMap<String, Vec<Route>>);

impl RouteTable {
    #[must_use]
    pub const fn new(routes: HashMap<String, Vec<Route>>) -> Self {
        Self(routes)
    }

    /// Routes for `hint` if it has an entry, then for `host`, then the wildcard
    #[must_use]
    pub fn lookup(&self, hint: Option<&str>, host: &str) -> Option<&[Route]> {
        hint.into_iter()
            .chain([host, WILDCARD])
            .find_map(|key| self.get(key))
    }

    fn get(&self, key: &str) -> Option<&[Route]> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(domain, _)| domain.eq_ignore_ascii_case(key))
                    .map(|(_, routes)| routes)
            })
            .filter(|routes| !routes.is_empty())
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Turns routes into a live SMTP session
#[derive(Debug, Clone)]
pub struct RouteResolver {
    dialer: Arc<dyn Dialer>,
    resolver: Arc<dyn Resolve>,
    table: RouteTable,
    default_local_ip: String,
    identity: String,
    dial_timeout: Duration,
}

impl RouteResolver {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        resolver: Arc<dyn Resolve>,
        table: RouteTable,
        default_local_ip: impl Into<String>,
        identity: impl Into<String>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            dialer,
            resolver,
            table,
            default_local_ip: default_local_ip.into(),
            identity: identity.into(),
            dial_timeout,
        }
    }

    /// Candidate routes for a job, most preferred first.
    ///
    /// Without a configured entry the domain's mail exchangers are used, each
    /// reached from the default local address.
    ///
    /// # Errors
    ///
    /// If the domain has to be looked up and the lookup fails
    pub async fn routes(&self, hint: Option<&str>, host: &str) -> Result<Vec<Route>, RouteError> {
        if let Some(routes) = self.table.lookup(hint, host) {
            return Ok(routes.to_vec());
        }

        let servers = self
            .resolver
            .mail_servers(host)
            .await
            .map_err(|source| RouteError::Dns {
                host: host.to_string(),
                source,
            })?;

        Ok(servers
            .iter()
            .map(|server| Route::new(self.default_local_ip.clone(), server.host.clone()))
            .collect())
    }

    /// Dial the first working (local, remote) pair, walking `routes` in order.
    ///
    /// Within a route every local address is tried against every remote
    /// address before moving on to the next local address. Pairs of
    /// different address families are never dialed.
    ///
    /// # Errors
    ///
    /// A malformed `local_ip` or a failed remote lookup ends the walk at that
    /// route. [`RouteError::NoUsableRoute`] if every pair failed.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip_all, fields(routes = routes.len()))]
    pub async fn connect(
        &self,
        routes: &[Route],
    ) -> Result<(Box<dyn SmtpSession>, Route), RouteError> {
        for route in routes {
            let locals = LocalIpSpec::parse(&route.local_ip)?.addresses();
            let remotes = self.remote_addresses(route).await?;

            for local in &locals {
                for remote in &remotes {
                    if local.is_ipv4() != remote.ip().is_ipv4() {
                        continue;
                    }

                    match self
                        .dialer
                        .dial(*remote, *local, &self.identity, self.dial_timeout)
                        .await
                    {
                        Ok(session) => return Ok((session, route.clone())),
                        Err(err) => {
                            internal!(
                                level = DEBUG,
                                "unable to get a client {local} -> {remote}: {err}"
                            );
                        }
                    }
                }
            }
        }

        Err(RouteError::NoUsableRoute)
    }

    async fn remote_addresses(&self, route: &Route) -> Result<Vec<SocketAddr>, RouteError> {
        let host = route.remote_host.trim_start_matches('[').trim_end_matches(']');

        let ips = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => self
                .resolver
                .lookup_ip(host)
                .await
                .map_err(|source| RouteError::Dns {
                    host: host.to_string(),
                    source,
                })?,
        };

        Ok(ips
            .into_iter()
            .map(|ip| SocketAddr::new(ip, route.remote_port))
            .collect())
    }
}
