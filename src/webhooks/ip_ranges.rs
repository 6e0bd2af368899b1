//! Source-IP allow-lists for providers that publish their ranges.
//!
//! The list is fetched lazily on first use and refreshed at most once per
//! [`IpAllowList::REFRESH`]. Any failure to obtain a list, or an empty list,
//! allows every source. After a failed fetch the next attempt waits
//! [`IpAllowList::RETRY_AFTER`].

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Atlassian's published ranges, used for Bitbucket deliveries.
pub const ATLASSIAN_RANGES_URL: &str = "https://ip-ranges.atlassian.com/";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A network block, or a single address with a full-length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Returns true if `ip` falls inside this block.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Error parsing an [`IpRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid IP range '{0}'")]
pub struct InvalidRange(String);

impl FromStr for IpRange {
    type Err = InvalidRange;

    /// Parses `10.0.0.0/8`, `2001:db8::/32` or a bare address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRange(s.to_string());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(IpRange { network, prefix })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[derive(Debug, Deserialize)]
struct PublishedRanges {
    items: Vec<PublishedRange>,
}

#[derive(Debug, Deserialize)]
struct PublishedRange {
    cidr: String,
}

#[derive(Debug, Default)]
struct Cache {
    ranges: Vec<IpRange>,
    fetched_at: Option<Instant>,
    failed_at: Option<Instant>,
}

impl Cache {
    fn needs_fetch(&self) -> bool {
        let stale = self
            .fetched_at
            .is_none_or(|at| at.elapsed() > IpAllowList::REFRESH);
        let backing_off = self
            .failed_at
            .is_some_and(|at| at.elapsed() < IpAllowList::RETRY_AFTER);
        stale && !backing_off
    }
}

/// A lazily fetched, periodically refreshed list of allowed source ranges.
pub struct IpAllowList {
    client: reqwest::Client,
    source: String,
    cache: Mutex<Cache>,
}

impl IpAllowList {
    /// Minimum time between two successful fetches.
    pub const REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

    /// Minimum time between a failed fetch and the next attempt.
    pub const RETRY_AFTER: Duration = Duration::from_secs(5 * 60);

    /// A list fetched from `source` on first use.
    pub fn new(client: reqwest::Client, source: impl Into<String>) -> Self {
        IpAllowList {
            client,
            source: source.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// A list that starts out fresh with `ranges`.
    pub fn preloaded(ranges: Vec<IpRange>) -> Self {
        IpAllowList {
            client: reqwest::Client::new(),
            source: String::new(),
            cache: Mutex::new(Cache {
                ranges,
                fetched_at: Some(Instant::now()),
                failed_at: None,
            }),
        }
    }

    /// Returns true if `ip` may deliver webhooks. A missing list allows all.
    pub async fn allows(&self, ip: IpAddr) -> bool {
        let mut cache = self.cache.lock().await;
        if cache.needs_fetch() {
            match self.fetch().await {
                Ok(ranges) => {
                    debug!(source = %self.source, count = ranges.len(), "Refreshed IP ranges");
                    cache.ranges = ranges;
                    cache.fetched_at = Some(Instant::now());
                    cache.failed_at = None;
                }
                Err(e) => {
                    error!(source = %self.source, error = %e, "Requesting recent IP ranges failed");
                    cache.failed_at = Some(Instant::now());
                }
            }
        }

        cache.ranges.is_empty() || cache.ranges.iter().any(|range| range.contains(ip))
    }

    async fn fetch(&self) -> Result<Vec<IpRange>, reqwest::Error> {
        let published: PublishedRanges = self
            .client
            .get(&self.source)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(published
            .items
            .into_iter()
            .filter_map(|item| match item.cidr.parse() {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(error = %e, "Error parsing CIDR block. Skipping...");
                    None
                }
            })
            .collect())
    }
}
