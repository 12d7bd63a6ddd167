//! DNS propagation monitoring for DNS-01 challenges
//!
//! Verifies that the challenge TXT record is visible on every authoritative
//! nameserver of the zone before the ACME server is asked to validate.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use super::provider::{zone_apex, DnsError, DnsResult};

/// Tuning for the propagation wait
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    /// Timeout for a single TXT query
    pub query_timeout: Duration,
    /// Delay between queries against one nameserver
    pub poll_interval: Duration,
    /// Bound on the whole wait across all nameservers
    pub timeout: Duration,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Authoritative-nameserver propagation monitor
///
/// One polling task per nameserver; the wait succeeds when all of them have
/// served the expected value, then sleeps one record TTL so cached negative
/// answers on the CA's resolvers expire.
#[derive(Debug, Clone)]
pub struct PropagationMonitor {
    config: PropagationConfig,
}

impl PropagationMonitor {
    /// Create a monitor with default configuration
    pub fn new() -> Self {
        Self::with_config(PropagationConfig::default())
    }

    /// Create a monitor with custom configuration
    pub fn with_config(config: PropagationConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Wait until every authoritative nameserver of the fqdn's zone serves
    /// the expected TXT value.
    ///
    /// Per-server query errors and empty answers retry at the poll cadence;
    /// only the global timeout is fatal.
    pub async fn wait(&self, fqdn: &str, value: &str, ttl: u32) -> DnsResult<()> {
        let zone = zone_apex(fqdn)?;
        let nameservers = self.authoritative_nameservers(&zone).await?;

        info!(
            fqdn = %fqdn,
            zone = %zone,
            nameservers = ?nameservers,
            "monitoring DNS propagation"
        );

        let mut tasks = JoinSet::new();
        for addr in nameservers {
            let fqdn = fqdn.to_string();
            let value = value.to_string();
            let config = self.config.clone();
            tasks.spawn(async move { poll_nameserver(addr, &fqdn, &value, &config).await });
        }

        let all_satisfied = async move {
            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|e| DnsError::Resolver(e.to_string()))?;
            }
            Ok::<(), DnsError>(())
        };

        match tokio::time::timeout(self.config.timeout, all_satisfied).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DnsError::PropagationTimeout {
                    fqdn: fqdn.to_string(),
                    elapsed: self.config.timeout,
                })
            }
        }

        // Resolvers may hold a negative answer for up to one record TTL.
        sleep(Duration::from_secs(u64::from(ttl))).await;
        info!(fqdn = %fqdn, "DNS propagation complete");
        Ok(())
    }

    /// Resolve the zone's NS set through the system resolver, then the
    /// address of each nameserver.
    async fn authoritative_nameservers(&self, zone: &str) -> DnsResult<Vec<SocketAddr>> {
        let resolver = Resolver::builder_tokio()
            .map_err(|e| DnsError::Resolver(e.to_string()))?
            .build();

        let ns_set = resolver
            .ns_lookup(zone)
            .await
            .map_err(|e| DnsError::Resolver(format!("NS lookup for '{zone}': {e}")))?;

        let mut addrs = Vec::new();
        for ns in ns_set.iter() {
            let host = ns.0.to_utf8();
            match resolver.lookup_ip(host.as_str()).await {
                Ok(ips) => {
                    if let Some(ip) = ips.iter().next() {
                        addrs.push(SocketAddr::new(ip, 53));
                    }
                }
                Err(err) => {
                    warn!(nameserver = %host, error = %err, "failed to resolve nameserver address");
                }
            }
        }

        if addrs.is_empty() {
            return Err(DnsError::NoNameservers {
                zone: zone.to_string(),
            });
        }
        Ok(addrs)
    }
}

impl Default for PropagationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll one authoritative server until it answers with the expected TXT.
///
/// Returns only on success; the caller bounds the total wait.
async fn poll_nameserver(
    addr: SocketAddr,
    fqdn: &str,
    value: &str,
    config: &PropagationConfig,
) {
    let resolver = authoritative_resolver(addr, config);
    loop {
        match resolver.txt_lookup(fqdn).await {
            Ok(records) => {
                for record in records.iter() {
                    // TXT records can carry multiple strings, join them
                    let answer: String = record
                        .txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect();
                    if answer == value {
                        debug!(nameserver = %addr, fqdn = %fqdn, "challenge record visible");
                        return;
                    }
                }
                trace!(nameserver = %addr, fqdn = %fqdn, "record not visible yet");
            }
            Err(err) => {
                // NXDOMAIN, empty answers and transient failures all retry
                trace!(nameserver = %addr, fqdn = %fqdn, error = %err, "TXT query failed, retrying");
            }
        }
        sleep(config.poll_interval).await;
    }
}

/// A single-nameserver resolver speaking directly to an authoritative server:
/// TCP, recursion desired off, EDNS0 enabled, no caching.
fn authoritative_resolver(addr: SocketAddr, config: &PropagationConfig) -> TokioResolver {
    let mut resolver_config = ResolverConfig::new();
    resolver_config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));

    let mut opts = ResolverOpts::default();
    opts.timeout = config.query_timeout;
    opts.attempts = 1;
    opts.recursion_desired = false;
    opts.edns0 = true;
    opts.cache_size = 0;

    Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}
