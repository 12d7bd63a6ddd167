//! DNS provider trait for DNS-01 challenges
//!
//! Defines the interface that all record writers must implement.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsError>;

/// Errors that can occur while managing or observing challenge records
#[derive(Debug, Error)]
pub enum DnsError {
    /// Record creation failed
    #[error("Failed to create TXT record '{fqdn}': {message}")]
    RecordCreation { fqdn: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{fqdn}': {message}")]
    RecordDeletion { fqdn: String, message: String },

    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Zone not found for the domain
    #[error("Zone not found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// API request failed
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The challenge fqdn has no registrable parent domain
    #[error("Invalid challenge fqdn '{0}'")]
    InvalidFqdn(String),

    /// The zone apex resolved to an empty nameserver set
    #[error("No authoritative nameservers found for zone '{zone}'")]
    NoNameservers { zone: String },

    /// Resolver construction or lookup failure outside the per-server retry loop
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// The global propagation wait expired
    #[error("Timeout waiting for '{fqdn}' DNS propagation after {elapsed:?}")]
    PropagationTimeout { fqdn: String, elapsed: Duration },

    /// Invalid provider configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Trait for DNS providers that write DNS-01 challenge records
///
/// Implementations must be thread-safe. Two concurrent challenges for the
/// same fqdn are not safe: the create path deletes leftovers first.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Returns the provider name (e.g., "exec", "clouddns")
    fn name(&self) -> &'static str;

    /// Create a TXT record for a DNS-01 challenge
    ///
    /// # Arguments
    ///
    /// * `fqdn` - The full challenge record name, with trailing dot
    /// * `value` - The challenge value (base64url-encoded digest)
    /// * `ttl` - Record TTL in seconds
    async fn create_record(&self, fqdn: &str, value: &str, ttl: u32) -> DnsResult<()>;

    /// Delete a TXT record after challenge validation
    ///
    /// Should not error if the record doesn't exist (idempotent); called
    /// during cleanup even if validation failed.
    async fn delete_record(&self, fqdn: &str, value: &str, ttl: u32) -> DnsResult<()>;
}

/// ACME challenge record name prefix
pub const CHALLENGE_LABEL: &str = "_acme-challenge";

/// TTL for challenge records (seconds)
pub const CHALLENGE_TTL: u32 = 30;

/// Zone apex for a challenge fqdn: the registrable domain (public suffix
/// plus one label)
///
/// For `_acme-challenge.www.example.co.uk.` returns `example.co.uk`.
pub fn zone_apex(fqdn: &str) -> DnsResult<String> {
    let name = fqdn.trim_end_matches('.');
    psl::domain_str(name)
        .map(|apex| apex.to_string())
        .ok_or_else(|| DnsError::InvalidFqdn(fqdn.to_string()))
}
