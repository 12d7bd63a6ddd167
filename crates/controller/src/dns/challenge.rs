//! DNS-01 challenge records and the challenge driver
//!
//! Orchestrates the record side of a DNS-01 challenge:
//! 1. Create the TXT record via the DNS provider
//! 2. Wait until every authoritative nameserver serves it
//! 3. Retract the record after validation

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::propagation::PropagationMonitor;
use super::provider::{DnsProvider, DnsResult, CHALLENGE_LABEL, CHALLENGE_TTL};

/// One challenge's record parameters; lives only for a single orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Record name, `_acme-challenge.<domain>.` (note the trailing dot)
    pub fqdn: String,
    /// Expected TXT value
    pub value: String,
    /// Record TTL in seconds
    pub ttl: u32,
}

impl ChallengeRecord {
    /// Derive the record for a domain's challenge.
    ///
    /// `value = base64url(sha256(token "." jwk_thumbprint))` without padding.
    pub fn derive(domain: &str, token: &str, jwk_thumbprint: &str) -> Self {
        let fqdn = format!("{CHALLENGE_LABEL}.{domain}.");
        let key_authorization = format!("{token}.{jwk_thumbprint}");
        let value = URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()));
        Self {
            fqdn,
            value,
            ttl: CHALLENGE_TTL,
        }
    }
}

/// Seam between the ACME orchestrator and the DNS world
///
/// Production uses [`DnsChallengeDriver`]; tests substitute recording fakes.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Write the challenge record, replacing any leftover with the same name.
    async fn place(&self, record: &ChallengeRecord) -> DnsResult<()>;

    /// Block until the record is observable on every authoritative nameserver.
    async fn monitor(&self, record: &ChallengeRecord) -> DnsResult<()>;

    /// Unconditionally delete the challenge record.
    async fn retract(&self, record: &ChallengeRecord) -> DnsResult<()>;
}

/// Provider-backed challenge driver with authoritative-NS propagation checks
#[derive(Debug)]
pub struct DnsChallengeDriver {
    provider: Arc<dyn DnsProvider>,
    propagation: PropagationMonitor,
}

impl DnsChallengeDriver {
    pub fn new(provider: Arc<dyn DnsProvider>, propagation: PropagationMonitor) -> Self {
        Self {
            provider,
            propagation,
        }
    }

    /// Get the DNS provider name
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }
}

#[async_trait]
impl ChallengeSolver for DnsChallengeDriver {
    async fn place(&self, record: &ChallengeRecord) -> DnsResult<()> {
        // A leftover record from an aborted run would shadow the new value,
        // so drop it first. Two concurrent challenges for the same fqdn can
        // stomp on each other in this window.
        if let Err(err) = self
            .provider
            .delete_record(&record.fqdn, &record.value, record.ttl)
            .await
        {
            debug!(fqdn = %record.fqdn, error = %err, "pre-create cleanup failed");
        }

        info!(
            fqdn = %record.fqdn,
            provider = %self.provider.name(),
            "creating DNS-01 challenge record"
        );
        self.provider
            .create_record(&record.fqdn, &record.value, record.ttl)
            .await
    }

    async fn monitor(&self, record: &ChallengeRecord) -> DnsResult<()> {
        self.propagation
            .wait(&record.fqdn, &record.value, record.ttl)
            .await
    }

    async fn retract(&self, record: &ChallengeRecord) -> DnsResult<()> {
        debug!(fqdn = %record.fqdn, "retracting DNS-01 challenge record");
        match self
            .provider
            .delete_record(&record.fqdn, &record.value, record.ttl)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(fqdn = %record.fqdn, error = %err, "failed to retract challenge record");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::provider::DnsError;
    use parking_lot::Mutex;

    #[test]
    fn test_challenge_record_fqdn_has_trailing_dot() {
        let record = ChallengeRecord::derive("example.com", "token", "thumbprint");
        assert_eq!(record.fqdn, "_acme-challenge.example.com.");
        assert_eq!(record.ttl, CHALLENGE_TTL);
    }

    #[test]
    fn test_challenge_value_is_deterministic() {
        let a = ChallengeRecord::derive("example.com", "tok", "print");
        let b = ChallengeRecord::derive("example.com", "tok", "print");
        assert_eq!(a.value, b.value);

        let c = ChallengeRecord::derive("example.com", "other", "print");
        assert_ne!(a.value, c.value);
    }

    #[test]
    fn test_challenge_value_shape() {
        // SHA256 digest is 32 bytes, 43 chars of unpadded base64url
        let record = ChallengeRecord::derive("example.com", "token", "thumbprint");
        assert_eq!(record.value.len(), 43);
        assert!(!record.value.contains('+'));
        assert!(!record.value.contains('/'));
        assert!(!record.value.contains('='));
    }

    /// Records provider calls in order
    #[derive(Debug, Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<String>>,
        fail_on_create: bool,
    }

    #[async_trait]
    impl DnsProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn create_record(&self, fqdn: &str, _value: &str, _ttl: u32) -> DnsResult<()> {
            self.calls.lock().push("create".to_string());
            if self.fail_on_create {
                return Err(DnsError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message: "mock failure".to_string(),
                });
            }
            Ok(())
        }

        async fn delete_record(&self, _fqdn: &str, _value: &str, _ttl: u32) -> DnsResult<()> {
            self.calls.lock().push("delete".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_place_deletes_before_creating() {
        let provider = Arc::new(RecordingProvider::default());
        let driver = DnsChallengeDriver::new(provider.clone(), PropagationMonitor::new());
        let record = ChallengeRecord::derive("example.com", "token", "thumbprint");

        driver.place(&record).await.unwrap();
        assert_eq!(*provider.calls.lock(), vec!["delete", "create"]);
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let provider = Arc::new(RecordingProvider {
            fail_on_create: true,
            ..Default::default()
        });
        let driver = DnsChallengeDriver::new(provider, PropagationMonitor::new());
        let record = ChallengeRecord::derive("example.com", "token", "thumbprint");

        let result = driver.place(&record).await;
        assert!(matches!(
            result.unwrap_err(),
            DnsError::RecordCreation { .. }
        ));
    }

    #[tokio::test]
    async fn test_retract_deletes() {
        let provider = Arc::new(RecordingProvider::default());
        let driver = DnsChallengeDriver::new(provider.clone(), PropagationMonitor::new());
        let record = ChallengeRecord::derive("example.com", "token", "thumbprint");

        driver.retract(&record).await.unwrap();
        assert_eq!(*provider.calls.lock(), vec!["delete"]);
    }
}
