//! Google Cloud DNS provider
//!
//! Backs the direct `{project, serviceAccount}` binding. Records are mutated
//! through the Cloud DNS `changes` API; the access token comes from the GCE
//! metadata server for the bound service account, so the controller must run
//! with that identity attached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::dns::provider::{zone_apex, DnsError, DnsProvider, DnsResult};

const CLOUD_DNS_API_BASE: &str = "https://dns.googleapis.com/dns/v1";
const METADATA_BASE: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts";

/// Refresh tokens a minute before the metadata server says they expire.
const TOKEN_EXPIRY_SLACK: u64 = 60;

/// Cloud DNS record writer
#[derive(Debug)]
pub struct CloudDnsProvider {
    client: Client,
    project: String,
    service_account: String,
    api_base: String,
    metadata_base: String,
    /// zone apex -> managed zone name
    zone_cache: RwLock<HashMap<String, String>>,
    token_cache: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CloudDnsProvider {
    /// Create a new Cloud DNS provider
    ///
    /// An empty `service_account` falls back to the instance's default
    /// service account.
    pub fn new(project: &str, service_account: &str, timeout: Duration) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsError::Configuration(format!("Failed to create HTTP client: {e}"))
        })?;

        let service_account = if service_account.is_empty() {
            "default".to_string()
        } else {
            service_account.to_string()
        };

        Ok(Self {
            client,
            project: project.to_string(),
            service_account,
            api_base: CLOUD_DNS_API_BASE.to_string(),
            metadata_base: METADATA_BASE.to_string(),
            zone_cache: RwLock::new(HashMap::new()),
            token_cache: RwLock::new(None),
        })
    }

    /// Point the provider at alternate API endpoints (test servers).
    #[doc(hidden)]
    pub fn with_endpoints(mut self, api_base: &str, metadata_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.metadata_base = metadata_base.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> DnsResult<String> {
        {
            let cache = self.token_cache.read();
            if let Some(token) = cache.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let url = format!("{}/{}/token", self.metadata_base, self.service_account);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                DnsError::Authentication(format!("metadata server token request failed: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(DnsError::Authentication(format!(
                "metadata server returned HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            DnsError::Authentication(format!("failed to parse token response: {e}"))
        })?;

        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in.saturating_sub(TOKEN_EXPIRY_SLACK));
        *self.token_cache.write() = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// Get the managed zone name for the challenge fqdn
    async fn zone_for(&self, fqdn: &str) -> DnsResult<String> {
        let apex = zone_apex(fqdn)?;

        {
            let cache = self.zone_cache.read();
            if let Some(zone) = cache.get(&apex) {
                trace!(fqdn = %fqdn, zone = %zone, "zone found in cache");
                return Ok(zone.clone());
            }
        }

        let token = self.access_token().await?;
        let url = format!("{}/projects/{}/managedZones", self.api_base, self.project);
        let response = self
            .client
            .get(&url)
            .query(&[("dnsName", format!("{apex}."))])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| DnsError::ApiRequest(format!("Failed to list managed zones: {e}")))?;

        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(DnsError::Authentication(format!(
                "Cloud DNS rejected the service account token (HTTP {})",
                response.status()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::ApiRequest(format!(
                "Failed to list managed zones: HTTP {status} - {body}"
            )));
        }

        let zones: ManagedZonesResponse = response.json().await.map_err(|e| {
            DnsError::ApiRequest(format!("Failed to parse managed zones response: {e}"))
        })?;

        let zone = zones
            .managed_zones
            .into_iter()
            .next()
            .ok_or_else(|| DnsError::ZoneNotFound {
                domain: apex.clone(),
            })?;

        debug!(fqdn = %fqdn, zone = %zone.name, "found managed zone");
        self.zone_cache.write().insert(apex, zone.name.clone());
        Ok(zone.name)
    }

    async fn submit_change(
        &self,
        fqdn: &str,
        value: &str,
        ttl: u32,
        deletion: bool,
    ) -> DnsResult<reqwest::Response> {
        let zone = self.zone_for(fqdn).await?;
        let token = self.access_token().await?;

        let rrset = RecordSet {
            name: fqdn.to_string(),
            kind: "TXT".to_string(),
            ttl,
            rrdatas: vec![format!("\"{value}\"")],
        };
        let change = if deletion {
            Change {
                additions: vec![],
                deletions: vec![rrset],
            }
        } else {
            Change {
                additions: vec![rrset],
                deletions: vec![],
            }
        };

        let url = format!(
            "{}/projects/{}/managedZones/{}/changes",
            self.api_base, self.project, zone
        );
        self.client
            .post(&url)
            .bearer_auth(&token)
            .json(&change)
            .send()
            .await
            .map_err(|e| DnsError::ApiRequest(format!("change submission failed: {e}")))
    }
}

#[async_trait]
impl DnsProvider for CloudDnsProvider {
    fn name(&self) -> &'static str {
        "clouddns"
    }

    async fn create_record(&self, fqdn: &str, value: &str, ttl: u32) -> DnsResult<()> {
        let response = self.submit_change(fqdn, value, ttl, false).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::RecordCreation {
                fqdn: fqdn.to_string(),
                message: format!("HTTP {status} - {body}"),
            });
        }
        debug!(fqdn = %fqdn, "TXT record created");
        Ok(())
    }

    async fn delete_record(&self, fqdn: &str, value: &str, ttl: u32) -> DnsResult<()> {
        let response = self.submit_change(fqdn, value, ttl, true).await?;

        // The record set may already be gone; retraction is unconditional.
        if response.status() == StatusCode::NOT_FOUND {
            debug!(fqdn = %fqdn, "record already deleted");
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::RecordDeletion {
                fqdn: fqdn.to_string(),
                message: format!("HTTP {status} - {body}"),
            });
        }
        debug!(fqdn = %fqdn, "TXT record deleted");
        Ok(())
    }
}

// Cloud DNS API types

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ManagedZonesResponse {
    #[serde(default, rename = "managedZones")]
    managed_zones: Vec<ManagedZone>,
}

#[derive(Debug, Deserialize)]
struct ManagedZone {
    name: String,
}

#[derive(Debug, Serialize)]
struct Change {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    additions: Vec<RecordSet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    deletions: Vec<RecordSet>,
}

#[derive(Debug, Serialize)]
struct RecordSet {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    ttl: u32,
    rrdatas: Vec<String>,
}
