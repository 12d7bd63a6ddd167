//! Cluster API client
//!
//! The controller's only window onto the cluster: the declared certificate
//! list, the DNS-binding input secrets, and the managed TLS secrets. Usually
//! pointed at a kubectl proxy endpoint; TLS upstreams verify against the
//! bundled webpki roots rather than the host trust store.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info};

use super::resources::{Certificate, CertificateList, ObjectMeta, Secret};

/// Certificates collection endpoint
pub const CERTIFICATES_PATH: &str = "/apis/certinel.dev/v1/certificates";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Errors from cluster API calls
#[derive(Debug, Error)]
pub enum KubeError {
    #[error("Cluster API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{operation} returned HTTP {status}")]
    UnexpectedStatus {
        operation: String,
        status: StatusCode,
    },

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("Secret '{name}' has no key '{key}'")]
    MissingSecretKey { name: String, key: String },
}

/// Shared cluster API client
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: Client,
    api_host: String,
}

impl KubeClient {
    pub fn new(api_host: &str) -> Result<Self, KubeError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_host: api_host.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL of the cluster API
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    pub(crate) fn watch_url(&self) -> String {
        format!("{}{}?watch=true", self.api_host, CERTIFICATES_PATH)
    }

    fn secret_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.api_host, namespace, name
        )
    }

    fn secrets_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/secrets", self.api_host, namespace)
    }

    /// The full desired set, one sweep's input.
    pub async fn list_certificates(&self) -> Result<Vec<Certificate>, KubeError> {
        let url = format!("{}{}", self.api_host, CERTIFICATES_PATH);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(KubeError::UnexpectedStatus {
                operation: "listing certificates".to_string(),
                status: response.status(),
            });
        }
        let list: CertificateList = response.json().await.map_err(|e| KubeError::Decode {
            what: "certificate list".to_string(),
            message: e.to_string(),
        })?;
        Ok(list.items)
    }

    /// Decoded provider configuration blob from a DNS-binding secret.
    pub async fn dns_provider_config(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>, KubeError> {
        let response = self.http.get(self.secret_url(namespace, name)).send().await?;
        if !response.status().is_success() {
            return Err(KubeError::UnexpectedStatus {
                operation: format!("reading secret '{name}'"),
                status: response.status(),
            });
        }
        let secret: Secret = response.json().await.map_err(|e| KubeError::Decode {
            what: format!("secret '{name}'"),
            message: e.to_string(),
        })?;

        let encoded = secret
            .data
            .get(key)
            .ok_or_else(|| KubeError::MissingSecretKey {
                name: name.to_string(),
                key: key.to_string(),
            })?;
        BASE64.decode(encoded).map_err(|e| KubeError::Decode {
            what: format!("secret '{name}' key '{key}'"),
            message: e.to_string(),
        })
    }

    /// Converge the TLS secret for a certificate: no write when the stored
    /// pair already matches byte for byte, PUT on drift, POST on absence.
    pub async fn sync_tls_secret(
        &self,
        certificate: &Certificate,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<(), KubeError> {
        let namespace = certificate.namespace();
        let name = &certificate.spec.domain;

        let desired = Secret {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            metadata: ObjectMeta {
                name: name.clone(),
                namespace: Some(namespace.to_string()),
            },
            data: BTreeMap::from([
                ("tls.crt".to_string(), BASE64.encode(cert_pem)),
                ("tls.key".to_string(), BASE64.encode(key_pem)),
            ]),
            secret_type: TLS_SECRET_TYPE.to_string(),
        };

        let url = self.secret_url(namespace, name);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let mut current: Secret =
                    response.json().await.map_err(|e| KubeError::Decode {
                        what: format!("secret '{name}'"),
                        message: e.to_string(),
                    })?;

                if current.data.get("tls.crt") == desired.data.get("tls.crt")
                    && current.data.get("tls.key") == desired.data.get("tls.key")
                {
                    debug!(secret = %name, "TLS secret already in sync");
                    return Ok(());
                }

                info!(secret = %name, "TLS secret out of sync, updating");
                current.data = desired.data;
                let response = self.http.put(&url).json(&current).send().await?;
                if response.status() != StatusCode::OK {
                    return Err(KubeError::UnexpectedStatus {
                        operation: format!("updating secret '{name}'"),
                        status: response.status(),
                    });
                }
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!(secret = %name, "TLS secret missing, creating");
                let response = self
                    .http
                    .post(self.secrets_url(namespace))
                    .json(&desired)
                    .send()
                    .await?;
                if response.status() != StatusCode::CREATED {
                    return Err(KubeError::UnexpectedStatus {
                        operation: format!("creating secret '{name}'"),
                        status: response.status(),
                    });
                }
                Ok(())
            }
            status => Err(KubeError::UnexpectedStatus {
                operation: format!("reading secret '{name}'"),
                status,
            }),
        }
    }

    /// Delete the TLS secret; absence is not an error.
    pub async fn delete_tls_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let response = self
            .http
            .delete(self.secret_url(namespace, name))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(KubeError::UnexpectedStatus {
                operation: format!("deleting secret '{name}'"),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_construction() {
        let client = KubeClient::new("http://127.0.0.1:8001/").unwrap();
        assert_eq!(client.api_host(), "http://127.0.0.1:8001");
        assert_eq!(
            client.secret_url("default", "example.com"),
            "http://127.0.0.1:8001/api/v1/namespaces/default/secrets/example.com"
        );
        assert_eq!(
            client.watch_url(),
            "http://127.0.0.1:8001/apis/certinel.dev/v1/certificates?watch=true"
        );
    }
}
