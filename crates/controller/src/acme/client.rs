//! ACME wire client
//!
//! Speaks the v1-era protocol the directory document advertises: `new-reg`,
//! `new-authz`, `new-cert` endpoints, JWS-signed POST bodies (RS256 with a
//! `jwk` protected header) and replay nonces pre-fetched by HEAD against the
//! directory URL. All requests go through one client configured with the
//! bundled webpki root set (never the host trust store) and a 10-second
//! per-request timeout.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, trace};

use super::account::jwk;
use super::error::AcmeError;

/// Per-request timeout for all ACME traffic
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default backoff while waiting for an issued certificate
pub const CERT_POLL_INTERVAL: Duration = Duration::from_secs(3);

const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// Endpoints advertised by the directory document
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    #[serde(rename = "new-reg")]
    pub new_reg: String,
    #[serde(rename = "new-authz")]
    pub new_authz: String,
    #[serde(rename = "new-cert")]
    pub new_cert: String,
    #[serde(default, rename = "revoke-cert")]
    pub revoke_cert: Option<String>,
}

/// Server-side authorization object
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

/// One way of proving control offered by an authorization
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub status: String,
}

/// What a successful registration hands back
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    /// Registration object URI (Location header)
    pub uri: String,
    /// Terms-of-service URL the server currently advertises
    pub current_terms: String,
    /// Where new authorizations are requested (Link rel="next")
    pub authz_url: String,
}

/// ACME client bound to one account key
pub struct AcmeClient {
    http: Client,
    directory_url: String,
    directory: Directory,
    key: RsaPrivateKey,
}

impl AcmeClient {
    /// Discover the directory and build a client signing with `key`.
    pub async fn discover(directory_url: &str, key: RsaPrivateKey) -> Result<Self, AcmeError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let response = http.get(directory_url).send().await?;
        if !response.status().is_success() {
            return Err(AcmeError::Directory(format!(
                "directory returned HTTP {}",
                response.status()
            )));
        }
        let directory: Directory = response
            .json()
            .await
            .map_err(|e| AcmeError::Directory(format!("failed to parse directory: {e}")))?;

        debug!(
            new_reg = %directory.new_reg,
            new_authz = %directory.new_authz,
            new_cert = %directory.new_cert,
            "ACME directory discovered"
        );

        Ok(Self {
            http,
            directory_url: directory_url.to_string(),
            directory,
            key,
        })
    }

    /// Get the discovered directory
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Fresh replay nonce, by HEAD against the directory URL
    async fn nonce(&self) -> Result<String, AcmeError> {
        let response = self.http.head(&self.directory_url).send().await?;
        header_str(response.headers(), "replay-nonce").ok_or(AcmeError::MissingNonce)
    }

    /// JWS-signed POST
    async fn post(&self, url: &str, payload: &Value) -> Result<Response, AcmeError> {
        let nonce = self.nonce().await?;
        let body = sign_jws(&self.key, &nonce, payload)?;
        trace!(url = %url, "ACME POST");
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Register a new account.
    ///
    /// The authorization endpoint for later `new-authz` calls lives in this
    /// response, which is why registration must be persisted before any
    /// authorize call.
    pub async fn register(&self, contact: &[String]) -> Result<RegisterOutcome, AcmeError> {
        let payload = json!({"resource": "new-reg", "contact": contact});
        let response = self.post(&self.directory.new_reg, &payload).await?;
        let status = response.status();

        // 409 means the key is already registered; the Location header still
        // carries the registration URI.
        if status != StatusCode::CREATED
            && status != StatusCode::OK
            && status != StatusCode::CONFLICT
        {
            return Err(AcmeError::Registration(format!(
                "HTTP {status} - {}",
                body_snippet(response).await
            )));
        }

        let uri = header_str(response.headers(), "location").ok_or_else(|| {
            AcmeError::Registration("no Location header in registration response".to_string())
        })?;
        let current_terms =
            link_with_rel(response.headers(), "terms-of-service").unwrap_or_default();
        let authz_url = link_with_rel(response.headers(), "next")
            .unwrap_or_else(|| self.directory.new_authz.clone());

        Ok(RegisterOutcome {
            uri,
            current_terms,
            authz_url,
        })
    }

    /// Update the registration, typically to agree to the advertised terms.
    pub async fn update_registration(
        &self,
        uri: &str,
        contact: &[String],
        agreement: &str,
    ) -> Result<(), AcmeError> {
        let payload = json!({"resource": "reg", "contact": contact, "agreement": agreement});
        let response = self.post(uri, &payload).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcmeError::Registration(format!(
                "updating registration: HTTP {status} - {}",
                body_snippet(response).await
            )));
        }
        Ok(())
    }

    /// Request a new authorization for the domain and select its dns-01
    /// challenge. An authorization without one fails the run.
    pub async fn authorize(
        &self,
        new_authz_url: &str,
        domain: &str,
    ) -> Result<(String, Challenge), AcmeError> {
        let payload = json!({
            "resource": "new-authz",
            "identifier": {"type": "dns", "value": domain},
        });
        let response = self.post(new_authz_url, &payload).await?;
        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(AcmeError::Authorization(format!(
                "HTTP {status} - {}",
                body_snippet(response).await
            )));
        }

        let authz_uri = header_str(response.headers(), "location").ok_or_else(|| {
            AcmeError::Authorization("no Location header in authorization response".to_string())
        })?;
        let authorization: Authorization = response
            .json()
            .await
            .map_err(|e| AcmeError::Authorization(format!("failed to parse authorization: {e}")))?;

        let challenge = authorization
            .challenges
            .into_iter()
            .find(|c| c.kind == "dns-01")
            .ok_or_else(|| AcmeError::NoDnsChallenge {
                domain: domain.to_string(),
            })?;

        Ok((authz_uri, challenge))
    }

    /// Tell the server the challenge response is in place.
    pub async fn accept_challenge(
        &self,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<(), AcmeError> {
        let payload = json!({
            "resource": "challenge",
            "type": "dns-01",
            "keyAuthorization": key_authorization,
        });
        let response = self.post(&challenge.uri, &payload).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcmeError::Accept(format!(
                "HTTP {status} - {}",
                body_snippet(response).await
            )));
        }
        Ok(())
    }

    /// Current state of an authorization.
    pub async fn authorization_status(&self, authz_uri: &str) -> Result<Authorization, AcmeError> {
        let response = self.http.get(authz_uri).send().await?;
        if !response.status().is_success() {
            return Err(AcmeError::Authorization(format!(
                "polling authorization: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AcmeError::Authorization(format!("failed to parse authorization: {e}")))
    }

    /// Submit the CSR. The server may return the certificate inline or only
    /// a Location to fetch it from; an empty chain means fetch-later.
    pub async fn create_certificate(
        &self,
        csr_der: &[u8],
    ) -> Result<(Vec<Vec<u8>>, String), AcmeError> {
        let payload = json!({
            "resource": "new-cert",
            "csr": URL_SAFE_NO_PAD.encode(csr_der),
        });
        let response = self.post(&self.directory.new_cert, &payload).await?;
        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(AcmeError::Issuance(format!(
                "HTTP {status} - {}",
                body_snippet(response).await
            )));
        }

        let cert_url = header_str(response.headers(), "location").ok_or_else(|| {
            AcmeError::Issuance("no Location header in new-cert response".to_string())
        })?;
        let issuer_url = link_with_rel(response.headers(), "up");

        let body = response.bytes().await?;
        let mut chain = Vec::new();
        if !body.is_empty() {
            chain.push(body.to_vec());
            if let Some(url) = issuer_url {
                chain.push(self.fetch_der(&url).await?);
            }
        }
        Ok((chain, cert_url))
    }

    /// Fetch the issued certificate (and its issuer when linked) from the
    /// long-lived certificate URL. A 202 or empty body becomes a typed
    /// [`AcmeError::RetryAfter`] carrying the server-advertised delay.
    pub async fn fetch_certificate(&self, cert_url: &str) -> Result<Vec<Vec<u8>>, AcmeError> {
        let response = self.http.get(cert_url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let issuer_url = link_with_rel(response.headers(), "up");
                let body = response.bytes().await?;
                if body.is_empty() {
                    return Err(AcmeError::RetryAfter(CERT_POLL_INTERVAL));
                }
                let mut chain = vec![body.to_vec()];
                if let Some(url) = issuer_url {
                    chain.push(self.fetch_der(&url).await?);
                }
                Ok(chain)
            }
            StatusCode::ACCEPTED => Err(AcmeError::RetryAfter(
                retry_after(response.headers()).unwrap_or(CERT_POLL_INTERVAL),
            )),
            status => Err(AcmeError::Fetch(format!("HTTP {status}"))),
        }
    }

    async fn fetch_der(&self, url: &str) -> Result<Vec<u8>, AcmeError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AcmeError::Fetch(format!(
                "fetching '{url}': HTTP {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Flattened JWS over the payload: RS256, `jwk` and `nonce` in the protected
/// header.
pub(crate) fn sign_jws(
    key: &RsaPrivateKey,
    nonce: &str,
    payload: &Value,
) -> Result<String, AcmeError> {
    let protected = json!({
        "alg": "RS256",
        "jwk": jwk(&key.to_public_key()),
        "nonce": nonce,
    });
    let protected64 = URL_SAFE_NO_PAD.encode(protected.to_string());
    let payload64 = URL_SAFE_NO_PAD.encode(payload.to_string());
    let signing_input = format!("{protected64}.{payload64}");

    let signer = SigningKey::<Sha256>::new(key.clone());
    let signature = signer
        .try_sign(signing_input.as_bytes())
        .map_err(|e| AcmeError::Jws(e.to_string()))?;

    Ok(json!({
        "protected": protected64,
        "payload": payload64,
        "signature": URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    })
    .to_string())
}

/// Build a CSR with Subject CN = domain, signed by the certificate key.
pub fn csr_der(domain: &str, key: &RsaPrivateKey) -> Result<Vec<u8>, AcmeError> {
    let key_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AcmeError::Csr(e.to_string()))?;
    let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(key_pem.as_str(), &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| AcmeError::Csr(e.to_string()))?;

    let mut params = rcgen::CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| AcmeError::Csr(e.to_string()))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, domain);

    let request = params
        .serialize_request(&key_pair)
        .map_err(|e| AcmeError::Csr(e.to_string()))?;
    Ok(request.der().to_vec())
}

/// PEM-encode every DER block of a chain as CERTIFICATE.
pub fn pem_encode_chain(chain: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for der in chain {
        let block = pem::Pem::new("CERTIFICATE", der.clone());
        let config = pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF);
        out.extend_from_slice(pem::encode_config(&block, config).as_bytes());
    }
    out
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Extract the target of a `Link: <url>;rel="..."` header.
fn link_with_rel(headers: &HeaderMap, rel: &str) -> Option<String> {
    let needle = format!("rel=\"{rel}\"");
    for value in headers.get_all("link") {
        let Ok(raw) = value.to_str() else { continue };
        for link in raw.split(',') {
            let link = link.trim();
            if link.contains(&needle) {
                let url = link.split(';').next()?;
                return Some(
                    url.trim()
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string(),
                );
            }
        }
    }
    None
}

/// Retry-After in whole seconds; HTTP-date forms are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, "retry-after")?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn body_snippet(response: Response) -> String {
    response.text().await.unwrap_or_default()
}
