//! Per-domain ACME orchestration
//!
//! Drives one domain through the state machine:
//!
//! ```text
//! [enter]
//!   ├─ no registration URI  → REGISTER, agree to terms, persist
//!   ├─ certificate URL set  → REFETCH, persist, done
//!   └─ else                 → AUTHORIZE → place/monitor challenge →
//!                             accept → poll → ISSUE → persist → retract
//! ```
//!
//! Registration is persisted before any authorize call because the
//! authorization endpoint lives inside the registration response. The refetch
//! branch intentionally skips authorization entirely and trusts the CA to
//! honor the stored certificate URL.

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::dns::{ChallengeRecord, ChallengeSolver};
use crate::store::AccountStore;

use super::account::AccountRecord;
use super::client::{csr_der, pem_encode_chain, AcmeClient, CERT_POLL_INTERVAL};
use super::error::AcmeError;

/// Cadence for polling a pending authorization
const AUTHZ_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// One-domain-per-invocation ACME driver
pub struct Orchestrator<'a> {
    directory_url: &'a str,
    store: &'a AccountStore,
    solver: &'a dyn ChallengeSolver,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        directory_url: &'a str,
        store: &'a AccountStore,
        solver: &'a dyn ChallengeSolver,
    ) -> Self {
        Self {
            directory_url,
            store,
            solver,
        }
    }

    /// Run the state machine for one domain, mutating the record in place.
    /// On return the record holds current certificate material and has been
    /// persisted.
    pub async fn run(&self, record: &mut AccountRecord) -> Result<(), AcmeError> {
        let client = AcmeClient::discover(self.directory_url, record.account_key.clone()).await?;

        if record.registration.uri.is_empty() {
            info!(domain = %record.domain, "registering ACME account");
            let outcome = client.register(&record.registration.contact).await?;
            record.registration.uri = outcome.uri;
            record.registration.current_terms = outcome.current_terms;
            record.registration.authz_url = outcome.authz_url;
            record.registration.agreed_terms = record.registration.current_terms.clone();
            client
                .update_registration(
                    &record.registration.uri,
                    &record.registration.contact,
                    &record.registration.agreed_terms,
                )
                .await?;
            self.store.save(record)?;
        }

        if let Some(cert_url) = record.certificate_url.clone() {
            debug!(domain = %record.domain, "certificate URL known, refetching");
            let chain = client.fetch_certificate(&cert_url).await?;
            record.certificate = Some(pem_encode_chain(&chain));
            self.store.save(record)?;
            return Ok(());
        }

        let (authz_uri, challenge) = client
            .authorize(&record.registration.authz_url, &record.domain)
            .await?;

        let thumbprint = record.account_thumbprint();
        let challenge_record =
            ChallengeRecord::derive(&record.domain, &challenge.token, &thumbprint);

        self.solver.place(&challenge_record).await?;
        self.solver.monitor(&challenge_record).await?;

        let key_authorization = format!("{}.{}", challenge.token, thumbprint);
        client
            .accept_challenge(&challenge, &key_authorization)
            .await?;
        self.wait_for_authorization(&client, &authz_uri, &record.domain)
            .await?;

        let csr = csr_der(&record.domain, &record.certificate_key)?;
        let (mut chain, cert_url) = client.create_certificate(&csr).await?;
        if chain.is_empty() {
            chain = self.fetch_until_issued(&client, &cert_url).await?;
        }

        record.certificate = Some(pem_encode_chain(&chain));
        record.certificate_url = Some(cert_url);
        record.issued_at = Some(Utc::now());
        self.store.save(record)?;

        self.solver.retract(&challenge_record).await?;
        info!(domain = %record.domain, "certificate issued");
        Ok(())
    }

    async fn wait_for_authorization(
        &self,
        client: &AcmeClient,
        authz_uri: &str,
        domain: &str,
    ) -> Result<(), AcmeError> {
        loop {
            let authorization = client.authorization_status(authz_uri).await?;
            match authorization.status.as_str() {
                "valid" => return Ok(()),
                "invalid" => {
                    return Err(AcmeError::AuthorizationInvalid {
                        domain: domain.to_string(),
                        status: authorization.status,
                    })
                }
                status => {
                    trace!(domain = %domain, status = %status, "authorization pending");
                    sleep(AUTHZ_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Poll the certificate URL until the server hands the bytes over,
    /// honoring Retry-After and backing off 3 s otherwise.
    async fn fetch_until_issued(
        &self,
        client: &AcmeClient,
        cert_url: &str,
    ) -> Result<Vec<Vec<u8>>, AcmeError> {
        loop {
            match client.fetch_certificate(cert_url).await {
                Ok(chain) => return Ok(chain),
                Err(AcmeError::RetryAfter(delay)) => {
                    debug!(cert_url = %cert_url, delay = ?delay, "certificate not ready");
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(cert_url = %cert_url, error = %err, "certificate fetch failed, retrying");
                    sleep(CERT_POLL_INTERVAL).await;
                }
            }
        }
    }
}
