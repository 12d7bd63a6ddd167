//! Per-domain convergence
//!
//! The reconciler brings one declared certificate into alignment with its
//! account record and TLS secret. It is idempotent and level-triggered: every
//! failure is "do nothing now, re-converge on the next sweep".

pub mod scheduler;

pub use scheduler::Scheduler;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::acme::{AccountRecord, AcmeError, Orchestrator};
use crate::config::DnsBinding;
use crate::dns::{
    provider_for, ChallengeSolver, DnsChallengeDriver, DnsError, PropagationMonitor,
};
use crate::kube::resources::Certificate;
use crate::kube::{KubeClient, KubeError};
use crate::store::{AccountStore, StoreError};

/// Errors surfaced from one reconcile run; the scheduler logs them and the
/// next sweep retries.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Kube(#[from] KubeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Certificate object has no domain")]
    MissingDomain,
}

/// Single-domain convergence over the store, the ACME orchestrator and the
/// cluster API. All collaborators are constructor parameters so tests can
/// substitute recording fakes.
pub struct Reconciler {
    store: AccountStore,
    kube: KubeClient,
    directory_url: String,
    binding: DnsBinding,
    propagation: PropagationMonitor,
}

impl Reconciler {
    pub fn new(
        store: AccountStore,
        kube: KubeClient,
        directory_url: &str,
        binding: DnsBinding,
    ) -> Self {
        Self {
            store,
            kube,
            directory_url: directory_url.to_string(),
            binding,
            propagation: PropagationMonitor::new(),
        }
    }

    /// Replace the propagation monitor (tests tune the timeouts down).
    pub fn with_propagation(mut self, propagation: PropagationMonitor) -> Self {
        self.propagation = propagation;
        self
    }

    /// The cluster API client this reconciler writes through
    pub fn kube(&self) -> &KubeClient {
        &self.kube
    }

    /// The account store backing this reconciler
    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Bring one certificate into alignment: account record, ACME material,
    /// TLS secret.
    pub async fn reconcile(&self, certificate: &Certificate) -> Result<(), ReconcileError> {
        if certificate.spec.domain.is_empty() {
            return Err(ReconcileError::MissingDomain);
        }
        let solver = self.solver_for(certificate)?;
        self.reconcile_with_solver(certificate, solver.as_ref())
            .await
    }

    /// Reconcile with an explicit challenge solver. This is the seam the
    /// tests use; production goes through [`Reconciler::reconcile`].
    pub async fn reconcile_with_solver(
        &self,
        certificate: &Certificate,
        solver: &dyn ChallengeSolver,
    ) -> Result<(), ReconcileError> {
        let domain = &certificate.spec.domain;
        if domain.is_empty() {
            return Err(ReconcileError::MissingDomain);
        }

        let mut record = match self.store.find(domain)? {
            Some(record) => record,
            None => {
                info!(domain = %domain, "creating new ACME account");
                AccountRecord::new(&certificate.spec.email, domain)?
            }
        };

        let orchestrator = Orchestrator::new(&self.directory_url, &self.store, solver);
        orchestrator.run(&mut record).await?;

        self.publish(certificate, &record).await
    }

    /// Emit or update the `kubernetes.io/tls` secret for the record.
    async fn publish(
        &self,
        certificate: &Certificate,
        record: &AccountRecord,
    ) -> Result<(), ReconcileError> {
        let cert_pem = record
            .certificate
            .as_deref()
            .ok_or_else(|| AcmeError::Issuance("orchestrator returned no certificate".to_string()))?;
        let key_pem = record.certificate_key_pem()?;
        self.kube
            .sync_tls_secret(certificate, cert_pem, key_pem.as_bytes())
            .await?;
        Ok(())
    }

    /// Remove the TLS secret for a withdrawn certificate.
    ///
    /// The account record is kept so a re-added certificate does not
    /// re-register against the CA's rate limits; [`Reconciler::purge`] does
    /// the full cleanup.
    pub async fn delete(&self, certificate: &Certificate) -> Result<(), ReconcileError> {
        info!(domain = %certificate.spec.domain, "deleting TLS secret");
        self.kube
            .delete_tls_secret(certificate.namespace(), &certificate.spec.domain)
            .await?;
        Ok(())
    }

    /// Remove both the account record and the TLS secret.
    pub async fn purge(&self, certificate: &Certificate) -> Result<(), ReconcileError> {
        info!(domain = %certificate.spec.domain, "purging account and TLS secret");
        self.store.delete(&certificate.spec.domain)?;
        self.kube
            .delete_tls_secret(certificate.namespace(), &certificate.spec.domain)
            .await?;
        Ok(())
    }

    fn solver_for(
        &self,
        certificate: &Certificate,
    ) -> Result<Arc<dyn ChallengeSolver>, ReconcileError> {
        let provider = provider_for(self.binding, certificate, &self.kube)?;
        Ok(Arc::new(DnsChallengeDriver::new(
            provider,
            self.propagation.clone(),
        )))
    }
}
