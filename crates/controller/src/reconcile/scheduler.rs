//! Reconciliation scheduling
//!
//! Serializes the two control-plane inputs: the periodic full sweep and the
//! watch-event stream. The scheduler owns the reconcile lock; one sweep and
//! one event are mutually exclusive, events are handled one at a time in
//! arrival order, and within a sweep distinct domains fan out in parallel
//! (they touch different account records and independent DNS names).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::kube::resources::{CertificateEvent, EventType};
use crate::kube::KubeError;

use super::{ReconcileError, Reconciler};

/// Owns the reconcile lock and both input loops
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    lock: Mutex<()>,
    sync_interval: Duration,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, sync_interval: Duration) -> Self {
        Self {
            reconciler,
            lock: Mutex::new(()),
            sync_interval,
        }
    }

    /// One full pass over the desired set. The reconcile lock is held for
    /// the whole sweep; per-domain failures are logged, not propagated, so
    /// one broken domain cannot starve the rest.
    pub async fn sweep(&self) -> Result<(), KubeError> {
        let _guard = self.lock.lock().await;

        let certificates = self.reconciler.kube().list_certificates().await?;
        debug!(count = certificates.len(), "sweeping certificates");

        let mut tasks = JoinSet::new();
        for certificate in certificates {
            let reconciler = Arc::clone(&self.reconciler);
            tasks.spawn(async move {
                if let Err(err) = reconciler.reconcile(&certificate).await {
                    error!(
                        domain = %certificate.spec.domain,
                        error = %err,
                        "reconcile failed"
                    );
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Sweep timer loop. After the shutdown signal any sweep already started
    /// finishes before the loop exits.
    pub async fn run_sweeps(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sync_interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "periodic sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("stopped reconciliation loop");
                    return;
                }
            }
        }
    }

    /// Watch-event consumer loop. Transport errors from the ingestor arrive
    /// on their own channel and are only logged.
    pub async fn run_events(
        &self,
        mut events: mpsc::Receiver<CertificateEvent>,
        mut errors: mpsc::Receiver<KubeError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(err) = self.handle_event(event).await {
                            error!(error = %err, "event processing failed");
                        }
                    }
                    None => {
                        info!("certificate event stream closed");
                        return;
                    }
                },
                err = errors.recv() => match err {
                    Some(err) => warn!(error = %err, "certificate watch error"),
                    None => {
                        info!("certificate watcher gone");
                        return;
                    }
                },
                _ = shutdown.recv() => {
                    info!("stopped certificate event watcher");
                    return;
                }
            }
        }
    }

    /// Apply one watch event under the reconcile lock. MODIFIED is another
    /// reconcile; DELETED withdraws the secret and tolerates unknown domains.
    pub async fn handle_event(&self, event: CertificateEvent) -> Result<(), ReconcileError> {
        let _guard = self.lock.lock().await;
        match event.event_type {
            EventType::Added | EventType::Modified => {
                self.reconciler.reconcile(&event.object).await
            }
            EventType::Deleted => self.reconciler.delete(&event.object).await,
            EventType::Unknown => {
                debug!(domain = %event.object.spec.domain, "ignoring unrecognized event type");
                Ok(())
            }
        }
    }
}
