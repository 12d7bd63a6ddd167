//! certinel - main entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use certinel::kube::{watch, KubeClient};
use certinel::{AccountStore, Config, Reconciler, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting certificate controller");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let store =
        AccountStore::open(&config.data_dir.join("data.db")).context("opening account store")?;
    let kube = KubeClient::new(&config.api_host).context("building cluster API client")?;

    let reconciler = Arc::new(Reconciler::new(
        store,
        kube.clone(),
        &config.acme_url,
        config.dns_binding,
    ));
    let scheduler = Arc::new(Scheduler::new(
        reconciler,
        Duration::from_secs(config.sync_interval),
    ));

    info!("certificate controller started");

    // Converge existing declared state before the first timer tick or event.
    if let Err(err) = scheduler.sweep().await {
        error!(error = %err, "startup sweep failed");
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    info!("watching for certificate events");
    let (events, errors) = watch::monitor_certificate_events(&kube);
    let event_loop = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run_events(events, errors, shutdown).await })
    };

    info!("starting reconciliation loop");
    let sweep_loop = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run_sweeps(shutdown).await })
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());

    // Both loops drain the work they already started before exiting.
    let _ = event_loop.await;
    let _ = sweep_loop.await;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
        }
    }
}
