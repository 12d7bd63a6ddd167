//! certinel - cluster certificate controller
//!
//! Keeps user-declared Certificate objects in sync with real X.509
//! certificates issued by an ACME CA and published as `kubernetes.io/tls`
//! secrets. Users declare what they want (domain, contact email, DNS provider
//! hookup); the controller acquires, persists, renews and withdraws the
//! underlying certificates.
//!
//! # Architecture
//!
//! - [`store`] - durable per-domain ACME account records
//! - [`acme`] - wire client and per-domain orchestration
//! - [`dns`] - DNS-01 challenge driver: record writers plus authoritative
//!   nameserver propagation monitoring
//! - [`kube`] - cluster API collaborator and watch-stream ingestion
//! - [`reconcile`] - the per-domain reconciler and the scheduler that
//!   serializes sweeps and events
//!
//! # Control flow
//!
//! Two inputs feed the scheduler: a periodic full sweep over the declared
//! set and the ADD/MODIFY/DELETE event stream from the cluster API. Both are
//! serialized by one reconcile lock. Each desired certificate flows through
//! the reconciler, which consults the account store, runs the ACME
//! orchestrator (delegating DNS mutations and propagation waits to the
//! challenge driver), then converges the TLS secret.

pub mod acme;
pub mod config;
pub mod dns;
pub mod kube;
pub mod reconcile;
pub mod store;

pub use config::{Config, DnsBinding};
pub use reconcile::{ReconcileError, Reconciler, Scheduler};
pub use store::{AccountStore, StoreError};
