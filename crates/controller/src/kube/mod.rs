//! Cluster API collaborator
//!
//! - [`KubeClient`] - certificate list, DNS-binding secrets, TLS secret writes
//! - [`watch`] - long-poll event ingestion with reconnection
//! - [`resources`] - the wire types

pub mod client;
pub mod resources;
pub mod watch;

pub use client::{KubeClient, KubeError, CERTIFICATES_PATH};
