//! ACME protocol driver
//!
//! The wire client speaks the v1-era endpoints advertised by the directory
//! document (`new-reg`, `new-authz`, `new-cert`): JWS-signed POST bodies with
//! RS256 and a `jwk` protected header, replay nonces pre-fetched by HEAD
//! against the directory URL. The orchestrator drives one domain per
//! invocation — register → authorize → accept → poll → issue → fetch — with a
//! refetch short-circuit once a certificate URL is known.
//!
//! Only the dns-01 challenge type is supported; an authorization that offers
//! none fails the run.

pub mod account;
pub mod client;
mod error;
pub mod orchestrator;

pub use account::{AccountRecord, Registration};
pub use client::AcmeClient;
pub use error::AcmeError;
pub use orchestrator::Orchestrator;
