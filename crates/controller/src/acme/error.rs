//! ACME error types

use std::time::Duration;

use thiserror::Error;

use crate::dns::DnsError;
use crate::store::StoreError;

/// Errors that can occur while driving the ACME state machine
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Directory discovery failed
    #[error("Directory discovery failed: {0}")]
    Directory(String),

    /// The server offered no replay nonce
    #[error("No replay nonce offered by the server")]
    MissingNonce,

    /// Key generation or encoding failed
    #[error("Key handling error: {0}")]
    Key(String),

    /// JWS construction failed
    #[error("Request signing failed: {0}")]
    Jws(String),

    /// Account registration failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Authorization request failed
    #[error("Authorization request failed: {0}")]
    Authorization(String),

    /// The authorization offered no dns-01 challenge; non-retryable this run
    #[error("No dns-01 challenge offered for '{domain}'")]
    NoDnsChallenge { domain: String },

    /// The authorization ended in a terminal failure; non-retryable this run
    #[error("Authorization for '{domain}' ended in status '{status}'")]
    AuthorizationInvalid { domain: String, status: String },

    /// The server rejected the challenge response
    #[error("Challenge accept failed: {0}")]
    Accept(String),

    /// CSR construction failed
    #[error("CSR construction failed: {0}")]
    Csr(String),

    /// Certificate issuance failed
    #[error("Certificate issuance failed: {0}")]
    Issuance(String),

    /// The certificate is not ready; retry after the carried duration
    #[error("Certificate not ready, retry after {0:?}")]
    RetryAfter(Duration),

    /// Certificate fetch failed
    #[error("Certificate fetch failed: {0}")]
    Fetch(String),

    /// HTTP transport error
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Account store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// DNS driver failure
    #[error(transparent)]
    Dns(#[from] DnsError),
}
