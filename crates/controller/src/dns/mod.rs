//! DNS-01 challenge support
//!
//! Everything between the ACME orchestrator and the authoritative zone:
//!
//! - [`DnsProvider`] - trait for challenge record writers
//! - [`ChallengeSolver`] / [`DnsChallengeDriver`] - place / monitor / retract
//!   driver around a provider
//! - [`PropagationMonitor`] - waits until every authoritative nameserver of
//!   the zone serves the challenge TXT record
//! - [`providers`] - the exec-plugin and Cloud DNS adapters

pub mod challenge;
pub mod propagation;
pub mod provider;
pub mod providers;

pub use challenge::{ChallengeRecord, ChallengeSolver, DnsChallengeDriver};
pub use propagation::{PropagationConfig, PropagationMonitor};
pub use provider::{DnsError, DnsProvider, DnsResult, CHALLENGE_TTL};
pub use providers::{provider_for, CloudDnsProvider, ExecProvider};
