//! Process configuration

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Let's Encrypt staging directory; switch to production deliberately.
pub const DEFAULT_ACME_URL: &str = "https://acme-staging.api.letsencrypt.org/directory";

/// Which DNS binding shape this deployment recognizes; exactly one per
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DnsBinding {
    /// `{provider, secret, secretKey}`: an external plugin at `/<provider>`
    /// writes the challenge records
    Exec,
    /// `{project, serviceAccount}`: records written directly through Cloud DNS
    #[value(name = "clouddns")]
    CloudDns,
}

/// Command-line surface of the controller
#[derive(Debug, Parser)]
#[command(
    name = "certinel",
    version,
    about = "Cluster certificate controller backed by an ACME CA"
)]
pub struct Config {
    /// Data directory path
    #[arg(long = "data-dir", default_value = "/var/lib/certinel")]
    pub data_dir: PathBuf,

    /// ACME directory URL
    #[arg(long = "acme-url", default_value = DEFAULT_ACME_URL)]
    pub acme_url: String,

    /// Sync interval in seconds
    #[arg(long = "sync-interval", default_value_t = 120)]
    pub sync_interval: u64,

    /// Cluster API endpoint (typically a kubectl proxy)
    #[arg(long = "api-host", default_value = "http://127.0.0.1:8001")]
    pub api_host: String,

    /// DNS binding shape recognized by this deployment
    #[arg(long = "dns-binding", value_enum, default_value = "exec")]
    pub dns_binding: DnsBinding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["certinel"]);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/certinel"));
        assert_eq!(config.acme_url, DEFAULT_ACME_URL);
        assert_eq!(config.sync_interval, 120);
        assert_eq!(config.api_host, "http://127.0.0.1:8001");
        assert_eq!(config.dns_binding, DnsBinding::Exec);
    }

    #[test]
    fn test_flag_overrides() {
        let config = Config::parse_from([
            "certinel",
            "--data-dir",
            "/tmp/certinel",
            "--acme-url",
            "https://ca.example/directory",
            "--sync-interval",
            "30",
            "--dns-binding",
            "clouddns",
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/certinel"));
        assert_eq!(config.acme_url, "https://ca.example/directory");
        assert_eq!(config.sync_interval, 30);
        assert_eq!(config.dns_binding, DnsBinding::CloudDns);
    }
}
