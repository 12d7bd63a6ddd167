//! Exec-plugin DNS provider
//!
//! Dispatches record mutations to an external plugin binary. The contract:
//! the plugin lives at `/<provider>`, receives its parameters in the
//! environment (`APIVERSION`, `COMMAND`, `DOMAIN`, `FQDN`, `TOKEN`) and the
//! provider configuration blob on stdin. A non-zero exit reports the failure
//! on stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::dns::provider::{DnsError, DnsProvider, DnsResult};
use crate::kube::KubeClient;

const PLUGIN_API_VERSION: &str = "v1";

/// DNS provider backed by an external plugin binary
///
/// The provider configuration blob is read from the bound cluster secret on
/// every invocation, so rotated credentials take effect without a restart.
#[derive(Debug)]
pub struct ExecProvider {
    plugin: PathBuf,
    domain: String,
    kube: KubeClient,
    namespace: String,
    secret_name: String,
    secret_key: String,
}

impl ExecProvider {
    pub fn new(
        provider: &str,
        domain: &str,
        kube: KubeClient,
        namespace: &str,
        secret_name: &str,
        secret_key: &str,
    ) -> Self {
        Self {
            plugin: Path::new("/").join(provider),
            domain: domain.to_string(),
            kube,
            namespace: namespace.to_string(),
            secret_name: secret_name.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn command_env(&self, command: &str, fqdn: &str, value: &str) -> Vec<(String, String)> {
        vec![
            ("APIVERSION".to_string(), PLUGIN_API_VERSION.to_string()),
            ("COMMAND".to_string(), command.to_string()),
            ("DOMAIN".to_string(), self.domain.clone()),
            ("FQDN".to_string(), fqdn.to_string()),
            ("TOKEN".to_string(), value.to_string()),
        ]
    }

    async fn invoke(&self, command: &str, fqdn: &str, value: &str) -> DnsResult<()> {
        let config = self
            .kube
            .dns_provider_config(&self.namespace, &self.secret_name, &self.secret_key)
            .await
            .map_err(|e| {
                DnsError::Configuration(format!(
                    "reading provider config from secret '{}': {}",
                    self.secret_name, e
                ))
            })?;

        debug!(
            plugin = %self.plugin.display(),
            command = %command,
            fqdn = %fqdn,
            "invoking DNS plugin"
        );

        let mut child = Command::new(&self.plugin)
            .env_clear()
            .envs(self.command_env(command, fqdn, value))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DnsError::ApiRequest(format!("spawning plugin '{}': {}", self.plugin.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&config).await.map_err(|e| {
                DnsError::ApiRequest(format!("writing provider config to plugin stdin: {e}"))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            DnsError::ApiRequest(format!("waiting for plugin '{}': {}", self.plugin.display(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("plugin '{}' exited with {}", self.plugin.display(), output.status)
            } else {
                stderr
            };
            return Err(DnsError::ApiRequest(message));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for ExecProvider {
    fn name(&self) -> &'static str {
        "exec"
    }

    async fn create_record(&self, fqdn: &str, value: &str, _ttl: u32) -> DnsResult<()> {
        self.invoke("CREATE", fqdn, value)
            .await
            .map_err(|e| match e {
                DnsError::ApiRequest(message) => DnsError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message,
                },
                other => other,
            })
    }

    async fn delete_record(&self, fqdn: &str, value: &str, _ttl: u32) -> DnsResult<()> {
        self.invoke("DELETE", fqdn, value)
            .await
            .map_err(|e| match e {
                DnsError::ApiRequest(message) => DnsError::RecordDeletion {
                    fqdn: fqdn.to_string(),
                    message,
                },
                other => other,
            })
    }
}
