//! DNS provider implementations
//!
//! Available providers:
//! - [`ExecProvider`] - external plugin binary, `{provider, secret, secretKey}` binding
//! - [`CloudDnsProvider`] - Google Cloud DNS, `{project, serviceAccount}` binding

mod clouddns;
mod exec;

pub use clouddns::CloudDnsProvider;
pub use exec::ExecProvider;

use std::sync::Arc;
use std::time::Duration;

use crate::config::DnsBinding;
use crate::kube::resources::Certificate;
use crate::kube::KubeClient;

use super::provider::{DnsError, DnsProvider, DnsResult};

const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the record writer for a certificate, according to the binding shape
/// this deployment recognizes.
pub fn provider_for(
    binding: DnsBinding,
    certificate: &Certificate,
    kube: &KubeClient,
) -> DnsResult<Arc<dyn DnsProvider>> {
    let spec = &certificate.spec;
    match binding {
        DnsBinding::Exec => {
            if spec.provider.is_empty() || spec.secret.is_empty() || spec.secret_key.is_empty() {
                return Err(DnsError::Configuration(format!(
                    "certificate '{}' is missing provider/secret/secretKey for the exec binding",
                    spec.domain
                )));
            }
            Ok(Arc::new(ExecProvider::new(
                &spec.provider,
                &spec.domain,
                kube.clone(),
                certificate.namespace(),
                &spec.secret,
                &spec.secret_key,
            )))
        }
        DnsBinding::CloudDns => {
            if spec.project.is_empty() {
                return Err(DnsError::Configuration(format!(
                    "certificate '{}' is missing project for the clouddns binding",
                    spec.domain
                )));
            }
            Ok(Arc::new(CloudDnsProvider::new(
                &spec.project,
                &spec.service_account,
                API_TIMEOUT,
            )?))
        }
    }
}
