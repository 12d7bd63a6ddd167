//! Wire types for the cluster API objects the controller reads and writes
//!
//! Unknown fields are ignored everywhere; the controller only recognizes the
//! subset it acts on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object metadata subset the controller cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A declared certificate: what the user wants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CertificateSpec,
}

impl Certificate {
    /// The namespace the output secret lives in
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

/// Recognized spec fields; exactly one DNS binding shape is honored per
/// deployment (see [`crate::config::DnsBinding`])
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CertificateSpec {
    pub domain: String,
    pub email: String,
    // exec-plugin binding
    pub provider: String,
    pub secret: String,
    pub secret_key: String,
    // direct Cloud DNS binding
    pub project: String,
    pub service_account: String,
}

/// List response for the certificates endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateList {
    #[serde(default)]
    pub items: Vec<Certificate>,
}

/// Watch stream event kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    #[serde(other)]
    #[default]
    Unknown,
}

/// One `{type, object}` envelope from the watch stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateEvent {
    #[serde(default, rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub object: Certificate,
}

/// A `kubernetes.io/tls` secret as it travels over the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default, rename = "type")]
    pub secret_type: String,
}
