//! # AuditConfig
//!
//! Provider configuration of the audit extension, decoded from
//! `Extension.spec.providerConfig`, and the defaulting that turns a partially
//! specified config into a fully populated one.
//!
//! Decoding and defaulting are separate steps: [`AuditConfig::decode`] only
//! checks the payload shape, [`AuditConfig::with_defaults`] never fails.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

use super::quantity::parse_quantity;
use super::ConfigError;
use crate::constants::DEFAULT_PERSISTENCE_SIZE;

/// API version accepted in the provider config payload
pub const AUDIT_CONFIG_API_VERSION: &str = "audit.metal-stack.io/v1alpha1";

/// Kind accepted in the provider config payload
pub const AUDIT_CONFIG_KIND: &str = "AuditConfig";

/// Built-in audit policy applied when the config carries none
pub const DEFAULT_AUDIT_POLICY: &str = include_str!("default-audit-policy.yaml");

/// Desired state of the audit pipeline as written by the user
///
/// Every field is optional; unknown fields are rejected.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Storage of the webhook backend buffer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<AuditPersistence>,
    /// Audit policy document handed to the kube-apiserver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_policy: Option<String>,
    /// Enabled audit log destinations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<AuditBackends>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditPersistence {
    /// Requested volume size, a Kubernetes quantity such as `1Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditBackends {
    /// Write audit records to the webhook backend's stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<AuditBackendLog>,
    /// Forward audit records into the shoot's audittailer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_forwarding: Option<AuditBackendClusterForwarding>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditBackendLog {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditBackendClusterForwarding {
    #[serde(default)]
    pub enabled: bool,
}

/// Values filled into an [`AuditConfig`] that leaves them unset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDefaults {
    pub persistence_size: String,
    pub audit_policy: String,
}

impl Default for AuditDefaults {
    fn default() -> Self {
        Self {
            persistence_size: DEFAULT_PERSISTENCE_SIZE.to_string(),
            audit_policy: DEFAULT_AUDIT_POLICY.to_string(),
        }
    }
}

/// Enabled state of each backend after defaulting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backends {
    pub log: bool,
    pub cluster_forwarding: bool,
}

/// Fully populated audit configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuditConfig {
    /// Never empty
    pub persistence_size: String,
    pub storage_class_name: Option<String>,
    /// Never empty
    pub audit_policy: String,
    pub backends: Backends,
}

impl ResolvedAuditConfig {
    /// Parse the persistence size as a Kubernetes quantity
    pub fn storage_size(&self) -> Result<Quantity, ConfigError> {
        parse_quantity(&self.persistence_size)
    }
}

impl AuditConfig {
    /// Decode a raw provider config payload
    ///
    /// An absent or `null` payload is the empty config. `apiVersion` and `kind`
    /// may be omitted, but when present they must name an `AuditConfig`.
    pub fn decode(raw: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        let config: AuditConfig = match raw {
            None | Some(serde_json::Value::Null) => return Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(ConfigError::Decode)?,
        };

        if let Some(api_version) = config.api_version.as_deref() {
            if api_version != AUDIT_CONFIG_API_VERSION {
                return Err(ConfigError::UnsupportedApiVersion(api_version.to_string()));
            }
        }
        if let Some(kind) = config.kind.as_deref() {
            if kind != AUDIT_CONFIG_KIND {
                return Err(ConfigError::UnsupportedKind(kind.to_string()));
            }
        }

        Ok(config)
    }

    /// Fill every unset field from `defaults`
    ///
    /// Empty strings count as unset. When `backends` is absent entirely only the
    /// log backend is enabled; a present but empty `backends` enables nothing.
    pub fn with_defaults(self, defaults: &AuditDefaults) -> ResolvedAuditConfig {
        let persistence = self.persistence.unwrap_or_default();

        let persistence_size = persistence
            .size
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| defaults.persistence_size.clone());

        let audit_policy = self
            .audit_policy
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| defaults.audit_policy.clone());

        let backends = match self.backends {
            None => Backends {
                log: true,
                cluster_forwarding: false,
            },
            Some(b) => Backends {
                log: b.log.is_some_and(|l| l.enabled),
                cluster_forwarding: b.cluster_forwarding.is_some_and(|c| c.enabled),
            },
        };

        ResolvedAuditConfig {
            persistence_size,
            storage_class_name: persistence.storage_class_name,
            audit_policy,
            backends,
        }
    }
}
