//! # Extension Resource
//!
//! The gardener `Extension` resource this controller acts on, and the cluster
//! context derived from it.

use schemars::{Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_GENERIC_KUBECONFIG_SECRET_NAME, EXTENSION_TYPE};

/// Annotation overriding the generic token kubeconfig secret of the seed namespace
pub const GENERIC_KUBECONFIG_ANNOTATION: &str = "audit.metal-stack.io/generic-kubeconfig";

/// Annotation gardener sets to request a non-default operation
pub const OPERATION_ANNOTATION: &str = "gardener.cloud/operation";

/// Extension Custom Resource Definition
///
/// One `Extension` of type `audit` exists per shoot, in the shoot's control plane
/// namespace on the seed.
///
/// # Example
///
/// ```yaml
/// apiVersion: extensions.gardener.cloud/v1alpha1
/// kind: Extension
/// metadata:
///   name: audit
///   namespace: shoot--project--cluster
/// spec:
///   type: audit
///   providerConfig:
///     apiVersion: audit.metal-stack.io/v1alpha1
///     kind: AuditConfig
///     persistence:
///       size: 5Gi
///     backends:
///       clusterForwarding:
///         enabled: true
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Extension",
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    namespaced,
    status = "ExtensionStatus",
    shortname = "ext",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}, {"name":"Operation", "type":"string", "jsonPath":".status.lastOperation.type"}, {"name":"State", "type":"string", "jsonPath":".status.lastOperation.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Extension type, `audit` for this controller
    pub r#type: String,
    /// Raw provider configuration, decoded into an `AuditConfig`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "provider_config_schema")]
    pub provider_config: Option<serde_json::Value>,
}

fn provider_config_schema(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true,
        "description": "Provider specific configuration (AuditConfig)."
    })
}

/// Status of the Extension resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Last operation performed on the extension
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
    /// Last error, cleared on success
    #[serde(default)]
    pub last_error: Option<LastError>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle operation of an extension
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum OperationType {
    Reconcile,
    Delete,
    Restore,
    Migrate,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::Reconcile => "Reconcile",
            OperationType::Delete => "Delete",
            OperationType::Restore => "Restore",
            OperationType::Migrate => "Migrate",
        };
        f.write_str(s)
    }
}

/// Outcome of the last operation
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum OperationState {
    Processing,
    Succeeded,
    Error,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub r#type: OperationType,
    pub state: OperationState,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC3339 timestamp
    #[serde(default)]
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    /// Error class: `input`, `dependency` or `timeout`
    #[serde(default)]
    pub code: Option<String>,
}

impl Extension {
    /// Whether this extension is handled by the audit controller
    pub fn is_audit(&self) -> bool {
        self.spec.r#type == EXTENSION_TYPE
    }

    /// Operation requested through the `gardener.cloud/operation` annotation
    ///
    /// Anything but `restore` and `migrate` means a plain reconcile.
    pub fn requested_operation(&self) -> OperationType {
        let annotation = self
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(OPERATION_ANNOTATION))
            .map(String::as_str);
        match annotation {
            Some("restore") => OperationType::Restore,
            Some("migrate") => OperationType::Migrate,
            _ => OperationType::Reconcile,
        }
    }
}

/// Cluster-scoped facts the actuator needs besides the `AuditConfig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    /// Shoot control plane namespace on the seed
    pub namespace: String,
    /// Secret holding the generic token kubeconfig for the shoot
    pub generic_kubeconfig_secret_name: String,
}

impl ClusterContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            generic_kubeconfig_secret_name: DEFAULT_GENERIC_KUBECONFIG_SECRET_NAME.to_string(),
        }
    }

    /// Derive the context from an `Extension`; `None` for cluster-scoped objects
    pub fn from_extension(ex: &Extension) -> Option<Self> {
        let namespace = ex.metadata.namespace.clone()?;
        let mut ctx = Self::new(namespace);
        if let Some(name) = ex
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(GENERIC_KUBECONFIG_ANNOTATION))
        {
            ctx.generic_kubeconfig_secret_name = name.clone();
        }
        Some(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn extension(annotations: Option<BTreeMap<String, String>>) -> Extension {
        let mut ex = Extension::new(
            "audit",
            ExtensionSpec {
                r#type: "audit".to_string(),
                provider_config: None,
            },
        );
        ex.metadata.namespace = Some("shoot--prj--c1".to_string());
        ex.metadata.annotations = annotations;
        ex
    }

    #[test]
    fn test_cluster_context_defaults_generic_kubeconfig() {
        let ctx = ClusterContext::from_extension(&extension(None)).unwrap();
        assert_eq!(ctx.namespace, "shoot--prj--c1");
        assert_eq!(ctx.generic_kubeconfig_secret_name, "generic-token-kubeconfig");
    }

    #[test]
    fn test_cluster_context_annotation_override() {
        let annotations = BTreeMap::from([(
            GENERIC_KUBECONFIG_ANNOTATION.to_string(),
            "generic-token-kubeconfig-abc123".to_string(),
        )]);
        let ctx = ClusterContext::from_extension(&extension(Some(annotations))).unwrap();
        assert_eq!(ctx.generic_kubeconfig_secret_name, "generic-token-kubeconfig-abc123");
    }

    #[test]
    fn test_requested_operation() {
        assert_eq!(extension(None).requested_operation(), OperationType::Reconcile);

        let restore = BTreeMap::from([(OPERATION_ANNOTATION.to_string(), "restore".to_string())]);
        assert_eq!(
            extension(Some(restore)).requested_operation(),
            OperationType::Restore
        );

        let migrate = BTreeMap::from([(OPERATION_ANNOTATION.to_string(), "migrate".to_string())]);
        assert_eq!(
            extension(Some(migrate)).requested_operation(),
            OperationType::Migrate
        );

        let reconcile =
            BTreeMap::from([(OPERATION_ANNOTATION.to_string(), "reconcile".to_string())]);
        assert_eq!(
            extension(Some(reconcile)).requested_operation(),
            OperationType::Reconcile
        );
    }

    #[test]
    fn test_is_audit() {
        let mut ex = extension(None);
        assert!(ex.is_audit());
        ex.spec.r#type = "shoot-dns-service".to_string();
        assert!(!ex.is_audit());
    }
}
