//! # Custom Resource Definitions
//!
//! CRD types for the audit extension controller.
//!
//! ## Module Structure
//!
//! - `extension.rs` - the gardener `Extension` resource and its status
//! - `audit_config.rs` - the `AuditConfig` provider config and its defaulting
//! - `quantity.rs` - Kubernetes quantity validation

mod audit_config;
mod extension;
mod quantity;

use thiserror::Error;

pub use audit_config::{
    AuditBackendClusterForwarding, AuditBackendLog, AuditBackends, AuditConfig, AuditDefaults,
    AuditPersistence, Backends, ResolvedAuditConfig, AUDIT_CONFIG_API_VERSION, AUDIT_CONFIG_KIND,
    DEFAULT_AUDIT_POLICY,
};
pub use extension::{
    ClusterContext, Condition, Extension, ExtensionSpec, ExtensionStatus, LastError, LastOperation,
    OperationState, OperationType, GENERIC_KUBECONFIG_ANNOTATION, OPERATION_ANNOTATION,
};
pub use quantity::parse_quantity;

/// Errors raised while reading an `AuditConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to decode provider config: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported provider config apiVersion {0:?}, expected audit.metal-stack.io/v1alpha1")]
    UnsupportedApiVersion(String),

    #[error("unsupported provider config kind {0:?}, expected AuditConfig")]
    UnsupportedKind(String),

    #[error("unable to parse persistence size {0:?} as kubernetes quantity")]
    InvalidQuantity(String),
}
