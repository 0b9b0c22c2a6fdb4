//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Fixed identifiers the composed resource sets rely on live here, next to the
//! defaults that can be overridden via configuration or environment variables.

/// Extension type handled by this controller (`Extension.spec.type`)
pub const EXTENSION_TYPE: &str = "audit";

/// Managed resource slot installed into the shoot (tenant-facing) cluster
pub const SHOOT_AUDIT_RESOURCE_NAME: &str = "extension-audit-shoot";

/// Managed resource slot installed into the seed (management) cluster
pub const SEED_AUDIT_RESOURCE_NAME: &str = "extension-audit-seed";

/// Managed resource origin for the shoot slot
pub const SHOOT_RESOURCE_ORIGIN: &str = "audit-extension";

/// Certificate authority for the audittailer transport
pub const CA_NAME: &str = "ca-audittailer";

/// Server certificate presented by the audittailer
pub const SERVER_CERT_NAME: &str = "audittailer-server";

/// Client certificate used by the cluster forwarder
pub const CLIENT_CERT_NAME: &str = "audittailer-client";

/// Common name and service name of the audittailer
pub const AUDITTAILER_NAME: &str = "audittailer";

/// Namespace in the shoot that hosts the audittailer
pub const AUDITTAILER_NAMESPACE: &str = "audit";

/// Port the audittailer accepts forwarded records on
pub const AUDITTAILER_PORT: i32 = 24224;

/// Name of the audit webhook backend (service, statefulset, pod label)
pub const WEBHOOK_BACKEND_NAME: &str = "audit-webhook-backend";

/// Port of the fluent-bit http input of the webhook backend
pub const WEBHOOK_BACKEND_PORT: i32 = 9880;

/// Name of the cluster forwarding gateway (deployment, fluent-bit host)
pub const FORWARDER_NAME: &str = "audit-cluster-forwarding-vpn-gateway";

/// Port the cluster forwarding gateway listens on
pub const FORWARDER_PORT: u16 = 9090;

/// Prefix gardener uses for shoot access token secrets
pub const SHOOT_ACCESS_SECRET_PREFIX: &str = "shoot-access-";

/// Mount path of the generic kubeconfig injected into seed deployments
pub const GENERIC_KUBECONFIG_MOUNT_PATH: &str = "/var/run/secrets/gardener.cloud/shoot/generic-kubeconfig";

/// Default generic token kubeconfig secret name in the seed namespace
pub const DEFAULT_GENERIC_KUBECONFIG_SECRET_NAME: &str = "generic-token-kubeconfig";

/// Default persistence size of the webhook backend buffer
pub const DEFAULT_PERSISTENCE_SIZE: &str = "1Gi";

/// Label identifying objects created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "audit-extension";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default deadline for managed resources to disappear on delete (seconds)
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 120;

/// Default poll interval while waiting for managed resources to disappear (milliseconds)
pub const DEFAULT_DELETE_POLL_INTERVAL_MS: u64 = 2_000;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Longest requeue delay after repeated failures (seconds)
pub const MAX_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 600;

/// Default resync interval after a successful reconciliation (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;
