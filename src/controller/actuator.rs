//! # Actuator
//!
//! Drives the audit extension of one shoot toward its desired state.
//!
//! Reconcile derives the full configuration from the (possibly partial)
//! `AuditConfig`, materializes the audittailer credentials, composes both
//! resource sets in memory and only then installs them. Delete removes both
//! sets and waits, bounded, until they are gone. Restore is Reconcile, Migrate
//! does nothing.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::constants::{
    AUDITTAILER_NAME, AUDITTAILER_NAMESPACE, CA_NAME, CLIENT_CERT_NAME, FORWARDER_NAME,
    SEED_AUDIT_RESOURCE_NAME, SERVER_CERT_NAME, SHOOT_AUDIT_RESOURCE_NAME,
};
use crate::controller::composition::{compose_backends, ForwardingContext};
use crate::controller::wait::{wait_until_removed, WaitOptions};
use crate::crd::{AuditConfig, AuditDefaults, ClusterContext, OperationType, ResolvedAuditConfig};
use crate::error::{ActuatorError, ErrorKind};
use crate::images::{ImageVector, AUDITTAILER_IMAGE, AUDIT_FORWARDER_IMAGE, FLUENT_BIT_IMAGE};
use crate::installer::ResourceInstaller;
use crate::observability::metrics;
use crate::resources::kubeconfig::shoot_access_secret;
use crate::resources::{seed_objects, shoot_objects, ResourceSet, SeedInputs, ShootInputs};
use crate::secrets::{Credential, CredentialGraph, CredentialKind, SecretsError, SecretsManager};

/// DNS names a service is reachable under from inside the cluster
pub fn dns_names_for_service(name: &str, namespace: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("{name}.{namespace}"),
        format!("{name}.{namespace}.svc"),
        format!("{name}.{namespace}.svc.cluster.local"),
    ]
}

/// The audittailer chain: one authority signing a server and a client certificate
pub fn audittailer_credentials() -> Result<CredentialGraph, SecretsError> {
    let dns_names = dns_names_for_service(AUDITTAILER_NAME, AUDITTAILER_NAMESPACE);

    let mut builder = CredentialGraph::builder();
    let ca = builder.add_ca(CA_NAME, CA_NAME);
    builder
        .add_signed(
            SERVER_CERT_NAME,
            AUDITTAILER_NAME,
            dns_names.clone(),
            CredentialKind::ServerCert,
            &ca,
        )
        .add_signed(
            CLIENT_CERT_NAME,
            AUDITTAILER_NAME,
            dns_names,
            CredentialKind::ClientCert,
            &ca,
        );
    builder.build()
}

/// Both resource sets of one shoot, fully built
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub config: ResolvedAuditConfig,
    pub shoot: ResourceSet,
    pub seed: ResourceSet,
}

pub struct Actuator {
    secrets: SecretsManager,
    installer: Arc<dyn ResourceInstaller>,
    images: ImageVector,
    defaults: AuditDefaults,
    wait: WaitOptions,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("images", &self.images)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    pub fn new(secrets: SecretsManager, installer: Arc<dyn ResourceInstaller>) -> Self {
        Self {
            secrets,
            installer,
            images: ImageVector::default(),
            defaults: AuditDefaults::default(),
            wait: WaitOptions::default(),
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: ImageVector) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: AuditDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Install or update the audit pipeline of a shoot
    pub async fn reconcile(
        &self,
        provider_config: Option<&serde_json::Value>,
        cluster: &ClusterContext,
    ) -> Result<(), ActuatorError> {
        instrumented(OperationType::Reconcile, cluster, async {
            let desired = self.desired_state(provider_config, cluster).await?;
            self.install(cluster, &desired).await
        })
        .await
    }

    /// Remove the audit pipeline and wait until it is gone
    pub async fn delete(&self, cluster: &ClusterContext) -> Result<(), ActuatorError> {
        instrumented(OperationType::Delete, cluster, async {
            let namespace = cluster.namespace.as_str();
            info!(namespace = %namespace, "deleting managed resources for audit extension");

            self.installer
                .remove_set(namespace, SHOOT_AUDIT_RESOURCE_NAME)
                .await?;
            self.installer
                .remove_set(namespace, SEED_AUDIT_RESOURCE_NAME)
                .await?;

            let result = wait_until_removed(
                self.installer.as_ref(),
                namespace,
                &[SHOOT_AUDIT_RESOURCE_NAME, SEED_AUDIT_RESOURCE_NAME],
                self.wait,
            )
            .await
            .map_err(ActuatorError::from);

            if let Err(ActuatorError::Timeout { .. }) = &result {
                metrics::increment_delete_timeouts_total();
            }
            result
        })
        .await
    }

    /// Re-derive and reinstall the desired state after a control plane move
    pub async fn restore(
        &self,
        provider_config: Option<&serde_json::Value>,
        cluster: &ClusterContext,
    ) -> Result<(), ActuatorError> {
        instrumented(OperationType::Restore, cluster, async {
            let desired = self.desired_state(provider_config, cluster).await?;
            self.install(cluster, &desired).await
        })
        .await
    }

    /// Nothing to migrate; state is re-derived on restore
    pub async fn migrate(&self, cluster: &ClusterContext) -> Result<(), ActuatorError> {
        instrumented(OperationType::Migrate, cluster, async { Ok(()) }).await
    }

    /// Build both resource sets without installing them
    ///
    /// Generates (or reuses) the audittailer credentials as a side effect.
    pub async fn desired_state(
        &self,
        provider_config: Option<&serde_json::Value>,
        cluster: &ClusterContext,
    ) -> Result<DesiredState, ActuatorError> {
        let namespace = cluster.namespace.as_str();

        let config = AuditConfig::decode(provider_config)?.with_defaults(&self.defaults);
        let storage_size = config.storage_size()?;
        debug!(
            namespace = %namespace,
            size = %config.persistence_size,
            log = config.backends.log,
            cluster_forwarding = config.backends.cluster_forwarding,
            "resolved audit config"
        );

        let audittailer_image = self.images.find_image(AUDITTAILER_IMAGE)?;
        let fluent_bit_image = self.images.find_image(FLUENT_BIT_IMAGE)?;
        let forwarder_image = if config.backends.cluster_forwarding {
            Some(self.images.find_image(AUDIT_FORWARDER_IMAGE)?)
        } else {
            None
        };

        let credentials = self
            .secrets
            .generate_all(namespace, &audittailer_credentials()?)
            .await?;
        let server = credential(&credentials, SERVER_CERT_NAME)?;
        let client = credential(&credentials, CLIENT_CERT_NAME)?;

        let composition = compose_backends(
            &config.backends,
            &ForwardingContext {
                namespace,
                generic_kubeconfig_secret_name: &cluster.generic_kubeconfig_secret_name,
                client_credential: client,
                forwarder_image,
            },
        );

        let shoot = shoot_objects(ShootInputs {
            audittailer_image,
            server_credential: server,
            client_credential: client,
        })?;
        let seed = seed_objects(SeedInputs {
            namespace,
            config: &config,
            storage_size,
            fluent_bit_image,
            composition,
        })?;

        Ok(DesiredState { config, shoot, seed })
    }

    async fn install(
        &self,
        cluster: &ClusterContext,
        desired: &DesiredState,
    ) -> Result<(), ActuatorError> {
        let namespace = cluster.namespace.as_str();

        // The forwarder's token secret lives next to the extension so the
        // token requestor can keep it filled; it is never part of a slot.
        self.installer
            .apply_secret(namespace, &shoot_access_secret(FORWARDER_NAME, namespace))
            .await?;

        let (shoot, seed) = tokio::join!(
            self.installer.install_set(namespace, &desired.shoot),
            self.installer.install_set(namespace, &desired.seed),
        );
        shoot?;
        seed?;
        Ok(())
    }
}

fn credential<'a>(
    credentials: &'a BTreeMap<String, Credential>,
    name: &str,
) -> Result<&'a Credential, SecretsError> {
    credentials.get(name).ok_or_else(|| SecretsError::Corrupt {
        name: name.to_string(),
        reason: "credential was not generated".to_string(),
    })
}

/// Count, time and log one actuator operation
async fn instrumented<F>(
    operation: OperationType,
    cluster: &ClusterContext,
    fut: F,
) -> Result<(), ActuatorError>
where
    F: Future<Output = Result<(), ActuatorError>>,
{
    let op = operation.to_string().to_lowercase();
    let start = Instant::now();
    metrics::increment_operations(&op);

    let result = fut.await;
    metrics::observe_operation_duration(&op, start.elapsed().as_secs_f64());

    match &result {
        Ok(()) => info!(
            namespace = %cluster.namespace,
            operation = %operation,
            "audit extension operation succeeded"
        ),
        Err(e) => {
            let kind = e.kind();
            metrics::increment_operation_errors(&op, kind.as_str());
            if kind == ErrorKind::Timeout {
                warn!(
                    namespace = %cluster.namespace,
                    operation = %operation,
                    error = %e,
                    "audit extension operation timed out"
                );
            } else {
                error!(
                    namespace = %cluster.namespace,
                    operation = %operation,
                    kind = %kind,
                    error = %e,
                    "audit extension operation failed"
                );
            }
        }
    }
    result
}
