//! # Installer
//!
//! Hands resource sets to gardener's resource manager. Each slot becomes a
//! `Secret` holding the rendered manifests plus a `ManagedResource` pointing at
//! it; the resource manager applies them to the seed or the shoot and removes
//! them again once the `ManagedResource` is deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{Api, ApiResource, DeleteParams, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    Client,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, SHOOT_RESOURCE_ORIGIN};
use crate::observability::metrics;
use crate::resources::{ResourceError, ResourceSet, Target};

const FIELD_MANAGER: &str = "audit-extension";
const MANAGED_RESOURCE_SECRET_PREFIX: &str = "managedresource-";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to render resource set {slot}")]
    Render {
        slot: String,
        #[source]
        source: ResourceError,
    },

    #[error("failed to {action} managed resource {slot}")]
    Api {
        slot: String,
        action: &'static str,
        #[source]
        source: kube::Error,
    },

    #[error("failed to apply secret {name}")]
    Secret {
        name: String,
        #[source]
        source: kube::Error,
    },
}

#[async_trait]
pub trait ResourceInstaller: Send + Sync {
    /// Create or replace the slot named by `set.slot()`
    async fn install_set(&self, namespace: &str, set: &ResourceSet) -> Result<(), InstallError>;

    /// Request removal of `slot`; succeeds if it does not exist
    async fn remove_set(&self, namespace: &str, slot: &str) -> Result<(), InstallError>;

    /// True once `slot` and everything it deployed is gone
    async fn is_removed(&self, namespace: &str, slot: &str) -> Result<bool, InstallError>;

    /// Apply `secret` in the seed namespace directly, outside of any slot
    ///
    /// Only the fields set on `secret` are owned; data written by other
    /// controllers (the token requestor filling in `token`) is left alone.
    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), InstallError>;
}

/// Name of the secret carrying the manifests of `slot`
pub fn managed_resource_secret_name(slot: &str) -> String {
    format!("{MANAGED_RESOURCE_SECRET_PREFIX}{slot}")
}

/// Installs slots as gardener `ManagedResource`s
#[derive(Clone)]
pub struct ManagedResourceInstaller {
    client: Client,
    resource: ApiResource,
}

impl std::fmt::Debug for ManagedResourceInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedResourceInstaller").finish_non_exhaustive()
    }
}

impl ManagedResourceInstaller {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind {
            group: "resources.gardener.cloud".to_string(),
            version: "v1alpha1".to_string(),
            kind: "ManagedResource".to_string(),
        };
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn managed_resources(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// The `Secret` holding every rendered manifest of a set
pub fn manifest_secret(
    namespace: &str,
    slot: &str,
    manifests: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(managed_resource_secret_name(slot)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            manifests
                .into_iter()
                .map(|(file, manifest)| (file, ByteString(manifest.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Body of the `ManagedResource` for a set
pub fn managed_resource_spec(slot: &str, target: Target) -> serde_json::Value {
    let mut spec = json!({
        "secretRefs": [{ "name": managed_resource_secret_name(slot) }],
        "keepObjects": false,
    });
    match target {
        Target::Seed => {
            spec["class"] = json!("seed");
        }
        Target::Shoot => {
            spec["injectLabels"] = json!({ "shoot.gardener.cloud/no-cleanup": "true" });
        }
    }
    spec
}

#[async_trait]
impl ResourceInstaller for ManagedResourceInstaller {
    async fn install_set(&self, namespace: &str, set: &ResourceSet) -> Result<(), InstallError> {
        let slot = set.slot();
        let manifests = set.render().map_err(|source| InstallError::Render {
            slot: slot.to_string(),
            source,
        })?;
        let count = manifests.len();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let api_error = |action, source| InstallError::Api {
            slot: slot.to_string(),
            action,
            source,
        };

        let secret = manifest_secret(namespace, slot, manifests);
        self.secrets(namespace)
            .patch(
                &managed_resource_secret_name(slot),
                &params,
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| api_error("write manifests of", e))?;

        let mut labels = BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )]);
        if set.target() == Target::Shoot {
            labels.insert("origin".to_string(), SHOOT_RESOURCE_ORIGIN.to_string());
        }

        let mut managed_resource = DynamicObject::new(slot, &self.resource)
            .within(namespace)
            .data(json!({ "spec": managed_resource_spec(slot, set.target()) }));
        managed_resource.metadata.labels = Some(labels);

        self.managed_resources(namespace)
            .patch(slot, &params, &Patch::Apply(&managed_resource))
            .await
            .map_err(|e| api_error("apply", e))?;

        metrics::increment_managed_resources_applied_total();
        info!(
            slot = %slot,
            namespace = %namespace,
            objects = count,
            "managed resource created successfully"
        );
        Ok(())
    }

    async fn remove_set(&self, namespace: &str, slot: &str) -> Result<(), InstallError> {
        let api_error = |source| InstallError::Api {
            slot: slot.to_string(),
            action: "delete",
            source,
        };

        match self
            .managed_resources(namespace)
            .delete(slot, &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(slot = %slot, namespace = %namespace, "managed resource already absent");
            }
            Err(e) => return Err(api_error(e)),
        }

        match self
            .secrets(namespace)
            .delete(&managed_resource_secret_name(slot), &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(api_error(e)),
        }

        metrics::increment_managed_resources_deleted_total();
        info!(slot = %slot, namespace = %namespace, "deletion of managed resource requested");
        Ok(())
    }

    async fn is_removed(&self, namespace: &str, slot: &str) -> Result<bool, InstallError> {
        let existing = self
            .managed_resources(namespace)
            .get_opt(slot)
            .await
            .map_err(|source| InstallError::Api {
                slot: slot.to_string(),
                action: "look up",
                source,
            })?;
        Ok(existing.is_none())
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), InstallError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets(namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await
            .map_err(|source| InstallError::Secret {
                name: name.clone(),
                source,
            })?;

        debug!(secret = %name, namespace = %namespace, "applied secret");
        Ok(())
    }
}
