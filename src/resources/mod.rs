//! # Resource sets
//!
//! The objects installed for one audit extension, grouped per target cluster.
//!
//! - `seed`: webhook backend (fluent-bit) in the shoot's control plane namespace
//! - `shoot`: audittailer in the shoot's `audit` namespace
//! - `kubeconfig`: the kubeconfig the kube-apiserver uses to reach the webhook
//!
//! A [`ResourceSet`] is rebuilt in full on every reconciliation and handed to the
//! installer as a whole.

pub mod kubeconfig;
pub mod seed;
pub mod shoot;

pub use seed::{seed_objects, SeedInputs};
pub use shoot::{shoot_objects, ShootInputs};

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{kind} {namespace}/{name} is already part of resource set {slot}")]
    Duplicate {
        slot: String,
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("failed to serialize {kind} {name}")]
    Serialize {
        kind: String,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to build {what}")]
    Build {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Any object that can be part of a [`ResourceSet`]
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Namespace(Namespace),
    ConfigMap(ConfigMap),
    Secret(Secret),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    NetworkPolicy(NetworkPolicy),
    Role(Role),
    RoleBinding(RoleBinding),
}

macro_rules! managed_object_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for ManagedObject {
                fn from(obj: $variant) -> Self {
                    ManagedObject::$variant(obj)
                }
            }
        )*

        impl ManagedObject {
            pub fn kind(&self) -> &'static str {
                match self {
                    $(ManagedObject::$variant(_) => <$variant as Resource>::KIND,)*
                }
            }

            pub fn metadata(&self) -> &ObjectMeta {
                match self {
                    $(ManagedObject::$variant(obj) => &obj.metadata,)*
                }
            }

            /// Render as a YAML manifest including `apiVersion` and `kind`
            pub fn to_manifest(&self) -> Result<String, ResourceError> {
                let rendered = match self {
                    $(ManagedObject::$variant(obj) => serde_yaml::to_string(obj),)*
                };
                rendered.map_err(|source| ResourceError::Serialize {
                    kind: self.kind().to_string(),
                    name: self.name().to_string(),
                    source,
                })
            }
        }
    };
}

managed_object_from!(
    Namespace,
    ConfigMap,
    Secret,
    Service,
    StatefulSet,
    Deployment,
    NetworkPolicy,
    Role,
    RoleBinding,
);

impl ManagedObject {
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Empty for cluster scoped objects
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// File name of the rendered manifest: `<kind>__<namespace>__<name>.yaml`
    pub fn file_name(&self) -> String {
        format!(
            "{}__{}__{}.yaml",
            self.kind().to_lowercase(),
            self.namespace(),
            self.name()
        )
    }
}

/// Cluster a resource set is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The management cluster hosting the shoot's control plane
    Seed,
    /// The tenant cluster
    Shoot,
}

/// Objects destined for one managed resource slot
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSet {
    slot: String,
    target: Target,
    objects: Vec<ManagedObject>,
    keys: BTreeSet<(String, String, String)>,
}

impl ResourceSet {
    pub fn new(slot: impl Into<String>, target: Target) -> Self {
        Self {
            slot: slot.into(),
            target,
            objects: Vec::new(),
            keys: BTreeSet::new(),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Add an object; fails if one with the same kind, namespace and name exists
    pub fn push(&mut self, obj: impl Into<ManagedObject>) -> Result<(), ResourceError> {
        let obj = obj.into();
        let key = (
            obj.kind().to_string(),
            obj.namespace().to_string(),
            obj.name().to_string(),
        );
        if !self.keys.insert(key) {
            return Err(ResourceError::Duplicate {
                slot: self.slot.clone(),
                kind: obj.kind().to_string(),
                namespace: obj.namespace().to_string(),
                name: obj.name().to_string(),
            });
        }
        self.objects.push(obj);
        Ok(())
    }

    pub fn extend<I>(&mut self, objects: I) -> Result<(), ResourceError>
    where
        I: IntoIterator,
        I::Item: Into<ManagedObject>,
    {
        objects.into_iter().try_for_each(|obj| self.push(obj))
    }

    pub fn objects(&self) -> &[ManagedObject] {
        &self.objects
    }

    /// First object of `kind` named `name`
    pub fn find(&self, kind: &str, name: &str) -> Option<&ManagedObject> {
        self.objects
            .iter()
            .find(|o| o.kind() == kind && o.name() == name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Render every object to a manifest, keyed by [`ManagedObject::file_name`]
    pub fn render(&self) -> Result<BTreeMap<String, String>, ResourceError> {
        self.objects
            .iter()
            .map(|obj| Ok((obj.file_name(), obj.to_manifest()?)))
            .collect()
    }
}

/// `ObjectMeta` with name and optional namespace
pub(crate) fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

pub(crate) fn labels<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
