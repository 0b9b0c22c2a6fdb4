//! Seed resource set: the audit webhook backend.
//!
//! The kube-apiserver posts audit events to a fluent-bit StatefulSet running in
//! the shoot's control plane namespace. Enabled backends decide where fluent-bit
//! ships them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;

use super::kubeconfig::webhook_kubeconfig;
use super::{labels, meta, ResourceError, ResourceSet, Target};
use crate::constants::{SEED_AUDIT_RESOURCE_NAME, WEBHOOK_BACKEND_NAME, WEBHOOK_BACKEND_PORT};
use crate::controller::composition::BackendComposition;
use crate::crd::ResolvedAuditConfig;
use crate::fluentbit::{Config, Input};

pub const WEBHOOK_CONFIG_SECRET_NAME: &str = "audit-webhook-config";
pub const WEBHOOK_CONFIG_KEY: &str = "audit-webhook-config.yaml";
pub const AUDIT_POLICY_CONFIG_MAP_NAME: &str = "audit-policy";
pub const AUDIT_POLICY_KEY: &str = "audit-policy.yaml";
pub const FLUENT_BIT_CONFIG_MAP_NAME: &str = "fluent-bit-config";
pub const FLUENT_BIT_CONFIG_KEY: &str = "fluent-bit.conf";

const WEBHOOK_BACKEND_REPLICAS: i32 = 2;
const DATA_VOLUME_NAME: &str = "audit-data";
const CONFIG_VOLUME_NAME: &str = "config";

/// Everything the seed set is built from
#[derive(Debug, Clone)]
pub struct SeedInputs<'a> {
    pub namespace: &'a str,
    pub config: &'a ResolvedAuditConfig,
    pub storage_size: Quantity,
    pub fluent_bit_image: &'a str,
    pub composition: BackendComposition,
}

pub fn seed_objects(inputs: SeedInputs<'_>) -> Result<ResourceSet, ResourceError> {
    let SeedInputs {
        namespace,
        config,
        storage_size,
        fluent_bit_image,
        composition,
    } = inputs;

    let kubeconfig = webhook_kubeconfig(namespace).map_err(|source| ResourceError::Serialize {
        kind: "Secret".to_string(),
        name: WEBHOOK_CONFIG_SECRET_NAME.to_string(),
        source,
    })?;

    let mut set = ResourceSet::new(SEED_AUDIT_RESOURCE_NAME, Target::Seed);

    set.push(Secret {
        metadata: meta(WEBHOOK_CONFIG_SECRET_NAME, Some(namespace)),
        string_data: Some(BTreeMap::from([(WEBHOOK_CONFIG_KEY.to_string(), kubeconfig)])),
        ..Default::default()
    })?;

    set.push(ConfigMap {
        metadata: meta(AUDIT_POLICY_CONFIG_MAP_NAME, Some(namespace)),
        data: Some(BTreeMap::from([(
            AUDIT_POLICY_KEY.to_string(),
            config.audit_policy.clone(),
        )])),
        ..Default::default()
    })?;

    set.push(fluent_bit_config_map(namespace, &composition.config_files))?;
    set.push(webhook_service(namespace))?;
    set.push(webhook_statefulset(
        namespace,
        config,
        storage_size,
        fluent_bit_image,
        &composition,
    ))?;
    set.extend(network_policies(namespace)?)?;
    set.extend(composition.objects)?;

    Ok(set)
}

/// Main fluent-bit config; outputs come from the included backend files
pub fn fluent_bit_main_config() -> String {
    Config {
        input: vec![Input::new()
            .with("Name", "http")
            .with("Listen", "0.0.0.0")
            .with("Port", WEBHOOK_BACKEND_PORT.to_string())],
        includes: vec!["*.backend.conf".to_string()],
        ..Default::default()
    }
    .generate()
}

fn fluent_bit_config_map(namespace: &str, backend_files: &BTreeMap<String, String>) -> ConfigMap {
    let mut data = backend_files.clone();
    data.insert(FLUENT_BIT_CONFIG_KEY.to_string(), fluent_bit_main_config());

    ConfigMap {
        metadata: meta(FLUENT_BIT_CONFIG_MAP_NAME, Some(namespace)),
        data: Some(data),
        ..Default::default()
    }
}

fn webhook_service(namespace: &str) -> Service {
    Service {
        metadata: meta(WEBHOOK_BACKEND_NAME, Some(namespace)),
        spec: Some(ServiceSpec {
            selector: Some(labels([("app", WEBHOOK_BACKEND_NAME)])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: WEBHOOK_BACKEND_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn webhook_statefulset(
    namespace: &str,
    config: &ResolvedAuditConfig,
    storage_size: Quantity,
    image: &str,
    composition: &BackendComposition,
) -> StatefulSet {
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: FLUENT_BIT_CONFIG_MAP_NAME.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![
        VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: "/config".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: DATA_VOLUME_NAME.to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        },
    ];

    for mount in &composition.secret_mounts {
        volumes.push(Volume {
            name: mount.volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(mount.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: mount.volume_name.clone(),
            mount_path: mount.mount_path.clone(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    StatefulSet {
        metadata: meta(WEBHOOK_BACKEND_NAME, Some(namespace)),
        spec: Some(StatefulSetSpec {
            replicas: Some(WEBHOOK_BACKEND_REPLICAS),
            service_name: Some(WEBHOOK_BACKEND_NAME.to_string()),
            selector: LabelSelector {
                match_labels: Some(labels([("app", WEBHOOK_BACKEND_NAME)])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels([
                        ("app", WEBHOOK_BACKEND_NAME),
                        ("networking.gardener.cloud/from-prometheus", "allowed"),
                        ("networking.gardener.cloud/to-dns", "allowed"),
                        ("networking.gardener.cloud/to-public-networks", "allowed"),
                    ])),
                    annotations: Some(labels([(
                        "scheduler.alpha.kubernetes.io/critical-pod",
                        "",
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "fluent-bit".to_string(),
                        image: Some(image.to_string()),
                        args: Some(vec![
                            "--storage_path=/data".to_string(),
                            format!("--config=/config/{FLUENT_BIT_CONFIG_KEY}"),
                        ]),
                        volume_mounts: Some(mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME_NAME.to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: config.storage_class_name.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([("storage".to_string(), storage_size)])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn network_policies(namespace: &str) -> Result<Vec<NetworkPolicy>, ResourceError> {
    let apiserver = json!({ "app": "kubernetes", "role": "apiserver" });
    let backend = json!({ "app": WEBHOOK_BACKEND_NAME });

    [
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {
                "name": "allow-to-audit-webhook-backend-from-kube-apiserver",
                "namespace": namespace,
            },
            "spec": {
                "podSelector": { "matchLabels": backend },
                "ingress": [{ "from": [{ "podSelector": { "matchLabels": apiserver } }] }],
                "policyTypes": ["Ingress"],
            },
        }),
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {
                "name": "allow-from-kube-apiserver-to-audit-webhook-backend",
                "namespace": namespace,
            },
            "spec": {
                "podSelector": { "matchLabels": apiserver },
                "egress": [{ "to": [{ "podSelector": { "matchLabels": backend } }] }],
                "policyTypes": ["Egress"],
            },
        }),
    ]
    .into_iter()
    .map(|value| {
        serde_json::from_value(value).map_err(|source| ResourceError::Build {
            what: "network policy".to_string(),
            source,
        })
    })
    .collect()
}
