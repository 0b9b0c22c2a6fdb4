//! Kubeconfig plumbing.
//!
//! The webhook kubeconfig tells the kube-apiserver where to send audit events.
//! Seed deployments that talk to the shoot get the generic token kubeconfig
//! injected together with a shoot access token secret.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    KeyToPath, ProjectedVolumeSource, Secret, SecretProjection, Volume, VolumeMount,
    VolumeProjection,
};
use serde::Serialize;

use super::{labels, meta};
use crate::constants::{
    GENERIC_KUBECONFIG_MOUNT_PATH, SHOOT_ACCESS_SECRET_PREFIX, WEBHOOK_BACKEND_NAME,
    WEBHOOK_BACKEND_PORT,
};

const KUBECONFIG_VOLUME_NAME: &str = "kubeconfig";

const CONTEXT_NAME: &str = "audit-webhook";

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    current_context: &'static str,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    users: Vec<NamedUser>,
    preferences: Preferences,
}

#[derive(Debug, Serialize)]
struct NamedCluster {
    name: &'static str,
    cluster: Cluster,
}

#[derive(Debug, Serialize)]
struct Cluster {
    server: String,
}

#[derive(Debug, Serialize)]
struct NamedContext {
    name: &'static str,
    context: Context,
}

#[derive(Debug, Serialize)]
struct Context {
    cluster: &'static str,
    user: &'static str,
}

#[derive(Debug, Serialize)]
struct NamedUser {
    name: &'static str,
    user: Preferences,
}

#[derive(Debug, Default, Serialize)]
struct Preferences {}

/// URL the kube-apiserver posts audit events to
pub fn webhook_url(namespace: &str) -> String {
    format!("http://{WEBHOOK_BACKEND_NAME}.{namespace}.svc.cluster.local:{WEBHOOK_BACKEND_PORT}/audit")
}

/// Render the webhook kubeconfig pointing at the backend in `namespace`
pub fn webhook_kubeconfig(namespace: &str) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&Kubeconfig {
        api_version: "v1",
        kind: "Config",
        current_context: CONTEXT_NAME,
        clusters: vec![NamedCluster {
            name: CONTEXT_NAME,
            cluster: Cluster {
                server: webhook_url(namespace),
            },
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME,
            context: Context {
                cluster: CONTEXT_NAME,
                user: CONTEXT_NAME,
            },
        }],
        users: vec![NamedUser {
            name: CONTEXT_NAME,
            user: Preferences::default(),
        }],
        preferences: Preferences::default(),
    })
}

/// Name of the shoot access secret for `service_account`
pub fn shoot_access_secret_name(service_account: &str) -> String {
    format!("{SHOOT_ACCESS_SECRET_PREFIX}{service_account}")
}

/// Token secret that gardener's token requestor fills for a shoot service account
pub fn shoot_access_secret(service_account: &str, namespace: &str) -> Secret {
    let mut metadata = meta(&shoot_access_secret_name(service_account), Some(namespace));
    metadata.labels = Some(labels([
        ("resources.gardener.cloud/purpose", "token-requestor"),
        ("resources.gardener.cloud/class", "shoot"),
    ]));
    metadata.annotations = Some(labels([
        ("serviceaccount.resources.gardener.cloud/name", service_account),
        ("serviceaccount.resources.gardener.cloud/namespace", "kube-system"),
    ]));

    Secret {
        metadata,
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Mount the generic kubeconfig plus the access token into every container
///
/// The kubeconfig lands at `<GENERIC_KUBECONFIG_MOUNT_PATH>/kubeconfig`.
pub fn inject_generic_kubeconfig(
    deployment: &mut Deployment,
    generic_kubeconfig_secret_name: &str,
    access_secret_name: &str,
) {
    let Some(pod) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
    else {
        return;
    };

    let projection = |secret: &str, key: &str| VolumeProjection {
        secret: Some(SecretProjection {
            name: secret.to_string(),
            items: Some(vec![KeyToPath {
                key: key.to_string(),
                path: key.to_string(),
                ..Default::default()
            }]),
            optional: Some(false),
        }),
        ..Default::default()
    };

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    volumes.retain(|v| v.name != KUBECONFIG_VOLUME_NAME);
    volumes.push(Volume {
        name: KUBECONFIG_VOLUME_NAME.to_string(),
        projected: Some(ProjectedVolumeSource {
            default_mode: Some(0o644),
            sources: Some(vec![
                projection(generic_kubeconfig_secret_name, "kubeconfig"),
                projection(access_secret_name, "token"),
            ]),
        }),
        ..Default::default()
    });

    for container in &mut pod.containers {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        mounts.retain(|m| m.name != KUBECONFIG_VOLUME_NAME);
        mounts.push(VolumeMount {
            name: KUBECONFIG_VOLUME_NAME.to_string(),
            mount_path: GENERIC_KUBECONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
}
