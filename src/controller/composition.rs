//! # Backend Composition
//!
//! Decides what each enabled audit backend contributes to the seed resource
//! set: a fluent-bit output file included by the main config, and for cluster
//! forwarding the gateway deployment with its credentials.
//!
//! Every backend writes its own `*.backend.conf`, so enabling both never lets
//! one output replace the other.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;

use crate::constants::{
    AUDITTAILER_NAME, AUDITTAILER_NAMESPACE, FORWARDER_NAME, FORWARDER_PORT,
    GENERIC_KUBECONFIG_MOUNT_PATH,
};
use crate::crd::Backends;
use crate::fluentbit::{Config, Output};
use crate::resources::kubeconfig::{inject_generic_kubeconfig, shoot_access_secret_name};
use crate::resources::{labels, meta, ManagedObject};
use crate::secrets::Credential;

/// Output file of the log backend
pub const LOG_BACKEND_FILE: &str = "log.backend.conf";

/// Output file of the cluster forwarding backend
pub const CLUSTER_FORWARDING_BACKEND_FILE: &str = "cluster-forwarding.backend.conf";

/// Where fluent-bit finds the forwarding client certificate
pub const CLUSTER_FORWARDING_CERTS_PATH: &str = "/certs/cluster-forwarding";

const CLUSTER_FORWARDING_CERTS_VOLUME: &str = "cluster-forwarding-certs";

/// Tag the webhook backend assigns to audit records
const AUDIT_MATCH: &str = "audit";

/// Facts the forwarding backend needs about the cluster
#[derive(Debug, Clone)]
pub struct ForwardingContext<'a> {
    pub namespace: &'a str,
    pub generic_kubeconfig_secret_name: &'a str,
    /// Client certificate fluent-bit and the gateway authenticate with
    pub client_credential: &'a Credential,
    pub forwarder_image: Option<&'a str>,
}

/// A secret volume the fluent-bit pods must mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    pub volume_name: String,
    pub secret_name: String,
    pub mount_path: String,
}

/// Everything the enabled backends add to the seed resource set
#[derive(Debug, Clone, Default)]
pub struct BackendComposition {
    /// fluent-bit config fragments by file name
    pub config_files: BTreeMap<String, String>,
    pub objects: Vec<ManagedObject>,
    pub secret_mounts: Vec<SecretMount>,
}

pub fn compose_backends(backends: &Backends, ctx: &ForwardingContext<'_>) -> BackendComposition {
    let mut composition = BackendComposition::default();

    if backends.log {
        composition
            .config_files
            .insert(LOG_BACKEND_FILE.to_string(), log_output());
    }

    if backends.cluster_forwarding {
        composition.config_files.insert(
            CLUSTER_FORWARDING_BACKEND_FILE.to_string(),
            cluster_forwarding_output(),
        );

        composition.objects.push(
            credential_secret(ctx.client_credential, ctx.namespace).into(),
        );
        composition.objects.push(
            forwarder_deployment(
                ctx,
                &shoot_access_secret_name(FORWARDER_NAME),
            )
            .into(),
        );
        composition.secret_mounts.push(SecretMount {
            volume_name: CLUSTER_FORWARDING_CERTS_VOLUME.to_string(),
            secret_name: ctx.client_credential.secret_name.clone(),
            mount_path: CLUSTER_FORWARDING_CERTS_PATH.to_string(),
        });
    }

    composition
}

fn log_output() -> String {
    Config {
        output: vec![Output::new()
            .with("Name", "stdout")
            .with("Match", AUDIT_MATCH)],
        ..Default::default()
    }
    .generate()
}

fn cluster_forwarding_output() -> String {
    Config {
        output: vec![Output::new()
            .with("Name", "forward")
            .with("Match", AUDIT_MATCH)
            .with("Host", FORWARDER_NAME)
            .with("Port", FORWARDER_PORT.to_string())
            .with("Require_ack_response", "True")
            .with("Compress", "gzip")
            .with("tls", "On")
            .with("tls.verify", "On")
            .with("tls.debug", "2")
            .with("tls.ca_file", format!("{CLUSTER_FORWARDING_CERTS_PATH}/ca.crt"))
            .with("tls.crt_file", format!("{CLUSTER_FORWARDING_CERTS_PATH}/tls.crt"))
            .with("tls.key_file", format!("{CLUSTER_FORWARDING_CERTS_PATH}/tls.key"))
            .with("tls.vhost", AUDITTAILER_NAME)],
        ..Default::default()
    }
    .generate()
}

/// The credential as a `Secret` named by its content checksum
pub fn credential_secret(credential: &Credential, namespace: &str) -> Secret {
    Secret {
        metadata: meta(&credential.secret_name, Some(namespace)),
        type_: Some("Opaque".to_string()),
        data: Some(
            credential
                .data
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

fn forwarder_deployment(ctx: &ForwardingContext<'_>, access_secret_name: &str) -> Deployment {
    let selector = labels([("app", FORWARDER_NAME)]);
    let env = [
        ("AUDIT_KUBECFG", format!("{GENERIC_KUBECONFIG_MOUNT_PATH}/kubeconfig")),
        ("AUDIT_NAMESPACE", AUDITTAILER_NAMESPACE.to_string()),
        ("AUDIT_SERVICE_NAME", AUDITTAILER_NAME.to_string()),
        ("AUDIT_SECRET_NAME", ctx.client_credential.secret_name.clone()),
        ("AUDIT_TLS_CA_FILE", "ca.crt".to_string()),
        ("AUDIT_TLS_CRT_FILE", "tls.crt".to_string()),
        ("AUDIT_TLS_KEY_FILE", "tls.key".to_string()),
        ("AUDIT_TLS_VHOST", AUDITTAILER_NAME.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect();

    let mut deployment = Deployment {
        metadata: meta(FORWARDER_NAME, Some(ctx.namespace)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels([
                        ("app", FORWARDER_NAME),
                        ("networking.gardener.cloud/to-dns", "allowed"),
                        ("networking.gardener.cloud/to-shoot-apiserver", "allowed"),
                    ])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "audit-forwarder".to_string(),
                        image: ctx.forwarder_image.map(str::to_string),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    inject_generic_kubeconfig(
        &mut deployment,
        ctx.generic_kubeconfig_secret_name,
        access_secret_name,
    );
    deployment
}
