//! Shoot resource set: the audittailer.
//!
//! A fluentd instance in the shoot's `audit` namespace that receives forwarded
//! audit records over mutually authenticated TLS and prints them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, Namespace, PodSpec, PodTemplateSpec, ResourceRequirements, SeccompProfile,
    SecretVolumeSource, SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{labels, meta, ResourceError, ResourceSet, Target};
use crate::constants::{
    AUDITTAILER_NAME, AUDITTAILER_NAMESPACE, AUDITTAILER_PORT, SHOOT_AUDIT_RESOURCE_NAME,
};
use crate::controller::composition::credential_secret;
use crate::secrets::Credential;

pub const AUDITTAILER_CONFIG_MAP_NAME: &str = "audittailer-config";

const FLUENTD_CONFIG: &str = r#"<source>
  @type forward
  port 24224
  bind 0.0.0.0
  <transport tls>
    ca_path                   /fluentd/etc/ssl/ca.crt
    cert_path                 /fluentd/etc/ssl/tls.crt
    private_key_path          /fluentd/etc/ssl/tls.key
    client_cert_auth          true
  </transport>
</source>
<match **>
  @type stdout
  <buffer>
    @type file
    path /fluentbuffer/auditlog-*
    chunk_limit_size          256Mb
  </buffer>
  <format>
    @type json
  </format>
</match>
"#;

#[derive(Debug, Clone)]
pub struct ShootInputs<'a> {
    pub audittailer_image: &'a str,
    /// Mounted into the audittailer
    pub server_credential: &'a Credential,
    /// Looked up by the cluster forwarder through the shoot API
    pub client_credential: &'a Credential,
}

pub fn shoot_objects(inputs: ShootInputs<'_>) -> Result<ResourceSet, ResourceError> {
    let mut set = ResourceSet::new(SHOOT_AUDIT_RESOURCE_NAME, Target::Shoot);

    set.push(Namespace {
        metadata: ObjectMeta {
            name: Some(AUDITTAILER_NAMESPACE.to_string()),
            labels: Some(labels([("k8s-app", AUDITTAILER_NAME)])),
            ..Default::default()
        },
        ..Default::default()
    })?;

    set.push(ConfigMap {
        metadata: ObjectMeta {
            labels: Some(labels([("app.kubernetes.io/name", AUDITTAILER_NAME)])),
            ..meta(AUDITTAILER_CONFIG_MAP_NAME, Some(AUDITTAILER_NAMESPACE))
        },
        data: Some(BTreeMap::from([(
            "fluent.conf".to_string(),
            FLUENTD_CONFIG.to_string(),
        )])),
        ..Default::default()
    })?;

    set.push(credential_secret(inputs.server_credential, AUDITTAILER_NAMESPACE))?;
    set.push(credential_secret(inputs.client_credential, AUDITTAILER_NAMESPACE))?;
    set.push(audittailer_deployment(
        inputs.audittailer_image,
        &inputs.server_credential.secret_name,
    ))?;

    set.push(Service {
        metadata: ObjectMeta {
            labels: Some(labels([("app", AUDITTAILER_NAME)])),
            ..meta(AUDITTAILER_NAME, Some(AUDITTAILER_NAMESPACE))
        },
        spec: Some(ServiceSpec {
            selector: Some(labels([("app", AUDITTAILER_NAME)])),
            ports: Some(vec![ServicePort {
                port: AUDITTAILER_PORT,
                target_port: Some(IntOrString::Int(AUDITTAILER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })?;

    set.push(Role {
        metadata: meta(AUDITTAILER_NAME, Some(AUDITTAILER_NAMESPACE)),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["services".to_string(), "secrets".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..Default::default()
        }]),
    })?;

    set.push(RoleBinding {
        metadata: meta(AUDITTAILER_NAME, Some(AUDITTAILER_NAMESPACE)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: AUDITTAILER_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: "audittailer-client".to_string(),
            namespace: Some("kube-system".to_string()),
            ..Default::default()
        }]),
    })?;

    Ok(set)
}

fn resources(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn audittailer_deployment(image: &str, server_secret_name: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels([("k8s-app", AUDITTAILER_NAME)])),
            ..meta(AUDITTAILER_NAME, Some(AUDITTAILER_NAMESPACE))
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels([("k8s-app", AUDITTAILER_NAME)])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels([
                        ("k8s-app", AUDITTAILER_NAME),
                        ("app", AUDITTAILER_NAME),
                    ])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    automount_service_account_token: Some(false),
                    restart_policy: Some("Always".to_string()),
                    containers: vec![Container {
                        name: AUDITTAILER_NAME.to_string(),
                        image: Some(image.to_string()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        // Limits fluentd memory usage
                        env: Some(vec![EnvVar {
                            name: "RUBY_GC_HEAP_OLDOBJECT_LIMIT_FACTOR".to_string(),
                            value: Some("1.2".to_string()),
                            ..Default::default()
                        }]),
                        ports: Some(vec![ContainerPort {
                            container_port: AUDITTAILER_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "fluentd-config".to_string(),
                                mount_path: "/fluentd/etc".to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "fluentd-certs".to_string(),
                                mount_path: "/fluentd/etc/ssl".to_string(),
                                read_only: Some(true),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "fluentbuffer".to_string(),
                                mount_path: "/fluentbuffer".to_string(),
                                ..Default::default()
                            },
                        ]),
                        resources: Some(ResourceRequirements {
                            requests: Some(resources("100m", "200Mi")),
                            limits: Some(resources("150m", "512Mi")),
                            ..Default::default()
                        }),
                        security_context: Some(SecurityContext {
                            run_as_user: Some(65534),
                            allow_privilege_escalation: Some(false),
                            seccomp_profile: Some(SeccompProfile {
                                type_: "RuntimeDefault".to_string(),
                                ..Default::default()
                            }),
                            capabilities: Some(Capabilities {
                                drop: Some(vec!["ALL".to_string()]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "fluentd-config".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: AUDITTAILER_CONFIG_MAP_NAME.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "fluentd-certs".to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(server_secret_name.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "fluentbuffer".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
