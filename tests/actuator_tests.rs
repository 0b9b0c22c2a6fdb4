//! Actuator integration tests
//!
//! Drive reconcile, delete, restore and migrate end to end against in-memory
//! collaborators and the real certificate issuer.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use audit_extension::constants::{
    CA_NAME, CLIENT_CERT_NAME, FORWARDER_NAME, SEED_AUDIT_RESOURCE_NAME, SERVER_CERT_NAME,
    SHOOT_AUDIT_RESOURCE_NAME,
};
use audit_extension::controller::composition::{CLUSTER_FORWARDING_BACKEND_FILE, LOG_BACKEND_FILE};
use audit_extension::crd::DEFAULT_AUDIT_POLICY;
use audit_extension::images::{ImageVector, AUDITTAILER_IMAGE};
use audit_extension::resources::seed::{AUDIT_POLICY_CONFIG_MAP_NAME, AUDIT_POLICY_KEY, FLUENT_BIT_CONFIG_MAP_NAME};
use audit_extension::resources::ManagedObject;
use audit_extension::secrets::store::CHECKSUM_ANNOTATION;
use audit_extension::{ActuatorError, ErrorKind};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use common::{cluster, Harness, RecordingInstaller, NAMESPACE};
use serde_json::json;

fn fluent_bit_files(harness: &Harness) -> Vec<String> {
    let seed = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .expect("seed slot installed");
    let Some(ManagedObject::ConfigMap(cm)) = seed.find("ConfigMap", FLUENT_BIT_CONFIG_MAP_NAME)
    else {
        panic!("fluent-bit config map missing");
    };
    cm.data.as_ref().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn test_reconcile_without_provider_config_applies_defaults() {
    let harness = Harness::new();

    harness.actuator.reconcile(None, &cluster()).await.unwrap();

    let slots: Vec<_> = harness.installer.slots(NAMESPACE).into_iter().collect();
    assert_eq!(slots, vec![SEED_AUDIT_RESOURCE_NAME, SHOOT_AUDIT_RESOURCE_NAME]);

    let seed = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .unwrap();

    let Some(ManagedObject::StatefulSet(sts)) = seed.find("StatefulSet", "audit-webhook-backend")
    else {
        panic!("webhook backend missing");
    };
    let claims = sts.spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap();
    let requests = claims[0]
        .spec
        .as_ref()
        .unwrap()
        .resources
        .as_ref()
        .unwrap()
        .requests
        .as_ref()
        .unwrap();
    assert_eq!(requests["storage"].0, "1Gi");

    let Some(ManagedObject::ConfigMap(policy)) = seed.find("ConfigMap", AUDIT_POLICY_CONFIG_MAP_NAME)
    else {
        panic!("audit policy missing");
    };
    assert_eq!(policy.data.as_ref().unwrap()[AUDIT_POLICY_KEY], DEFAULT_AUDIT_POLICY);

    let files = fluent_bit_files(&harness);
    assert!(files.contains(&LOG_BACKEND_FILE.to_string()));
    assert!(!files.contains(&CLUSTER_FORWARDING_BACKEND_FILE.to_string()));
    assert!(seed.find("Deployment", FORWARDER_NAME).is_none());

    let mut credentials = harness.store.names(NAMESPACE);
    credentials.sort();
    assert_eq!(credentials, vec![CLIENT_CERT_NAME, SERVER_CERT_NAME, CA_NAME]);
}

#[tokio::test]
async fn test_reconcile_with_cluster_forwarding_adds_gateway() {
    let harness = Harness::new();
    let config = json!({
        "apiVersion": "audit.metal-stack.io/v1alpha1",
        "kind": "AuditConfig",
        "persistence": { "size": "5Gi" },
        "backends": { "clusterForwarding": { "enabled": true } }
    });

    harness
        .actuator
        .reconcile(Some(&config), &cluster())
        .await
        .unwrap();

    let seed = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .unwrap();
    assert!(seed.find("Deployment", FORWARDER_NAME).is_some());

    // Backends given explicitly: only what is listed is enabled
    let files = fluent_bit_files(&harness);
    assert!(files.contains(&CLUSTER_FORWARDING_BACKEND_FILE.to_string()));
    assert!(!files.contains(&LOG_BACKEND_FILE.to_string()));

    // fluent-bit in the seed and the gateway use the same client certificate
    let client_secrets: Vec<_> = seed
        .objects()
        .iter()
        .filter(|o| o.kind() == "Secret" && o.name().starts_with("audittailer-client-"))
        .map(|o| o.name().to_string())
        .collect();
    assert_eq!(client_secrets.len(), 1);

    let shoot = harness
        .installer
        .installed(NAMESPACE, SHOOT_AUDIT_RESOURCE_NAME)
        .unwrap();
    assert!(shoot.find("Secret", &client_secrets[0]).is_some());
}

#[tokio::test]
async fn test_reconcile_applies_access_secret_outside_slots() {
    let harness = Harness::new();
    let access_secret = format!("shoot-access-{FORWARDER_NAME}");

    harness.actuator.reconcile(None, &cluster()).await.unwrap();

    let secret = harness
        .installer
        .applied_secret(NAMESPACE, &access_secret)
        .expect("access secret applied");
    let labels = secret.metadata.labels.unwrap();
    assert_eq!(labels["resources.gardener.cloud/purpose"], "token-requestor");
    // The token requestor owns the data
    assert!(secret.data.is_none());

    for slot in [SEED_AUDIT_RESOURCE_NAME, SHOOT_AUDIT_RESOURCE_NAME] {
        let set = harness.installer.installed(NAMESPACE, slot).unwrap();
        assert!(set.find("Secret", &access_secret).is_none());
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let harness = Harness::new();
    let config = json!({ "backends": { "log": { "enabled": true }, "clusterForwarding": { "enabled": true } } });

    harness
        .actuator
        .reconcile(Some(&config), &cluster())
        .await
        .unwrap();
    let first_seed = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .unwrap();
    let first_shoot = harness
        .installer
        .installed(NAMESPACE, SHOOT_AUDIT_RESOURCE_NAME)
        .unwrap();
    assert_eq!(harness.store.puts(), 3);

    harness
        .actuator
        .reconcile(Some(&config), &cluster())
        .await
        .unwrap();

    // Credentials are reused, so the content-addressed secret names are stable
    assert_eq!(harness.store.puts(), 3);
    assert_eq!(
        harness.installer.installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME),
        Some(first_seed.clone())
    );
    assert_eq!(
        harness.installer.installed(NAMESPACE, SHOOT_AUDIT_RESOURCE_NAME),
        Some(first_shoot)
    );
    assert_eq!(
        first_seed.render().unwrap(),
        harness
            .installer
            .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
            .unwrap()
            .render()
            .unwrap()
    );
}

#[tokio::test]
async fn test_reconcile_rejects_invalid_quantity() {
    let harness = Harness::new();
    let config = json!({ "persistence": { "size": "lots" } });

    let err = harness
        .actuator
        .reconcile(Some(&config), &cluster())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(harness.installer.slots(NAMESPACE).is_empty());
    assert_eq!(harness.store.puts(), 0);
}

#[tokio::test]
async fn test_reconcile_rejects_foreign_kind() {
    let harness = Harness::new();
    let config = json!({ "apiVersion": "audit.metal-stack.io/v1alpha1", "kind": "NotAudit" });

    let err = harness
        .actuator
        .reconcile(Some(&config), &cluster())
        .await
        .unwrap_err();

    assert!(matches!(err, ActuatorError::Config(_)));
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[tokio::test]
async fn test_reconcile_fails_on_missing_image() {
    let images = ImageVector::empty().with_image("fluent-bit", "fluent/fluent-bit:test");
    let harness = Harness::with_images(images);

    let err = harness.actuator.reconcile(None, &cluster()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert!(err.to_string().contains(AUDITTAILER_IMAGE));
    assert!(harness.installer.slots(NAMESPACE).is_empty());
}

#[tokio::test]
async fn test_restore_matches_reconcile() {
    let harness = Harness::new();

    harness.actuator.reconcile(None, &cluster()).await.unwrap();
    let reconciled = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .unwrap();

    harness.actuator.restore(None, &cluster()).await.unwrap();
    assert_eq!(
        harness.installer.installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME),
        Some(reconciled)
    );
}

#[tokio::test]
async fn test_migrate_touches_nothing() {
    let harness = Harness::new();

    harness.actuator.migrate(&cluster()).await.unwrap();

    assert!(harness.installer.slots(NAMESPACE).is_empty());
    assert!(harness.installer.removals().is_empty());
    assert_eq!(harness.installer.applied_secret_count(), 0);
    assert_eq!(harness.store.puts(), 0);
}

#[tokio::test]
async fn test_delete_removes_both_slots() {
    let harness = Harness::new();
    harness.actuator.reconcile(None, &cluster()).await.unwrap();

    harness.actuator.delete(&cluster()).await.unwrap();

    assert!(harness.installer.slots(NAMESPACE).is_empty());
    assert_eq!(
        harness.installer.removals(),
        vec![SHOOT_AUDIT_RESOURCE_NAME, SEED_AUDIT_RESOURCE_NAME]
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_of_absent_extension_returns_immediately() {
    let harness = Harness::new();
    let start = tokio::time::Instant::now();

    harness.actuator.delete(&cluster()).await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_delete_times_out_after_two_minutes() {
    let harness = Harness::with_installer(RecordingInstaller::stuck());
    harness.actuator.reconcile(None, &cluster()).await.unwrap();
    let start = tokio::time::Instant::now();

    let err = harness.actuator.delete(&cluster()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    let ActuatorError::Timeout { timeout, .. } = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert_eq!(timeout, Duration::from_secs(120));
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert!(harness.installer.is_removed_calls() > 1);
}

#[tokio::test]
async fn test_reconcile_regenerates_undecodable_authority() {
    let harness = Harness::new();
    harness.store.insert_secret(
        NAMESPACE,
        Secret {
            metadata: ObjectMeta {
                name: Some(CA_NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "ca.crt".to_string(),
                ByteString(b"left over".to_vec()),
            )])),
            ..Default::default()
        },
    );

    harness.actuator.reconcile(None, &cluster()).await.unwrap();

    assert_eq!(harness.store.puts(), 3);
    let ca = harness.store.secret(NAMESPACE, CA_NAME).unwrap();
    assert!(ca
        .metadata
        .annotations
        .unwrap()
        .contains_key(CHECKSUM_ANNOTATION));
    assert_eq!(harness.installer.slots(NAMESPACE).len(), 2);
}

#[tokio::test]
async fn test_store_failure_is_a_dependency_error() {
    let harness = Harness::new();
    harness.store.fail_puts(true);

    let err = harness.actuator.reconcile(None, &cluster()).await.unwrap_err();

    assert!(matches!(err, ActuatorError::Secrets(_)));
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert!(harness.installer.slots(NAMESPACE).is_empty());

    harness.store.fail_puts(false);
    harness.actuator.reconcile(None, &cluster()).await.unwrap();
    assert_eq!(harness.installer.slots(NAMESPACE).len(), 2);
}

#[tokio::test]
async fn test_partial_install_reconverges_on_retry() {
    let harness = Harness::new();
    harness.installer.fail_slot(Some(SHOOT_AUDIT_RESOURCE_NAME));

    let err = harness.actuator.reconcile(None, &cluster()).await.unwrap_err();

    assert!(matches!(err, ActuatorError::Install(_)));
    assert_eq!(err.kind(), ErrorKind::Dependency);
    let slots: Vec<_> = harness.installer.slots(NAMESPACE).into_iter().collect();
    assert_eq!(slots, vec![SEED_AUDIT_RESOURCE_NAME]);
    let seed_before = harness
        .installer
        .installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME)
        .unwrap();

    harness.installer.fail_slot(None);
    harness.actuator.reconcile(None, &cluster()).await.unwrap();

    let slots: Vec<_> = harness.installer.slots(NAMESPACE).into_iter().collect();
    assert_eq!(slots, vec![SEED_AUDIT_RESOURCE_NAME, SHOOT_AUDIT_RESOURCE_NAME]);
    // Credentials from the failed attempt are reused
    assert_eq!(harness.store.puts(), 3);
    assert_eq!(
        harness.installer.installed(NAMESPACE, SEED_AUDIT_RESOURCE_NAME),
        Some(seed_before)
    );
}
