//! Common test utilities for actuator integration tests
//!
//! In-memory stand-ins for the credential store and the managed resource
//! installer, so the actuator can be driven without a cluster.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use audit_extension::controller::{Actuator, WaitOptions};
use audit_extension::crd::ClusterContext;
use audit_extension::images::ImageVector;
use audit_extension::installer::{InstallError, ResourceInstaller};
use audit_extension::resources::ResourceSet;
use audit_extension::secrets::store::{from_secret, to_secret};
use audit_extension::secrets::{
    CredentialStore, RcgenIssuer, SecretsError, SecretsManager, StoredCredential,
};

pub const NAMESPACE: &str = "shoot--prj--c1";

pub fn cluster() -> ClusterContext {
    ClusterContext::new(NAMESPACE)
}

fn api_error(message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    })
}

/// Credential store keeping `Secret`s in a map, keyed by (namespace, name)
///
/// Credentials go through the same `Secret` encoding as the cluster store, so
/// hand-placed secrets are decoded like real ones.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<(String, String), Secret>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryStore {
    /// Number of credentials written so far
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn names(&self, namespace: &str) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Place a raw secret, bypassing the credential encoding
    pub fn insert_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.items
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.items
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every following write fail until switched back
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StoredCredential>, SecretsError> {
        self.secret(namespace, name)
            .map(|secret| from_secret(name, &secret))
            .transpose()
    }

    async fn put(&self, namespace: &str, credential: &StoredCredential) -> Result<(), SecretsError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SecretsError::store(
                &credential.name,
                api_error("etcdserver: request timed out"),
            ));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert_secret(namespace, to_secret(credential, namespace));
        Ok(())
    }
}

/// Installer that keeps installed sets in memory
///
/// With `stuck` set, removal requests are accepted but the slots never go
/// away, like a managed resource whose objects cannot be deleted. Installs
/// into a slot passed to `fail_slot` are rejected.
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    installed: Mutex<BTreeMap<(String, String), ResourceSet>>,
    removals: Mutex<Vec<String>>,
    is_removed_calls: AtomicUsize,
    applied_secrets: Mutex<BTreeMap<(String, String), Secret>>,
    failing_slot: Mutex<Option<String>>,
    stuck: bool,
}

impl RecordingInstaller {
    pub fn stuck() -> Self {
        Self {
            stuck: true,
            ..Self::default()
        }
    }

    pub fn installed(&self, namespace: &str, slot: &str) -> Option<ResourceSet> {
        self.installed
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), slot.to_string()))
            .cloned()
    }

    pub fn slots(&self, namespace: &str) -> BTreeSet<String> {
        self.installed
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, slot)| slot.clone())
            .collect()
    }

    /// Slots removal was requested for, in request order
    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    pub fn is_removed_calls(&self) -> usize {
        self.is_removed_calls.load(Ordering::SeqCst)
    }

    /// Secrets applied outside of any slot
    pub fn applied_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.applied_secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn applied_secret_count(&self) -> usize {
        self.applied_secrets.lock().unwrap().len()
    }

    /// Reject installs into `slot`; `None` accepts everything again
    pub fn fail_slot(&self, slot: Option<&str>) {
        *self.failing_slot.lock().unwrap() = slot.map(str::to_string);
    }
}

#[async_trait]
impl ResourceInstaller for RecordingInstaller {
    async fn install_set(&self, namespace: &str, set: &ResourceSet) -> Result<(), InstallError> {
        if self.failing_slot.lock().unwrap().as_deref() == Some(set.slot()) {
            return Err(InstallError::Api {
                slot: set.slot().to_string(),
                action: "apply",
                source: api_error("admission webhook denied the request"),
            });
        }
        self.installed.lock().unwrap().insert(
            (namespace.to_string(), set.slot().to_string()),
            set.clone(),
        );
        Ok(())
    }

    async fn remove_set(&self, namespace: &str, slot: &str) -> Result<(), InstallError> {
        self.removals.lock().unwrap().push(slot.to_string());
        if !self.stuck {
            self.installed
                .lock()
                .unwrap()
                .remove(&(namespace.to_string(), slot.to_string()));
        }
        Ok(())
    }

    async fn is_removed(&self, namespace: &str, slot: &str) -> Result<bool, InstallError> {
        self.is_removed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self
            .installed
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_string(), slot.to_string())))
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), InstallError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.applied_secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret.clone());
        Ok(())
    }
}

/// Actuator wired to in-memory doubles and the real certificate issuer
pub struct Harness {
    pub actuator: Actuator,
    pub store: Arc<MemoryStore>,
    pub installer: Arc<RecordingInstaller>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_installer(RecordingInstaller::default())
    }

    pub fn with_installer(installer: RecordingInstaller) -> Self {
        Self::build(installer, ImageVector::default())
    }

    pub fn with_images(images: ImageVector) -> Self {
        Self::build(RecordingInstaller::default(), images)
    }

    fn build(installer: RecordingInstaller, images: ImageVector) -> Self {
        let store = Arc::new(MemoryStore::default());
        let installer = Arc::new(installer);
        let secrets = SecretsManager::new(
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::new(RcgenIssuer::new()),
        );
        let actuator = Actuator::new(secrets, Arc::clone(&installer) as Arc<dyn ResourceInstaller>)
            .with_images(images)
            .with_wait_options(WaitOptions::default());
        Self {
            actuator,
            store,
            installer,
        }
    }
}
