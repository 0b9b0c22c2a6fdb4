//! Credential lifecycle.
//!
//! Resolves a [`CredentialGraph`] into concrete key material. Authorities are
//! resolved first and concurrently, signed certificates afterwards, also
//! concurrently. A persisted credential is reused while its spec checksum is
//! unchanged, it is outside its renewal window, and (for signed certificates)
//! it was signed by the current authority. Anything else is regenerated and
//! persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::graph::{CredentialGraph, CredentialSpec, SignedNode};
use super::issuer::{CertificateIssuer, CA_CERT_KEY, CA_KEY_KEY, TLS_CERT_KEY, TLS_KEY_KEY};
use super::store::{CredentialData, CredentialStore, StoredCredential};
use super::SecretsError;
use crate::observability::metrics;

/// Length of the data checksum suffix in [`Credential::secret_name`]
const SECRET_NAME_CHECKSUM_LEN: usize = 8;

/// Smallest renewal window regardless of certificate lifetime
const MIN_RENEWAL_WINDOW_DAYS: i64 = 1;

/// A materialized credential ready to be shipped as a `Secret`
#[derive(Clone)]
pub struct Credential {
    pub name: String,
    /// `<name>-<checksum prefix>`; changes whenever the key material changes
    pub secret_name: String,
    pub data: CredentialData,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret_name", &self.secret_name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credential {
    fn from_stored(stored: &StoredCredential) -> Self {
        let checksum = data_checksum(&stored.data);
        Self {
            name: stored.name.clone(),
            secret_name: format!(
                "{}-{}",
                stored.name,
                &checksum[..SECRET_NAME_CHECKSUM_LEN]
            ),
            data: stored.data.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }
}

pub struct SecretsManager {
    store: Arc<dyn CredentialStore>,
    issuer: Arc<dyn CertificateIssuer>,
    clock: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager").finish_non_exhaustive()
    }
}

impl SecretsManager {
    pub fn new(store: Arc<dyn CredentialStore>, issuer: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            store,
            issuer,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for renewal decisions
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Materialize every credential in `graph` within `namespace`
    ///
    /// Returns credentials keyed by name. Fails on the first store or issuer
    /// error; credentials persisted before the failure are kept and will be
    /// reused on the next call.
    pub async fn generate_all(
        &self,
        namespace: &str,
        graph: &CredentialGraph,
    ) -> Result<BTreeMap<String, Credential>, SecretsError> {
        let authorities = try_join_all(
            graph
                .authorities()
                .iter()
                .map(|spec| self.resolve_authority(namespace, spec)),
        )
        .await?;

        let signed = try_join_all(
            graph
                .signed()
                .iter()
                .map(|node| self.resolve_signed(namespace, node, &authorities[node.authority_index()])),
        )
        .await?;

        let credentials: BTreeMap<_, _> = authorities
            .iter()
            .chain(signed.iter())
            .map(|stored| (stored.name.clone(), Credential::from_stored(stored)))
            .collect();

        debug!(
            namespace = %namespace,
            count = credentials.len(),
            "resolved credentials"
        );
        Ok(credentials)
    }

    async fn resolve_authority(
        &self,
        namespace: &str,
        spec: &CredentialSpec,
    ) -> Result<StoredCredential, SecretsError> {
        let checksum = spec.checksum();

        if let Some(existing) = self.load(namespace, &spec.name).await? {
            if existing.checksum == checksum
                && !self.needs_renewal(&existing)
                && existing.get(CA_CERT_KEY).is_some()
                && existing.get(CA_KEY_KEY).is_some()
                && self.usable_authority(namespace, &existing)
            {
                metrics::increment_credentials_reused_total();
                return Ok(existing);
            }
        }

        let issued = self.issuer.issue_ca(spec)?;
        let stored = StoredCredential {
            name: spec.name.clone(),
            data: issued.data,
            checksum,
            ca_checksum: None,
            not_before: issued.not_before,
            not_after: issued.not_after,
        };
        self.store.put(namespace, &stored).await?;

        metrics::increment_credentials_generated_total();
        info!(
            namespace = %namespace,
            credential = %spec.name,
            not_after = %stored.not_after,
            "generated certificate authority"
        );
        Ok(stored)
    }

    async fn resolve_signed(
        &self,
        namespace: &str,
        node: &SignedNode,
        ca: &StoredCredential,
    ) -> Result<StoredCredential, SecretsError> {
        let spec = &node.spec;
        let checksum = spec.checksum();
        let ca_checksum = hex::encode(Sha256::digest(ca.pem(CA_CERT_KEY)?.as_bytes()));

        if let Some(existing) = self.load(namespace, &spec.name).await? {
            if existing.checksum == checksum
                && existing.ca_checksum.as_deref() == Some(ca_checksum.as_str())
                && !self.needs_renewal(&existing)
                && existing.get(TLS_CERT_KEY).is_some()
                && existing.get(TLS_KEY_KEY).is_some()
            {
                metrics::increment_credentials_reused_total();
                return Ok(existing);
            }
        }

        let issued = self.issuer.issue_signed(spec, ca)?;
        let stored = StoredCredential {
            name: spec.name.clone(),
            data: issued.data,
            checksum,
            ca_checksum: Some(ca_checksum),
            not_before: issued.not_before,
            not_after: issued.not_after,
        };
        self.store.put(namespace, &stored).await?;

        metrics::increment_credentials_generated_total();
        info!(
            namespace = %namespace,
            credential = %spec.name,
            authority = %ca.name,
            not_after = %stored.not_after,
            "generated certificate"
        );
        Ok(stored)
    }

    /// Load a persisted credential; one that cannot be decoded counts as absent
    async fn load(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StoredCredential>, SecretsError> {
        match self.store.get(namespace, name).await {
            Err(SecretsError::Corrupt { name, reason }) => {
                warn!(
                    namespace = %namespace,
                    credential = %name,
                    reason = %reason,
                    "stored credential is corrupt, regenerating"
                );
                Ok(None)
            }
            other => other,
        }
    }

    fn usable_authority(&self, namespace: &str, ca: &StoredCredential) -> bool {
        match self.issuer.validate_authority(ca) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    credential = %ca.name,
                    error = %e,
                    "stored authority cannot sign, regenerating"
                );
                false
            }
        }
    }

    /// True once a tenth of the lifetime (at least a day) remains
    fn needs_renewal(&self, credential: &StoredCredential) -> bool {
        let lifetime = credential.not_after - credential.not_before;
        let window = std::cmp::max(lifetime / 10, Duration::days(MIN_RENEWAL_WINDOW_DAYS));
        (self.clock)() >= credential.not_after - window
    }
}

fn data_checksum(data: &CredentialData) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_slice());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::graph::CredentialKind;
    use crate::secrets::issuer::IssuedCredential;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use zeroize::Zeroizing;

    #[derive(Default)]
    struct MemoryStore {
        items: Mutex<BTreeMap<(String, String), StoredCredential>>,
        puts: AtomicUsize,
        /// Names whose stored form fails to decode
        corrupt: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn get(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<StoredCredential>, SecretsError> {
            if self.corrupt.lock().unwrap().iter().any(|n| n == name) {
                return Err(SecretsError::Corrupt {
                    name: name.to_string(),
                    reason: "missing checksum annotation".to_string(),
                });
            }
            Ok(self
                .items
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn put(
            &self,
            namespace: &str,
            credential: &StoredCredential,
        ) -> Result<(), SecretsError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.corrupt
                .lock()
                .unwrap()
                .retain(|n| *n != credential.name);
            self.items.lock().unwrap().insert(
                (namespace.to_string(), credential.name.clone()),
                credential.clone(),
            );
            Ok(())
        }
    }

    /// Issues deterministic fake PEM blobs, numbered per call
    #[derive(Default)]
    struct CountingIssuer {
        calls: AtomicUsize,
    }

    impl CountingIssuer {
        fn issue(&self, keys: &[(&str, String)]) -> IssuedCredential {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            IssuedCredential {
                data: keys
                    .iter()
                    .map(|(k, v)| (k.to_string(), Zeroizing::new(format!("{v}-{n}").into_bytes())))
                    .collect(),
                not_before: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                not_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            }
        }
    }

    impl CertificateIssuer for CountingIssuer {
        fn issue_ca(&self, spec: &CredentialSpec) -> Result<IssuedCredential, SecretsError> {
            Ok(self.issue(&[
                (CA_CERT_KEY, format!("{}-crt", spec.name)),
                (CA_KEY_KEY, format!("{}-key", spec.name)),
            ]))
        }

        fn issue_signed(
            &self,
            spec: &CredentialSpec,
            ca: &StoredCredential,
        ) -> Result<IssuedCredential, SecretsError> {
            let mut issued = self.issue(&[
                (TLS_CERT_KEY, format!("{}-crt", spec.name)),
                (TLS_KEY_KEY, format!("{}-key", spec.name)),
            ]);
            issued.data.insert(
                CA_CERT_KEY.to_string(),
                Zeroizing::new(ca.get(CA_CERT_KEY).unwrap_or_default().to_vec()),
            );
            Ok(issued)
        }

        fn validate_authority(&self, ca: &StoredCredential) -> Result<(), SecretsError> {
            match ca.get(CA_KEY_KEY) {
                Some(key) if !key.is_empty() => Ok(()),
                _ => Err(SecretsError::Issue {
                    name: ca.name.clone(),
                    reason: "empty authority key".to_string(),
                }),
            }
        }
    }

    fn graph() -> CredentialGraph {
        let mut builder = CredentialGraph::builder();
        let ca = builder.add_ca("ca-test", "ca-test");
        builder
            .add_signed("server", "svc", vec!["svc".into()], CredentialKind::ServerCert, &ca)
            .add_signed("client", "svc", vec![], CredentialKind::ClientCert, &ca);
        builder.build().unwrap()
    }

    fn mid_life() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn near_expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 20, 0, 0, 0).unwrap()
    }

    fn manager(
        store: &Arc<MemoryStore>,
        issuer: &Arc<CountingIssuer>,
        clock: fn() -> DateTime<Utc>,
    ) -> SecretsManager {
        SecretsManager::new(store.clone(), issuer.clone()).with_clock(clock)
    }

    #[tokio::test]
    async fn test_generate_all_creates_every_credential() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());

        let creds = manager(&store, &issuer, mid_life)
            .generate_all("ns", &graph())
            .await
            .unwrap();

        assert_eq!(
            creds.keys().cloned().collect::<Vec<_>>(),
            vec!["ca-test", "client", "server"]
        );
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);
        assert_eq!(
            creds["server"].get(CA_CERT_KEY),
            creds["ca-test"].get(CA_CERT_KEY)
        );
        assert!(creds["server"].secret_name.starts_with("server-"));
        assert_eq!(creds["server"].secret_name.len(), "server-".len() + 8);
    }

    #[tokio::test]
    async fn test_generate_all_reuses_valid_credentials() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, mid_life);

        let first = mgr.generate_all("ns", &graph()).await.unwrap();
        let second = mgr.generate_all("ns", &graph()).await.unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
        for (name, cred) in &first {
            assert_eq!(cred.secret_name, second[name].secret_name);
        }
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, mid_life);

        mgr.generate_all("ns-a", &graph()).await.unwrap();
        mgr.generate_all("ns-b", &graph()).await.unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_renewal_window_regenerates_everything() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());

        let first = manager(&store, &issuer, mid_life)
            .generate_all("ns", &graph())
            .await
            .unwrap();
        let renewed = manager(&store, &issuer, near_expiry)
            .generate_all("ns", &graph())
            .await
            .unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 6);
        assert_ne!(first["ca-test"].secret_name, renewed["ca-test"].secret_name);
        assert_ne!(first["server"].secret_name, renewed["server"].secret_name);
    }

    #[tokio::test]
    async fn test_new_authority_resigns_leaves() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, mid_life);
        mgr.generate_all("ns", &graph()).await.unwrap();

        // Replace the authority behind the manager's back
        let mut ca = store.get("ns", "ca-test").await.unwrap().unwrap();
        ca.data
            .insert(CA_CERT_KEY.to_string(), Zeroizing::new(b"rotated".to_vec()));
        store.put("ns", &ca).await.unwrap();

        let creds = mgr.generate_all("ns", &graph()).await.unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 5);
        assert_eq!(creds["server"].get(CA_CERT_KEY), Some(b"rotated".as_slice()));
    }

    #[tokio::test]
    async fn test_changed_dns_names_regenerate_leaf_only() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, mid_life);
        mgr.generate_all("ns", &graph()).await.unwrap();

        let mut builder = CredentialGraph::builder();
        let ca = builder.add_ca("ca-test", "ca-test");
        builder
            .add_signed(
                "server",
                "svc",
                vec!["svc".into(), "svc.audit".into()],
                CredentialKind::ServerCert,
                &ca,
            )
            .add_signed("client", "svc", vec![], CredentialKind::ClientCert, &ca);
        mgr.generate_all("ns", &builder.build().unwrap())
            .await
            .unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_undecodable_authority_is_regenerated() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        store.corrupt.lock().unwrap().push("ca-test".to_string());

        let creds = manager(&store, &issuer, mid_life)
            .generate_all("ns", &graph())
            .await
            .unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
        assert!(creds.contains_key("ca-test"));
        assert!(store.get("ns", "ca-test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_authority_with_unusable_key_is_regenerated() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, mid_life);
        let first = mgr.generate_all("ns", &graph()).await.unwrap();

        let mut ca = store.get("ns", "ca-test").await.unwrap().unwrap();
        ca.data
            .insert(CA_KEY_KEY.to_string(), Zeroizing::new(Vec::new()));
        store.put("ns", &ca).await.unwrap();

        let second = mgr.generate_all("ns", &graph()).await.unwrap();

        // New authority, so both leaves are re-signed
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 6);
        assert_ne!(first["ca-test"].secret_name, second["ca-test"].secret_name);
        assert_ne!(first["client"].secret_name, second["client"].secret_name);
    }

    #[test]
    fn test_renewal_window_has_a_floor() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(CountingIssuer::default());
        let mgr = manager(&store, &issuer, || {
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
        });

        let short_lived = StoredCredential {
            name: "short".into(),
            data: BTreeMap::new(),
            checksum: String::new(),
            ca_checksum: None,
            not_before: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2025, 1, 2, 6, 0, 0).unwrap(),
        };
        assert!(mgr.needs_renewal(&short_lived));
    }
}
