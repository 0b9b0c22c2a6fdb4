//! Persistent credential storage.
//!
//! The [`CredentialStore`] trait is the seam to whatever keeps generated key
//! material across reconciliations. [`KubeSecretStore`] keeps one `Secret` per
//! credential in the namespace of the cluster it belongs to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;
use zeroize::Zeroizing;

use super::SecretsError;
use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Key material by file name (`ca.crt`, `tls.crt`, `tls.key`, ...)
pub type CredentialData = BTreeMap<String, Zeroizing<Vec<u8>>>;

const CREDENTIAL_NAME_LABEL: &str = "audit.metal-stack.io/credential-name";
/// Spec checksum annotation on persisted credentials
pub const CHECKSUM_ANNOTATION: &str = "audit.metal-stack.io/checksum";
const CA_CHECKSUM_ANNOTATION: &str = "audit.metal-stack.io/ca-checksum";
const NOT_BEFORE_ANNOTATION: &str = "audit.metal-stack.io/not-before";
const NOT_AFTER_ANNOTATION: &str = "audit.metal-stack.io/not-after";

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "audit-extension";

/// A credential as persisted between reconciliations
#[derive(Clone)]
pub struct StoredCredential {
    pub name: String,
    pub data: CredentialData,
    /// Checksum of the spec the credential was generated from
    pub checksum: String,
    /// Fingerprint of the authority certificate that signed it, if any
    pub ca_checksum: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("checksum", &self.checksum)
            .field("ca_checksum", &self.ca_checksum)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl StoredCredential {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }

    /// Like [`StoredCredential::get`] but decoded as UTF-8 PEM
    pub fn pem(&self, key: &str) -> Result<&str, SecretsError> {
        let bytes = self.get(key).ok_or_else(|| SecretsError::Corrupt {
            name: self.name.clone(),
            reason: format!("missing {key}"),
        })?;
        std::str::from_utf8(bytes).map_err(|_| SecretsError::Corrupt {
            name: self.name.clone(),
            reason: format!("{key} is not valid UTF-8"),
        })
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load a credential; `Ok(None)` if it was never persisted
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StoredCredential>, SecretsError>;

    /// Create or replace a credential
    async fn put(&self, namespace: &str, credential: &StoredCredential)
        -> Result<(), SecretsError>;
}

/// Stores credentials as `Secret`s
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CredentialStore for KubeSecretStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StoredCredential>, SecretsError> {
        let secret = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| SecretsError::store(name, e))?;

        match secret {
            Some(secret) => from_secret(name, &secret).map(Some),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        credential: &StoredCredential,
    ) -> Result<(), SecretsError> {
        let secret = to_secret(credential, namespace);
        self.api(namespace)
            .patch(
                &credential.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| SecretsError::store(&credential.name, e))?;

        debug!(
            credential = %credential.name,
            namespace = %namespace,
            "persisted credential"
        );
        Ok(())
    }
}

/// Encode a credential as a `Secret`
pub fn to_secret(credential: &StoredCredential, namespace: &str) -> Secret {
    let mut annotations = BTreeMap::from([
        (CHECKSUM_ANNOTATION.to_string(), credential.checksum.clone()),
        (
            NOT_BEFORE_ANNOTATION.to_string(),
            credential.not_before.to_rfc3339(),
        ),
        (
            NOT_AFTER_ANNOTATION.to_string(),
            credential.not_after.to_rfc3339(),
        ),
    ]);
    if let Some(ca_checksum) = &credential.ca_checksum {
        annotations.insert(CA_CHECKSUM_ANNOTATION.to_string(), ca_checksum.clone());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(credential.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                (CREDENTIAL_NAME_LABEL.to_string(), credential.name.clone()),
            ])),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            credential
                .data
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Decode a `Secret` written by [`to_secret`]
pub fn from_secret(name: &str, secret: &Secret) -> Result<StoredCredential, SecretsError> {
    let annotations = secret.metadata.annotations.clone().unwrap_or_default();
    let corrupt = |reason: &str| SecretsError::Corrupt {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let checksum = annotations
        .get(CHECKSUM_ANNOTATION)
        .cloned()
        .ok_or_else(|| corrupt("missing checksum annotation"))?;
    let not_before = parse_time(annotations.get(NOT_BEFORE_ANNOTATION))
        .ok_or_else(|| corrupt("missing or invalid not-before annotation"))?;
    let not_after = parse_time(annotations.get(NOT_AFTER_ANNOTATION))
        .ok_or_else(|| corrupt("missing or invalid not-after annotation"))?;

    let data = secret
        .data
        .as_ref()
        .map(|d| {
            d.iter()
                .map(|(k, v)| (k.clone(), Zeroizing::new(v.0.clone())))
                .collect()
        })
        .unwrap_or_default();

    Ok(StoredCredential {
        name: name.to_string(),
        data,
        checksum,
        ca_checksum: annotations.get(CA_CHECKSUM_ANNOTATION).cloned(),
        not_before,
        not_after,
    })
}

fn parse_time(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credential() -> StoredCredential {
        StoredCredential {
            name: "audittailer-server".to_string(),
            data: BTreeMap::from([
                ("tls.crt".to_string(), Zeroizing::new(b"cert".to_vec())),
                ("tls.key".to_string(), Zeroizing::new(b"key".to_vec())),
            ]),
            checksum: "abc".to_string(),
            ca_checksum: Some("def".to_string()),
            not_before: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_secret_encoding_survives_decoding() {
        let original = credential();
        let secret = to_secret(&original, "shoot--prj--c1");

        assert_eq!(secret.metadata.namespace.as_deref(), Some("shoot--prj--c1"));
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
            MANAGED_BY_VALUE
        );

        let decoded = from_secret("audittailer-server", &secret).unwrap();
        assert_eq!(decoded.checksum, "abc");
        assert_eq!(decoded.ca_checksum.as_deref(), Some("def"));
        assert_eq!(decoded.not_after, original.not_after);
        assert_eq!(decoded.get("tls.key"), Some(b"key".as_slice()));
    }

    #[test]
    fn test_secret_without_annotations_is_corrupt() {
        let secret = Secret::default();
        assert!(matches!(
            from_secret("x", &secret),
            Err(SecretsError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("tls.key"));
        assert!(!rendered.contains("[107, 101, 121]"));
    }
}
