//! Certificate generation.
//!
//! [`CertificateIssuer`] is the signing engine behind the secrets manager.
//! [`RcgenIssuer`] implements it with `rcgen`: self-signed authorities and
//! leaf certificates signed by a persisted authority.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use zeroize::Zeroizing;

use super::graph::{CredentialKind, CredentialSpec};
use super::store::{CredentialData, StoredCredential};
use super::SecretsError;

/// Authority certificate, present in every credential
pub const CA_CERT_KEY: &str = "ca.crt";
/// Authority private key, only present in authority credentials
pub const CA_KEY_KEY: &str = "ca.key";
/// Leaf certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Leaf private key
pub const TLS_KEY_KEY: &str = "tls.key";

const CA_VALIDITY_DAYS: i64 = 10 * 365;
const CERT_VALIDITY_DAYS: i64 = 365;

/// Freshly generated key material
#[derive(Clone)]
pub struct IssuedCredential {
    pub data: CredentialData,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

pub trait CertificateIssuer: Send + Sync {
    /// Generate a self-signed authority
    fn issue_ca(&self, spec: &CredentialSpec) -> Result<IssuedCredential, SecretsError>;

    /// Generate a certificate for `spec` signed by the authority `ca`
    fn issue_signed(
        &self,
        spec: &CredentialSpec,
        ca: &StoredCredential,
    ) -> Result<IssuedCredential, SecretsError>;

    /// Check that a persisted authority can still sign
    fn validate_authority(&self, ca: &StoredCredential) -> Result<(), SecretsError>;
}

/// `rcgen` backed issuer
#[derive(Debug, Clone, Default)]
pub struct RcgenIssuer;

impl RcgenIssuer {
    pub fn new() -> Self {
        Self
    }
}

/// Returns (not_before, not_after) starting now
fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn to_chrono(t: ::time::OffsetDateTime, name: &str) -> Result<DateTime<Utc>, SecretsError> {
    DateTime::from_timestamp(t.unix_timestamp(), 0)
        .ok_or_else(|| issue_error(name, "validity out of range"))
}

fn issue_error(name: &str, reason: impl std::fmt::Display) -> SecretsError {
    SecretsError::Issue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn
}

fn secret_bytes(pem: String) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(pem.into_bytes())
}

impl CertificateIssuer for RcgenIssuer {
    fn issue_ca(&self, spec: &CredentialSpec) -> Result<IssuedCredential, SecretsError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&spec.common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| issue_error(&spec.name, format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| issue_error(&spec.name, format!("failed to create CA cert: {e}")))?;

        Ok(IssuedCredential {
            data: BTreeMap::from([
                (CA_CERT_KEY.to_string(), secret_bytes(cert.pem())),
                (CA_KEY_KEY.to_string(), secret_bytes(key_pair.serialize_pem())),
            ]),
            not_before: to_chrono(not_before, &spec.name)?,
            not_after: to_chrono(not_after, &spec.name)?,
        })
    }

    fn issue_signed(
        &self,
        spec: &CredentialSpec,
        ca: &StoredCredential,
    ) -> Result<IssuedCredential, SecretsError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&spec.common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match spec.kind {
            CredentialKind::ServerCert => vec![ExtendedKeyUsagePurpose::ServerAuth],
            CredentialKind::ClientCert => vec![ExtendedKeyUsagePurpose::ClientAuth],
            CredentialKind::CertificateAuthority => {
                return Err(issue_error(&spec.name, "authorities are self-signed"));
            }
        };

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = spec
            .dns_names
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.clone())
                        .map(SanType::DnsName)
                        .map_err(|e| issue_error(&spec.name, format!("invalid DNS name '{san}': {e}")))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ca_cert_pem = ca.pem(CA_CERT_KEY)?;
        let ca_key = load_ca_key(ca, &spec.name)?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, &ca_key)
            .map_err(|e| issue_error(&spec.name, format!("failed to create issuer: {e}")))?;

        let key_pair = KeyPair::generate()
            .map_err(|e| issue_error(&spec.name, format!("failed to generate key: {e}")))?;
        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| issue_error(&spec.name, format!("failed to sign certificate: {e}")))?;

        Ok(IssuedCredential {
            data: BTreeMap::from([
                (
                    CA_CERT_KEY.to_string(),
                    secret_bytes(ca_cert_pem.to_string()),
                ),
                (TLS_CERT_KEY.to_string(), secret_bytes(cert.pem())),
                (TLS_KEY_KEY.to_string(), secret_bytes(key_pair.serialize_pem())),
            ]),
            not_before: to_chrono(not_before, &spec.name)?,
            not_after: to_chrono(not_after, &spec.name)?,
        })
    }

    fn validate_authority(&self, ca: &StoredCredential) -> Result<(), SecretsError> {
        let ca_key = load_ca_key(ca, &ca.name)?;
        Issuer::from_ca_cert_pem(ca.pem(CA_CERT_KEY)?, &ca_key)
            .map(|_| ())
            .map_err(|e| issue_error(&ca.name, format!("failed to parse CA certificate: {e}")))
    }
}

fn load_ca_key(ca: &StoredCredential, name: &str) -> Result<KeyPair, SecretsError> {
    KeyPair::from_pem(ca.pem(CA_KEY_KEY)?)
        .map_err(|e| issue_error(name, format!("failed to load CA key: {e}")))
}
