//! Credential dependency graph.
//!
//! Certificate authorities are roots, every signed certificate hangs off exactly
//! one authority. Signed specs hold a [`CaRef`] handle instead of the authority's
//! name, so a dangling authority is rejected when the graph is built.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use super::SecretsError;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    CertificateAuthority,
    ServerCert,
    ClientCert,
}

impl CredentialKind {
    fn as_str(self) -> &'static str {
        match self {
            CredentialKind::CertificateAuthority => "ca",
            CredentialKind::ServerCert => "server",
            CredentialKind::ClientCert => "client",
        }
    }
}

/// Declarative request for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSpec {
    pub name: String,
    pub common_name: String,
    pub kind: CredentialKind,
    /// Names the certificate is valid for; empty for authorities
    pub dns_names: Vec<String>,
}

impl CredentialSpec {
    /// Hex sha256 over everything that shapes the generated certificate
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str());
        hasher.update([0u8]);
        hasher.update(&self.name);
        hasher.update([0u8]);
        hasher.update(&self.common_name);
        for dns in &self.dns_names {
            hasher.update([0u8]);
            hasher.update(dns);
        }
        hex::encode(hasher.finalize())
    }
}

/// Handle to an authority registered with a [`CredentialGraphBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaRef {
    graph_id: u64,
    index: usize,
}

/// A signed certificate and the index of its authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedNode {
    pub spec: CredentialSpec,
    authority: usize,
}

impl SignedNode {
    pub(crate) fn authority_index(&self) -> usize {
        self.authority
    }
}

#[derive(Debug)]
pub struct CredentialGraphBuilder {
    id: u64,
    authorities: Vec<CredentialSpec>,
    signed: Vec<SignedNode>,
    names: BTreeSet<String>,
    error: Option<SecretsError>,
}

impl Default for CredentialGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGraphBuilder {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            authorities: Vec::new(),
            signed: Vec::new(),
            names: BTreeSet::new(),
            error: None,
        }
    }

    /// Register a self-signed certificate authority
    pub fn add_ca(&mut self, name: impl Into<String>, common_name: impl Into<String>) -> CaRef {
        let spec = CredentialSpec {
            name: name.into(),
            common_name: common_name.into(),
            kind: CredentialKind::CertificateAuthority,
            dns_names: Vec::new(),
        };
        self.claim_name(&spec.name);
        self.authorities.push(spec);
        CaRef {
            graph_id: self.id,
            index: self.authorities.len() - 1,
        }
    }

    /// Register a certificate signed by `ca`
    pub fn add_signed(
        &mut self,
        name: impl Into<String>,
        common_name: impl Into<String>,
        dns_names: Vec<String>,
        kind: CredentialKind,
        ca: &CaRef,
    ) -> &mut Self {
        let spec = CredentialSpec {
            name: name.into(),
            common_name: common_name.into(),
            kind,
            dns_names,
        };

        if kind == CredentialKind::CertificateAuthority {
            self.record(SecretsError::InvalidSpec(format!(
                "{} is an authority and cannot be signed",
                spec.name
            )));
        }
        if ca.graph_id != self.id || ca.index >= self.authorities.len() {
            self.record(SecretsError::UnknownAuthority(spec.name.clone()));
        }

        self.claim_name(&spec.name);
        self.signed.push(SignedNode {
            spec,
            authority: ca.index,
        });
        self
    }

    pub fn build(self) -> Result<CredentialGraph, SecretsError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(CredentialGraph {
            authorities: self.authorities,
            signed: self.signed,
        })
    }

    fn claim_name(&mut self, name: &str) {
        if !self.names.insert(name.to_string()) {
            self.record(SecretsError::DuplicateName(name.to_string()));
        }
    }

    fn record(&mut self, err: SecretsError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Validated set of credentials to materialize
///
/// Resolution order is two layers: every authority first, then every signed
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialGraph {
    authorities: Vec<CredentialSpec>,
    signed: Vec<SignedNode>,
}

impl CredentialGraph {
    pub fn builder() -> CredentialGraphBuilder {
        CredentialGraphBuilder::new()
    }

    pub fn authorities(&self) -> &[CredentialSpec] {
        &self.authorities
    }

    pub fn signed(&self) -> &[SignedNode] {
        &self.signed
    }

    /// The authority that signs `node`
    pub fn authority_of(&self, node: &SignedNode) -> &CredentialSpec {
        &self.authorities[node.authority]
    }

    pub fn len(&self) -> usize {
        self.authorities.len() + self.signed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
