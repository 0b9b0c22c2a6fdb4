//! # Secrets
//!
//! TLS material for the audit pipeline: one certificate authority, a server
//! certificate for the audittailer and a client certificate for fluent-bit.
//!
//! - `graph`: declarative credential dependencies
//! - `issuer`: certificate generation
//! - `store`: persistence between reconciliations
//! - `manager`: reuse, renewal and generation

pub mod graph;
pub mod issuer;
pub mod manager;
pub mod store;

pub use graph::{CaRef, CredentialGraph, CredentialGraphBuilder, CredentialKind, CredentialSpec};
pub use issuer::{CertificateIssuer, IssuedCredential, RcgenIssuer};
pub use manager::{Credential, SecretsManager};
pub use store::{CredentialData, CredentialStore, KubeSecretStore, StoredCredential};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("credential name {0} is used more than once")]
    DuplicateName(String),

    #[error("credential {0} references an authority that is not part of the graph")]
    UnknownAuthority(String),

    #[error("invalid credential spec: {0}")]
    InvalidSpec(String),

    #[error("failed to access stored credential {name}")]
    Store {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to issue credential {name}: {reason}")]
    Issue { name: String, reason: String },

    #[error("stored credential {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}

impl SecretsError {
    pub fn store(name: &str, source: kube::Error) -> Self {
        SecretsError::Store {
            name: name.to_string(),
            source,
        }
    }
}
