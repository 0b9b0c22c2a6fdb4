//! # Errors
//!
//! Every actuator failure falls into one of three kinds so the calling
//! controller can tell a bad config from a broken dependency or a deletion
//! that has not finished yet.

use std::time::Duration;

use thiserror::Error;

use crate::controller::wait::WaitError;
use crate::crd::ConfigError;
use crate::images::ImageError;
use crate::installer::InstallError;
use crate::resources::ResourceError;
use crate::secrets::SecretsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed provider config; retrying without a config change will fail again
    Input,
    /// A collaborator failed: credential store, issuer, image lookup, installer
    Dependency,
    /// Deletion did not finish before the deadline
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("extension {0} is not namespaced")]
    MissingNamespace(String),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Resources(#[from] ResourceError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("timed out after {timeout:?} waiting for managed resources {slots:?} to be deleted")]
    Timeout {
        slots: Vec<String>,
        timeout: Duration,
    },
}

impl From<WaitError> for ActuatorError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { slots, timeout } => ActuatorError::Timeout { slots, timeout },
            WaitError::Install(e) => ActuatorError::Install(e),
        }
    }
}

impl ActuatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActuatorError::Config(_) | ActuatorError::MissingNamespace(_) => ErrorKind::Input,
            ActuatorError::Secrets(_)
            | ActuatorError::Image(_)
            | ActuatorError::Resources(_)
            | ActuatorError::Install(_) => ErrorKind::Dependency,
            ActuatorError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}
