//! # Controller Runtime
//!
//! Glue between the kube-runtime `Controller` watching `Extension`s and the
//! [`Actuator`] doing the work.
//!
//! - `reconcile.rs` - finalizer handling and operation dispatch
//! - `status.rs` - `lastOperation` / `lastError` bookkeeping
//! - `error_policy.rs` - per-extension requeue backoff on failure

mod error_policy;
mod reconcile;
mod status;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube::Client;
use tracing::warn;

use crate::config::ControllerConfig;
use crate::constants::MAX_RECONCILIATION_ERROR_REQUEUE_SECS;
use crate::controller::actuator::Actuator;
use crate::controller::backoff::RequeueBackoff;

pub use error_policy::handle_reconciliation_error;
pub use reconcile::{reconcile, ReconcileError, FINALIZER_NAME};
pub use status::{failed_status, succeeded_status};

/// Shared state handed to every reconciliation
pub struct Context {
    pub client: Client,
    pub actuator: Actuator,
    pub config: ControllerConfig,
    /// Keyed by `<namespace>/<name>`
    pub backoff_states: Mutex<HashMap<String, RequeueBackoff>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("actuator", &self.actuator)
            .field("config", &self.config)
            .field("backoff_states", &self.backoff_states)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(client: Client, actuator: Actuator, config: ControllerConfig) -> Self {
        Self {
            client,
            actuator,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the error streak of an extension after a successful operation
    pub fn reset_backoff(&self, key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(key);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }

    pub(crate) fn new_backoff(&self) -> RequeueBackoff {
        RequeueBackoff::new(
            self.config.reconciliation_error_requeue_duration(),
            Duration::from_secs(MAX_RECONCILIATION_ERROR_REQUEUE_SECS),
        )
    }
}

pub(crate) fn resource_key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", namespace.unwrap_or("default"), name)
}
