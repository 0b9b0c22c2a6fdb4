//! # Deletion Wait
//!
//! Poll-with-deadline primitive used after removal of managed resources was
//! requested. Dropping the returned future aborts the poll.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::constants::{DEFAULT_DELETE_POLL_INTERVAL_MS, DEFAULT_DELETE_TIMEOUT_SECS};
use crate::installer::{InstallError, ResourceInstaller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Pause between two checks
    pub interval: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_DELETE_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for managed resources {slots:?} to be deleted")]
    Timeout {
        slots: Vec<String>,
        timeout: Duration,
    },

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Wait until every slot in `slots` is removed
///
/// Returns without sleeping when all slots are already gone.
pub async fn wait_until_removed(
    installer: &dyn ResourceInstaller,
    namespace: &str,
    slots: &[&str],
    options: WaitOptions,
) -> Result<(), WaitError> {
    let poll = poll_until_removed(installer, namespace, slots, options.interval);

    match timeout(options.timeout, poll).await {
        Ok(result) => result,
        Err(_elapsed) => Err(WaitError::Timeout {
            slots: slots.iter().map(|s| s.to_string()).collect(),
            timeout: options.timeout,
        }),
    }
}

async fn poll_until_removed(
    installer: &dyn ResourceInstaller,
    namespace: &str,
    slots: &[&str],
    interval: Duration,
) -> Result<(), WaitError> {
    let mut pending: Vec<&str> = slots.to_vec();
    loop {
        let mut remaining = Vec::with_capacity(pending.len());
        for slot in pending {
            if !installer.is_removed(namespace, slot).await? {
                remaining.push(slot);
            }
        }
        if remaining.is_empty() {
            return Ok(());
        }

        debug!(
            namespace = %namespace,
            pending = ?remaining,
            "waiting for managed resources to be deleted"
        );
        pending = remaining;
        sleep(interval).await;
    }
}
