//! # Error Policy
//!
//! Requeue delays for failed extension operations.

use std::sync::Arc;

use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{error, info, warn};

use super::{resource_key, Context, ReconcileError};
use crate::crd::Extension;

/// Requeue a failed extension with a growing delay
///
/// Backoff state is tracked per extension so one broken shoot does not slow
/// down retries for the others.
pub fn handle_reconciliation_error(
    obj: Arc<Extension>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.metadata.namespace.as_deref();

    error!(
        extension = %name,
        namespace = namespace.unwrap_or_default(),
        kind = %error.kind(),
        "reconciliation error: {:?}",
        error
    );

    let resource_key = resource_key(namespace, &name);
    let (delay, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let backoff = states
                .entry(resource_key)
                .or_insert_with(|| ctx.new_backoff());
            (backoff.on_failure(), backoff.failures())
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (ctx.config.reconciliation_error_requeue_duration(), 0)
        }
    };

    info!(
        extension = %name,
        error_count,
        "retrying in {}s",
        delay.as_secs()
    );

    Action::requeue(delay)
}
