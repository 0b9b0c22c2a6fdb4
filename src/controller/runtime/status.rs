//! # Status Updates
//!
//! Records the outcome of the last operation on the `Extension`.

use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::Api;
use tracing::debug;

use crate::crd::{
    Condition, Extension, ExtensionStatus, LastError, LastOperation, OperationState,
    OperationType, OPERATION_ANNOTATION,
};
use crate::error::ActuatorError;

const READY_CONDITION: &str = "Ready";

/// Status after `operation` completed
pub fn succeeded_status(
    operation: OperationType,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ExtensionStatus {
    let timestamp = now.to_rfc3339();
    let description = format!("{operation} of audit extension succeeded");
    ExtensionStatus {
        conditions: vec![Condition {
            r#type: READY_CONDITION.to_string(),
            status: "True".to_string(),
            last_transition_time: Some(timestamp.clone()),
            reason: Some(format!("{operation}Succeeded")),
            message: Some(description.clone()),
        }],
        last_operation: Some(LastOperation {
            r#type: operation,
            state: OperationState::Succeeded,
            description: Some(description),
            last_update_time: Some(timestamp),
        }),
        last_error: None,
        observed_generation: generation,
    }
}

/// Status after `operation` failed with `error`
///
/// The error class lands in `lastError.code` so callers can tell a bad
/// provider config from a flaky dependency or an expired deadline.
pub fn failed_status(
    operation: OperationType,
    error: &ActuatorError,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ExtensionStatus {
    let timestamp = now.to_rfc3339();
    let description = error.to_string();
    ExtensionStatus {
        conditions: vec![Condition {
            r#type: READY_CONDITION.to_string(),
            status: "False".to_string(),
            last_transition_time: Some(timestamp.clone()),
            reason: Some(format!("{operation}Failed")),
            message: Some(description.clone()),
        }],
        last_operation: Some(LastOperation {
            r#type: operation,
            state: OperationState::Error,
            description: Some(description.clone()),
            last_update_time: Some(timestamp),
        }),
        last_error: Some(LastError {
            description,
            code: Some(error.kind().to_string()),
        }),
        observed_generation: generation,
    }
}

pub(crate) async fn patch_status(
    api: &Api<Extension>,
    name: &str,
    status: &ExtensionStatus,
) -> Result<(), kube::Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!(extension = %name, "updated extension status");
    Ok(())
}

/// Drop the `gardener.cloud/operation` annotation once restore or migrate is done
pub(crate) async fn clear_operation_annotation(
    api: &Api<Extension>,
    name: &str,
) -> Result<(), kube::Error> {
    let patch = serde_json::json!({
        "metadata": { "annotations": { (OPERATION_ANNOTATION): null } }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
