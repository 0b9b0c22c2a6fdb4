//! # Reconcile
//!
//! Entry point the kube-runtime `Controller` calls for every `Extension` event.
//!
//! Extensions of other types are ignored. For `audit` extensions a finalizer
//! guarantees that `delete` runs before the object disappears; every other
//! event is dispatched by the `gardener.cloud/operation` annotation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{self, finalizer, Event};
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

use super::status::{clear_operation_annotation, failed_status, patch_status, succeeded_status};
use super::{resource_key, Context};
use crate::crd::{ClusterContext, Extension, OperationType};
use crate::error::{ActuatorError, ErrorKind};

/// Finalizer the controller puts on every `audit` extension
pub const FINALIZER_NAME: &str = "extensions.gardener.cloud/audit";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error("finalizer handling failed")]
    Finalizer(#[source] Box<finalizer::Error<ActuatorError>>),

    #[error("failed to update extension {name}")]
    Patch {
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Actuator(e) => e.kind(),
            ReconcileError::Finalizer(_) | ReconcileError::Patch { .. } => ErrorKind::Dependency,
        }
    }
}

pub async fn reconcile(
    extension: Arc<Extension>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    if !extension.is_audit() {
        return Ok(Action::await_change());
    }

    let name = extension.name_any();
    let Some(cluster) = ClusterContext::from_extension(&extension) else {
        return Err(ActuatorError::MissingNamespace(name).into());
    };
    let operation = if extension.metadata.deletion_timestamp.is_some() {
        OperationType::Delete
    } else {
        extension.requested_operation()
    };

    let span = tracing::info_span!(
        "extension.reconcile",
        extension = %name,
        namespace = %cluster.namespace,
        operation = %operation,
    );
    reconcile_audit(extension, ctx, cluster, name, operation)
        .instrument(span)
        .await
}

async fn reconcile_audit(
    extension: Arc<Extension>,
    ctx: Arc<Context>,
    cluster: ClusterContext,
    name: String,
    operation: OperationType,
) -> Result<Action, ReconcileError> {
    debug!("handling extension event");
    let key = resource_key(Some(&cluster.namespace), &name);
    let generation = extension.metadata.generation;

    let api: Api<Extension> = Api::namespaced(ctx.client.clone(), &cluster.namespace);
    let ctx_ref = ctx.as_ref();
    let cluster_ref = &cluster;
    // Stays false on the pass that only adds the finalizer
    let actuated = AtomicBool::new(false);
    let actuated_ref = &actuated;
    let result = finalizer(&api, FINALIZER_NAME, extension, |event| async move {
        match event {
            Event::Apply(ex) => {
                let action = apply(ctx_ref, &ex, cluster_ref, operation).await?;
                actuated_ref.store(true, Ordering::Relaxed);
                Ok::<_, ActuatorError>(action)
            }
            Event::Cleanup(_) => {
                ctx_ref.actuator.delete(cluster_ref).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await;

    match result {
        Ok(action) => {
            ctx.reset_backoff(&key);
            let record = success_record(operation, actuated.load(Ordering::Relaxed));
            if record == SuccessRecord::Nothing {
                return Ok(action);
            }
            patch_status(
                &api,
                &name,
                &succeeded_status(operation, generation, chrono::Utc::now()),
            )
            .await
            .map_err(|source| ReconcileError::Patch {
                name: name.clone(),
                source,
            })?;
            if record == SuccessRecord::StatusAndClearAnnotation {
                clear_operation_annotation(&api, &name)
                    .await
                    .map_err(|source| ReconcileError::Patch {
                        name: name.clone(),
                        source,
                    })?;
                info!("cleared operation annotation");
            }
            Ok(action)
        }
        Err(finalizer::Error::ApplyFailed(err) | finalizer::Error::CleanupFailed(err)) => {
            let status = failed_status(operation, &err, generation, chrono::Utc::now());
            if let Err(e) = patch_status(&api, &name, &status).await {
                warn!(error = %e, "failed to record operation error in extension status");
            }
            Err(err.into())
        }
        Err(other) => Err(ReconcileError::Finalizer(Box::new(other))),
    }
}

/// What a successful pass writes back to the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuccessRecord {
    Nothing,
    Status,
    StatusAndClearAnnotation,
}

fn success_record(operation: OperationType, actuated: bool) -> SuccessRecord {
    match operation {
        // The object is gone together with its finalizer
        OperationType::Delete => SuccessRecord::Nothing,
        _ if !actuated => SuccessRecord::Nothing,
        OperationType::Restore | OperationType::Migrate => SuccessRecord::StatusAndClearAnnotation,
        OperationType::Reconcile => SuccessRecord::Status,
    }
}

async fn apply(
    ctx: &Context,
    extension: &Extension,
    cluster: &ClusterContext,
    operation: OperationType,
) -> Result<Action, ActuatorError> {
    let provider_config = extension.spec.provider_config.as_ref();
    match operation {
        OperationType::Restore => ctx.actuator.restore(provider_config, cluster).await?,
        OperationType::Migrate => ctx.actuator.migrate(cluster).await?,
        OperationType::Reconcile | OperationType::Delete => {
            ctx.actuator.reconcile(provider_config, cluster).await?;
        }
    }
    Ok(Action::requeue(ctx.config.resync_interval()))
}
