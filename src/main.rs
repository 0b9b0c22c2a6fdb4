//! # Audit Extension Controller
//!
//! Watches gardener `Extension` resources of type `audit` and keeps the audit
//! pipeline of each shoot in place.
//!
//! ## Overview
//!
//! For every shoot with the audit extension the controller:
//!
//! 1. **Resolves the `AuditConfig`** - decodes the provider config and fills in defaults
//! 2. **Maintains the audittailer certificates** - CA, server and client certificate, reused across runs
//! 3. **Composes the seed resources** - webhook backend (fluent-bit) with one output per enabled backend
//! 4. **Composes the shoot resources** - audittailer receiving forwarded audit records
//! 5. **Installs both sets** - as gardener `ManagedResource`s, removed again on deletion
//!
//! ## Configuration
//!
//! Environment variables, see [`audit_extension::config::ControllerConfig`] and
//! [`audit_extension::images::ImageVector::from_env`].

use anyhow::{Context as _, Result};
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{error, info, warn};

use audit_extension::config::ControllerConfig;
use audit_extension::controller::runtime::{handle_reconciliation_error, reconcile, Context};
use audit_extension::controller::{Actuator, WaitOptions};
use audit_extension::crd::Extension;
use audit_extension::images::ImageVector;
use audit_extension::installer::ManagedResourceInstaller;
use audit_extension::observability::metrics;
use audit_extension::secrets::{KubeSecretStore, RcgenIssuer, SecretsManager};
use audit_extension::server::{start_server, ServerState};

fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("audit_extension={}", config.log_level.to_lowercase()).into()
    });

    if config.log_format.eq_ignore_ascii_case("text") {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ControllerConfig::from_env();
    init_tracing(&config);

    // Required for rustls 0.23+ before the first kube connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Audit Extension Controller");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        revision = env!("AUDIT_EXTENSION_REVISION"),
        build_date = env!("AUDIT_EXTENSION_BUILD_DATE"),
        "build info"
    );

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let secrets = SecretsManager::new(
        Arc::new(KubeSecretStore::new(client.clone())),
        Arc::new(RcgenIssuer::new()),
    );
    let installer = Arc::new(ManagedResourceInstaller::new(client.clone()));
    let actuator = Actuator::new(secrets, installer)
        .with_images(ImageVector::from_env())
        .with_wait_options(WaitOptions {
            interval: config.delete_poll_interval(),
            timeout: config.delete_timeout(),
        });

    let extensions: Api<Extension> = Api::all(client.clone());
    let context = Arc::new(Context::new(client, actuator, config));

    server_state.mark_ready();

    Controller::new(extensions, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, context)
        .for_each(|result| {
            if let Err(e) = result {
                warn!("controller stream error: {}", e);
            }
            std::future::ready(())
        })
        .await;

    info!("Controller stopped");
    Ok(())
}
