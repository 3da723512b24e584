use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::common::cli::{ServerCommand, ServerOpts, ServerStartOpts};
use crate::common::config::{ACCEPTED_REFRESH_DELAY, resolve_server_config};
use crate::server::backend::{BackendConfig, UnavailableBackend, WorkloadBackend, create_backend};
use crate::server::http::{AppState, create_router};
use crate::server::manager::{JobManager, JobTemplate, ManagerConfig};
use crate::server::reconcile::{ReconcileConfig, create_reconcile_service, reconcile_process};
use crate::server::registry::MemoryRegistry;
use crate::server::submit::{SubmissionClient, SubmitMode};
use crate::server::tenant::HeaderAuthenticator;

#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub template: JobTemplate,
    pub tenant_header: String,
    pub submit_timeout: Duration,
    pub submit_mode: SubmitMode,
    pub run_timeout: Option<Duration>,
    pub reconcile_interval: Duration,
    pub max_status_errors: u32,
    pub status_poll_interval: Duration,
}

pub async fn command_server(opts: ServerOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        ServerCommand::Start(opts) => start_server(opts).await,
    }
}

async fn start_server(opts: ServerStartOpts) -> anyhow::Result<()> {
    let config = resolve_server_config(opts)?;
    log::debug!("Server configuration: {config:?}");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Cannot listen on {}:{}", config.host, config.port))?;
    run_server(config, listener, stop_signal()).await
}

/// A backend that cannot be initialized does not prevent the server from starting.
/// Existing jobs stay readable and new submissions are rejected.
async fn initialize_backend(config: &BackendConfig) -> Arc<dyn WorkloadBackend> {
    match create_backend(config).await {
        Ok(backend) => {
            log::info!(
                "Using {:?} backend (namespace {})",
                config.kind,
                config.namespace
            );
            backend
        }
        Err(error) => {
            log::error!("Cannot initialize {:?} backend: {error:?}", config.kind);
            Arc::new(UnavailableBackend::new(format!("{error:#}")))
        }
    }
}

/// Serves requests on `listener` until `stop` resolves.
pub async fn run_server(
    config: ServerConfig,
    listener: TcpListener,
    stop: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let backend = initialize_backend(&config.backend).await;
    let submission =
        SubmissionClient::new(backend, config.submit_timeout, config.status_poll_interval);
    let (reconciler, reconcile_receiver) = create_reconcile_service();
    let manager = Arc::new(JobManager::new(
        Arc::new(MemoryRegistry::new()),
        submission,
        ManagerConfig {
            template: config.template,
            mode: config.submit_mode,
            run_timeout: config.run_timeout,
        },
        reconciler.clone(),
    ));

    let reconcile_handle = tokio::spawn(reconcile_process(
        manager.clone(),
        ReconcileConfig {
            interval: config.reconcile_interval,
            accepted_refresh_delay: ACCEPTED_REFRESH_DELAY,
            max_status_errors: config.max_status_errors,
        },
        reconcile_receiver,
    ));

    let authenticator = Arc::new(HeaderAuthenticator::new(config.tenant_header));
    let router = create_router(AppState::new(manager, authenticator));

    log::info!(
        "Server listening on {} (version {})",
        listener.local_addr()?,
        crate::DATAJOB_VERSION
    );
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(stop)
        .await
        .context("HTTP server failed");

    log::info!("Stopping server");
    reconciler.quit();
    if let Err(error) = reconcile_handle.await {
        log::error!("Reconciliation ended abnormally: {error}");
    }
    result
}

async fn stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Received SIGINT, attempting to stop");
                    }
                    _ = terminate.recv() => {
                        log::info!("Received SIGTERM, attempting to stop");
                    }
                }
                return;
            }
            Err(error) => log::warn!("Cannot listen for SIGTERM: {error}"),
        }
    }
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for SIGINT: {error}");
        futures::future::pending::<()>().await;
    }
    log::info!("Received SIGINT, attempting to stop");
}
