//! Ferry Runner
//!
//! A stateless bridge that pulls pending pipeline stages from a Drone
//! coordination server and schedules each one on Nomad as a batch job.
//!
//! Architecture:
//! - Configuration: Load settings from `DRONE_*` environment variables
//! - Repositories: HTTP communication with the server (stages) and Nomad (jobs)
//! - Services: Job compilation and job naming
//! - Scheduler: The poll, accept, compile, submit loop
//!
//! Many runners may poll the same server; the server's optimistic lock
//! guarantees each stage is accepted by exactly one of them.

mod config;
mod repository;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{HttpJobRepository, HttpStageRepository};
use crate::scheduler::StagePoller;
use ferry_client::CoordinatorClient;
use ferry_nomad::{NomadClient, NomadConfig};

const DEFAULT_LOG_FILTER: &str = "ferry_runner=info,ferry_client=info,ferry_nomad=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(DEFAULT_LOG_FILTER);
            error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };

    // Initialize logging
    init_tracing(&config.log_filter());

    for warning in &config.warnings {
        warn!("{}", warning);
    }

    info!(
        "Loaded configuration: machine={}, server={}",
        config.machine,
        config.server.addr()
    );
    let config = Arc::new(config);

    // Initialize coordination server client
    let coordinator = CoordinatorClient::with_skip_verify(
        config.server.addr(),
        config.server.secret.clone(),
        config.server.skip_verify,
    )
    .context("Failed to create the coordination client")?
    .with_dump(config.server.dump_mode());

    // Initialize nomad client
    let nomad =
        NomadClient::new(NomadConfig::from_env()).context("Failed to create the nomad client")?;
    info!("Nomad client initialized for {}", nomad.address());

    // Graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let poller = StagePoller::new(
        Arc::clone(&config),
        Arc::new(HttpStageRepository::new(coordinator)),
        Arc::new(HttpJobRepository::new(nomad)),
    );

    info!(
        "Datacenters: {:?}, image: {}",
        config.job.datacenters, config.image.name
    );
    poller.run(cancel).await;

    info!("Runner stopped");
    Ok(())
}

/// Installs the global tracing subscriber; `RUST_LOG` takes precedence
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, terminating process"),
        _ = terminate => info!("received SIGTERM, terminating process"),
    }
}
