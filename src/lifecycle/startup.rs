//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Publish the static service table into the in-process directory
//! - Start background tasks (config watcher, admin, metrics)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::admin;
use crate::config::watcher::ConfigWatcher;
use crate::config::RelayConfig;
use crate::discovery::{Discovery, MemoryDiscovery};
use crate::http::RelayServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {field} address {address:?}")]
    Address { field: &'static str, address: String },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Directory and server built from one configuration.
pub struct Relay {
    pub discovery: Arc<MemoryDiscovery>,
    pub server: RelayServer,
}

/// Build the directory and server. Static services are published before any
/// resolver can watch them.
pub fn assemble(config: RelayConfig) -> Relay {
    let discovery = Arc::new(MemoryDiscovery::new());
    apply_static_services(&discovery, &config);

    let directory: Arc<dyn Discovery> = discovery.clone();
    let server = RelayServer::new(config, directory);
    Relay { discovery, server }
}

/// Republish `[[services]]` and `[[service_configs]]`. Services dropped from
/// the file become empty and fall under the resolver grace period.
pub fn apply_static_services(discovery: &MemoryDiscovery, config: &RelayConfig) {
    let table = config.static_services();
    tracing::info!(services = table.len(), "Publishing static services");
    discovery.replace_all(table);
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Run the relay until SIGINT/SIGTERM.
pub async fn run(config: RelayConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse().map_err(|_| {
            StartupError::Address {
                field: "observability.metrics_address",
                address: config.observability.metrics_address.clone(),
            }
        })?;
        metrics::init_metrics(addr);
    }

    let listener = bind(&config.listener.bind_address).await?;
    let admin_config = config.admin.clone();
    let config_snapshot = config.clone();
    let Relay { discovery, server } = assemble(config);

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    // keep the watcher handle alive for the life of the server
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(&path, config_snapshot);
            let handle = watcher.run()?;
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    apply_static_services(&discovery, &next);
                }
            });
            Some(handle)
        }
        None => None,
    };

    if admin_config.enabled {
        let admin_listener = bind(&admin_config.bind_address).await?;
        let router = admin::setup_admin_router(admin::AdminState {
            manager: server.backend_manager_handle(),
            discovery: Arc::clone(&discovery),
            api_key: admin_config.api_key.clone(),
        });
        let stop = shutdown.signalled();
        tracing::info!(address = %admin_config.bind_address, "Admin endpoint listening");
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, router)
                .with_graceful_shutdown(stop)
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    server.run(listener, shutdown.subscribe()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
