//! HTTP/2 server setup and configuration.
//!
//! # Responsibilities
//! - Assemble resolver registry, balancer registry and director from config
//! - Create the Axum router: local routes first, proxy as the fallback
//! - Wire up middleware (tracing, request ID)
//! - Serve h2c on the listener until shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::discovery::Discovery;
use crate::http::proxy::{proxy_handler, ProxyState, RelayClient};
use crate::load_balancer::{BackendManager, BalancerRegistry};
use crate::resolver::ResolverRegistry;
use crate::routing::{DiscoveryDirector, StreamDirector, UpstreamDirector};

/// Relay server: locally registered services plus the catch-all proxy.
pub struct RelayServer {
    local: Router,
    proxy: Router,
    manager: Option<Arc<BackendManager>>,
    config: RelayConfig,
}

impl RelayServer {
    /// Create a new server with the given configuration and directory.
    pub fn new(config: RelayConfig, discovery: Arc<dyn Discovery>) -> Self {
        let (director, manager): (Arc<dyn StreamDirector>, _) = match &config.routing.upstream {
            Some(upstream) => {
                tracing::info!(
                    service = %upstream.service,
                    address = %upstream.address,
                    "Pinned upstream mode"
                );
                let director: Arc<dyn StreamDirector> = Arc::new(UpstreamDirector::new(
                    &upstream.service,
                    &upstream.address,
                    config.balancer.max_concurrent_calls,
                    config.routing.keys.clone(),
                ));
                (director, None)
            }
            None => {
                let manager = Arc::new(Self::backend_manager(&config, discovery));
                let director: Arc<dyn StreamDirector> = Arc::new(DiscoveryDirector::new(
                    Arc::clone(&manager),
                    config.routing.keys.clone(),
                ));
                (director, Some(manager))
            }
        };

        let state = ProxyState {
            director,
            client: Self::client(),
            health: config.health.clone(),
        };
        let proxy = Router::new().fallback(proxy_handler).with_state(state);

        Self {
            local: Router::new(),
            proxy,
            manager,
            config,
        }
    }

    fn backend_manager(config: &RelayConfig, discovery: Arc<dyn Discovery>) -> BackendManager {
        let resolvers = ResolverRegistry::new(&config.resolver.scheme, discovery)
            .with_local_services(config.local_services.iter().cloned())
            .with_empty_grace(Duration::from_secs(config.resolver.empty_grace_secs));
        let balancers = BalancerRegistry::with_defaults(config.balancer.ring_hash_virtual_nodes);
        BackendManager::new(Arc::new(resolvers), Arc::new(balancers), config.pool_settings())
    }

    /// HTTP/2 prior-knowledge client for backends.
    fn client() -> RelayClient {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector)
    }

    /// Serve `routes` locally; everything they do not match is relayed.
    pub fn with_local_routes(mut self, routes: Router) -> Self {
        self.local = self.local.merge(routes);
        self
    }

    /// Pools in use, when routing through discovery.
    pub fn backend_manager_handle(&self) -> Option<Arc<BackendManager>> {
        self.manager.clone()
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        self.local
            .clone()
            .merge(self.proxy.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Relay server starting");

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        if let Some(manager) = &self.manager {
            manager.close_all();
        }
        tracing::info!("Relay server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}
