//! Admin subsystem: read-only introspection over HTTP.
//!
//! # Data Flow
//! ```text
//! GET /admin/*
//!     → auth.rs (Bearer token, when configured)
//!     → handlers.rs (status, pools, directory)
//!     → JSON
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use crate::discovery::MemoryDiscovery;
use crate::load_balancer::BackendManager;

use self::auth::admin_auth_middleware;
use self::handlers::{get_pools, get_services, get_status};

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Absent in pinned upstream mode.
    pub manager: Option<Arc<BackendManager>>,
    pub discovery: Arc<MemoryDiscovery>,
    /// Empty disables authentication.
    pub api_key: String,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pools", get(get_pools))
        .route("/admin/services", get(get_services))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
