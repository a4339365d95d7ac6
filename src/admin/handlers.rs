use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::discovery::{Discovery, Service};
use crate::load_balancer::pool::PoolSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    /// `discovery` or `upstream`.
    pub mode: &'static str,
    pub pools: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        mode: if state.manager.is_some() { "discovery" } else { "upstream" },
        pools: state.manager.as_ref().map_or(0, |m| m.len()),
    })
}

pub async fn get_pools(State(state): State<AdminState>) -> Json<Vec<PoolSnapshot>> {
    Json(state.manager.map(|m| m.snapshot()).unwrap_or_default())
}

/// Snapshots held by the in-process directory.
pub async fn get_services(State(state): State<AdminState>) -> Json<BTreeMap<String, Service>> {
    let mut services = BTreeMap::new();
    for name in state.discovery.service_names() {
        if let Ok(service) = state.discovery.browse(&name).await {
            services.insert(name, service);
        }
    }
    Json(services)
}
