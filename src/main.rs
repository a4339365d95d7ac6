//! gRPC relay.
//!
//! A routing front for gRPC services built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                        RELAY                              │
//!   Client call       │  ┌─────────┐    ┌──────────┐    ┌────────────────┐        │
//!   ──────────────────┼─▶│  http   │───▶│ routing  │───▶│ load_balancer  │        │
//!   (h2c, any method) │  │ server  │    │ director │    │ pool + picker  │        │
//!                     │  └─────────┘    └──────────┘    └───────┬────────┘        │
//!                     │                                         │ resolver state  │
//!                     │                                 ┌───────┴────────┐        │
//!                     │                                 │   resolver     │◀── discovery
//!                     │                                 │ (watch + grace)│   snapshots
//!                     │                                 └────────────────┘        │
//!   Client response   │  ┌─────────┐                                              │
//!   ◀─────────────────┼──│  relay  │◀═══════ raw frames + trailers ═══════════════┼──── Backend
//!                     │  └─────────┘                                              │
//!                     │  config · observability · lifecycle · admin               │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use grpc_relay::config::{load_config, RelayConfig};
use grpc_relay::lifecycle::startup;
use grpc_relay::observability::logging;

#[derive(Parser)]
#[command(name = "grpc-relay", version, about = "Discovery-driven gRPC relay")]
struct Args {
    /// TOML configuration file; watched for static service changes
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "grpc-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        scheme = %config.resolver.scheme,
        default_policy = %config.balancer.default_policy,
        static_services = config.services.len(),
        local_services = config.local_services.len(),
        "Configuration loaded"
    );

    startup::run(config, args.config).await?;
    Ok(())
}
