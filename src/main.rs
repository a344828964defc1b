//! Integration layer daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller ──▶ Integration::call
//!                   │
//!                   ├─▶ CacheManager ──▶ L1 (TtlCache) ──▶ L2 (DistributedCache ──▶ Redis | memory)
//!                   │        ▲ hit: return
//!                   │
//!                   └─▶ CircuitBreaker ──▶ retry_with_backoff ──▶ external service
//!                             │ success: store result in both tiers
//!                             └ open: IntegrationError::Unavailable
//!
//!     admin API (axum) ──▶ status / integrations / cache stats / invalidation
//! ```
//!
//! Configuration comes from the TOML file named on the command line (or in
//! `LAYER_CONFIG`), else from defaults; `REDIS_*` variables override either.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;

use integration_layer::admin::{setup_admin_router, AdminState};
use integration_layer::config::loader::{config_from_env, load_config};
use integration_layer::lifecycle::signals::spawn_signal_listener;
use integration_layer::observability::{logging, metrics};
use integration_layer::{IntegrationLayer, Shutdown};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LAYER_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => config_from_env()?,
    };

    logging::init_tracing(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        integrations = config.integrations.len(),
        "integration-layer starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let layer = IntegrationLayer::build(config).await?;
    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let admin = &layer.config().admin;
    if admin.enabled {
        let listener = TcpListener::bind(&admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState::new(layer.clone()));
        let signal = shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.wait().await })
            .await?;
    } else {
        tracing::info!("Admin API disabled");
        shutdown.wait().await;
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, layer.shutdown()).await.is_err() {
        tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "Shutdown timed out, exiting anyway");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
