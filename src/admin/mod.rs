//! Read-mostly admin API.
//!
//! # Endpoints
//! - `GET  /admin/status`               overall status
//! - `GET  /admin/integrations`         per-integration circuit status
//! - `GET  /admin/integrations/health`  503 while any circuit is open
//! - `GET  /admin/cache/stats`          two-tier cache statistics
//! - `GET  /admin/cache/health`         503 while a cache tier is unhealthy
//! - `POST /admin/cache/invalidate`     `{"patterns": ["integration:ANM:*"]}`
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::IntegrationLayer;

/// Shared state for admin handlers.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub layer: IntegrationLayer,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(layer: IntegrationLayer) -> Self {
        let api_key = Arc::from(layer.config().admin.api_key.as_str());
        Self { layer, api_key }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/integrations", get(get_integrations))
        .route("/admin/integrations/health", get(get_integrations_health))
        .route("/admin/cache/stats", get(get_cache_stats))
        .route("/admin/cache/health", get(get_cache_health))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
