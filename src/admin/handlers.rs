use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::cache::{CacheHealth, CacheStats};
use crate::integrations::{IntegrationStatus, RegistryHealth};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub integrations: usize,
    pub open_circuits: Vec<String>,
    pub l2_backend: String,
    pub l2_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub patterns: Vec<String>,
    pub removed: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let health = state.layer.registry().health();
    let l2 = state.layer.cache().l2();
    let l2_ready = l2.map_or(true, |l2| l2.is_ready());
    let status = if health.healthy && l2_ready {
        "operational"
    } else {
        "degraded"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        integrations: state.layer.registry().len(),
        open_circuits: health.open_circuits,
        l2_backend: l2.map_or("disabled", |l2| l2.backend_name()).to_string(),
        l2_ready,
    })
}

pub async fn get_integrations(State(state): State<AdminState>) -> Json<Vec<IntegrationStatus>> {
    Json(state.layer.registry().status())
}

pub async fn get_integrations_health(
    State(state): State<AdminState>,
) -> (StatusCode, Json<RegistryHealth>) {
    let health = state.layer.registry().health();
    let code = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

pub async fn get_cache_stats(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.layer.cache().stats().await)
}

pub async fn get_cache_health(State(state): State<AdminState>) -> (StatusCode, Json<CacheHealth>) {
    let health = state.layer.cache().health_check().await;
    let code = if health.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

pub async fn invalidate_cache(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, (StatusCode, String)> {
    if request.patterns.iter().all(|p| p.trim().is_empty()) {
        return Err((
            StatusCode::BAD_REQUEST,
            "at least one non-empty pattern is required".to_string(),
        ));
    }

    let removed = state.layer.cache().invalidate(&request.patterns).await;
    tracing::info!(patterns = ?request.patterns, removed, "Cache invalidated via admin API");
    Ok(Json(InvalidateResponse {
        patterns: request.patterns,
        removed,
    }))
}
