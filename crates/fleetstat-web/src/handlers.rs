//! HTTP routes: aggregated stats, liveness, OpenAPI document.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

use crate::access_log::AccessLogLayer;
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub(crate) const STATS_PATH: &str = "/api/aggregator/stats";
pub(crate) const HEALTH_PATH: &str = "/api/healthz";
pub(crate) const OPENAPI_PATH: &str = "/api-docs/openapi.json";

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route(STATS_PATH, get(handle_stats))
        .route(HEALTH_PATH, get(handle_health))
        .route(OPENAPI_PATH, get(handle_openapi))
        .with_state(state)
        .layer(AccessLogLayer)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

// ============================================================
// Health
// ============================================================

/// Liveness only: does not reflect refresh loop health.
#[utoipa::path(
    get,
    path = "/api/healthz",
    responses(
        (status = 200, description = "Process is accepting connections", body = String)
    )
)]
pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Stats
// ============================================================

/// Serves the published snapshot bytes as-is. Empty body before the first
/// refresh cycle completes.
#[utoipa::path(
    get,
    path = "/api/aggregator/stats",
    responses(
        (status = 200, description = "Most recent aggregate snapshot (empty before the first cycle)", body = fleetstat_core::model::AggregateSnapshot)
    )
)]
pub(crate) async fn handle_stats(State(state): State<AppState>) -> Response {
    let body = state.store.current().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

// ============================================================
// OpenAPI
// ============================================================

pub(crate) async fn handle_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
