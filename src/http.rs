use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::state::AppState;

/// Operator endpoints: mirror health, Prometheus metrics and the per-type
/// sync status report.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(mirror_health))
		.route("/metrics", get(metrics_handler))
		.route("/sync-status", get(sync_status))
		.with_state(state)
}

/// Returns 200 OK when the mirror answers a ping, otherwise 503 Service
/// Unavailable. The local store is not probed; domain traffic does that.
pub async fn mirror_health(State(state): State<AppState>) -> impl IntoResponse {
	match state.engine.router().mirror().ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("mirror error: {}", e)).into_response(),
	}
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
	let metrics_text = state.engine.metrics().encode();
	(StatusCode::OK, metrics_text).into_response()
}

pub async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
	Json(state.engine.status_report().await)
}
