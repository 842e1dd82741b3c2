//! Dashboard HTTP API
//!
//! Read-only REST endpoints over the engine's status snapshot.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use super::DashboardState;

/// Create the API router with all endpoints
pub fn create_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/position", get(get_position))
        .route("/api/trades", get(get_trades))
        .route("/api/health", get(get_health))
        .with_state(state)
        // CORS for local UIs
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/status - Market reading, risk state and stats
async fn get_status(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let snapshot = state.snapshot().await;
    Json(ApiResponse::success(StatusResponse::from(&snapshot)))
}

/// GET /api/position - Open position, or null when flat
async fn get_position(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let snapshot = state.snapshot().await;
    let position = snapshot
        .position
        .as_ref()
        .map(|p| PositionResponse::new(p, snapshot.unrealized_pnl));
    Json(ApiResponse::success(position))
}

/// GET /api/trades - Recent exits, newest first
async fn get_trades(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let snapshot = state.snapshot().await;
    let trades: Vec<TradeResponse> = snapshot.recent_trades.iter().map(TradeResponse::from).collect();
    Json(ApiResponse::success(trades))
}

/// GET /api/health - Market data freshness
async fn get_health(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let snapshot = state.snapshot().await;
    let now = Utc::now().timestamp_millis();
    let market_age_ms = if snapshot.market_ok_at > 0 {
        now.saturating_sub(snapshot.market_ok_at)
    } else {
        -1
    };
    Json(ApiResponse::success(HealthResponse {
        healthy: snapshot.is_fresh(now, state.stale_after_ms),
        market_age_ms,
        stale_threshold_ms: state.stale_after_ms,
        cycles: snapshot.cycles,
        last_error: snapshot.last_error,
        updated_at: snapshot.updated_at,
    }))
}
