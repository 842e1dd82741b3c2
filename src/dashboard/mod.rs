//! Dashboard Module
//!
//! Read-only HTTP status surface for RegimeBot.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use std::sync::Arc;

use crate::engine::{SharedStatus, StatusSnapshot};

/// State shared with the HTTP handlers
#[derive(Debug, Clone)]
pub struct DashboardState {
    status: SharedStatus,
    /// Market data older than this marks the bot unhealthy
    pub stale_after_ms: i64,
}

impl DashboardState {
    pub fn new(status: SharedStatus, stale_after_ms: i64) -> Self {
        Self {
            status,
            stale_after_ms,
        }
    }

    /// Copy of the latest published snapshot
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }
}

/// Start the dashboard server
pub async fn start_server(state: Arc<DashboardState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr: std::net::SocketAddr = format!("{}:{}", bind, port).parse()?;

    tracing::info!("🖥️ Dashboard API starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PositionConfig;
    use crate::position::Position;
    use crate::types::{Side, TradeRecord};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(state: Arc<DashboardState>, uri: &str) -> Value {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn make_state(snapshot: StatusSnapshot) -> Arc<DashboardState> {
        Arc::new(DashboardState::new(snapshot.shared(), 180_000))
    }

    #[tokio::test]
    async fn position_is_null_when_flat() {
        let state = make_state(StatusSnapshot::new("t", "DOGE-USDT", true, 0));
        let body = get_json(state, "/api/position").await;
        assert_eq!(body["success"], Value::Bool(true));
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn position_and_trades_are_reported() {
        let mut snapshot = StatusSnapshot::new("t", "DOGE-USDT", true, 0);
        snapshot.position = Some(Position::open(
            "p1",
            Side::Buy,
            0.10,
            1000.0,
            0.002,
            0,
            &PositionConfig::default(),
        ));
        snapshot.recent_trades = vec![TradeRecord {
            id: "p0".to_string(),
            side: Side::Sell,
            entry_price: 0.11,
            exit_price: 0.104,
            quantity: 500.0,
            reason: "TP".to_string(),
            profit: 3.0,
            timestamp: 1,
            partial: false,
        }];
        let state = make_state(snapshot);

        let position = get_json(state.clone(), "/api/position").await;
        assert_eq!(position["data"]["side"], "BUY");
        assert_eq!(position["data"]["phase"], "OPEN");

        let trades = get_json(state, "/api/trades").await;
        assert_eq!(trades["data"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(trades["data"][0]["reason"], "TP");
    }

    #[tokio::test]
    async fn health_reflects_market_freshness() {
        let mut snapshot = StatusSnapshot::new("t", "DOGE-USDT", true, 0);
        let state = make_state(snapshot.clone());
        let body = get_json(state, "/api/health").await;
        assert_eq!(body["data"]["healthy"], Value::Bool(false));

        snapshot.market_ok_at = Utc::now().timestamp_millis();
        let state = make_state(snapshot);
        let body = get_json(state, "/api/health").await;
        assert_eq!(body["data"]["healthy"], Value::Bool(true));
    }

    #[tokio::test]
    async fn status_includes_symbol_and_stats() {
        let state = make_state(StatusSnapshot::new("t", "DOGE-USDT", false, 0));
        let body = get_json(state, "/api/status").await;
        assert_eq!(body["data"]["symbol"], "DOGE-USDT");
        assert_eq!(body["data"]["stats"]["total_trades"], 0);
        assert_eq!(body["data"]["in_position"], Value::Bool(false));
    }
}
