//! Status snapshot published by the decision loop
//!
//! The loop owns all mutable state; after every cycle it copies what a
//! reader needs into a [`StatusSnapshot`] behind a `RwLock`. Readers clone
//! the snapshot and never see a half-updated cycle.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::position::Position;
use crate::risk::{LedgerStats, RiskState};
use crate::strategy::{ExplosionState, Regime};
use crate::types::TradeRecord;

/// Shared, copy-on-read status handle
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub bot_tag: String,
    pub symbol: String,
    pub dry_run: bool,
    /// Unix milliseconds
    pub started_at: i64,
    /// Time of the last completed cycle
    pub updated_at: i64,
    /// Time of the last successful market snapshot
    pub market_ok_at: i64,
    pub cycles: u64,

    pub price: f64,
    pub bar_ts: i64,
    pub regime: Option<Regime>,
    pub rsi: f64,
    pub adx: f64,
    pub atr_pct: f64,
    pub explosion: ExplosionState,

    pub position: Option<Position>,
    pub unrealized_pnl: f64,
    pub risk: RiskState,
    pub stats: LedgerStats,
    pub recent_trades: Vec<TradeRecord>,

    /// Reason attached to the last evaluated signal
    pub last_signal: Option<String>,
    /// Last guard rejection or blocked-rule reason
    pub last_filter_reason: Option<String>,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub fn new(bot_tag: &str, symbol: &str, dry_run: bool, started_at: i64) -> Self {
        Self {
            bot_tag: bot_tag.to_string(),
            symbol: symbol.to_string(),
            dry_run,
            started_at,
            ..Default::default()
        }
    }

    /// Wrap into a shared handle
    pub fn shared(self) -> SharedStatus {
        Arc::new(RwLock::new(self))
    }

    /// True while market data arrived within `max_age_ms`
    pub fn is_fresh(&self, now_ms: i64, max_age_ms: i64) -> bool {
        self.market_ok_at > 0 && now_ms.saturating_sub(self.market_ok_at) <= max_age_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness() {
        let mut status = StatusSnapshot::new("t", "DOGE-USDT", true, 0);
        assert!(!status.is_fresh(1_000, 60_000), "no snapshot yet");

        status.market_ok_at = 10_000;
        assert!(status.is_fresh(70_000, 60_000));
        assert!(!status.is_fresh(70_001, 60_000));
    }

    #[tokio::test]
    async fn test_shared_reads_are_copies() {
        let shared = StatusSnapshot::new("t", "DOGE-USDT", true, 0).shared();
        let copy = shared.read().await.clone();
        shared.write().await.cycles = 5;
        assert_eq!(copy.cycles, 0);
        assert_eq!(shared.read().await.cycles, 5);
    }
}
