//! Dashboard API Types
//!
//! JSON DTOs served by the status API.

use serde::{Deserialize, Serialize};

use crate::engine::StatusSnapshot;
use crate::position::{Position, PositionPhase};
use crate::risk::LedgerStats;
use crate::types::TradeRecord;

// ─────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// GET /api/status
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub bot_tag: String,
    pub symbol: String,
    pub dry_run: bool,
    pub cycles: u64,
    pub updated_at: i64,
    pub price: f64,
    pub regime: Option<String>,
    pub rsi: f64,
    pub adx: f64,
    pub atr_pct: f64,
    pub explosion_direction: Option<String>,
    pub explosion_cooldown_bars: u32,
    pub locked_side: Option<String>,
    pub loss_lock_bars_remaining: u32,
    pub daily_trades: u32,
    pub stats: LedgerStats,
    pub in_position: bool,
    pub unrealized_pnl: f64,
    pub last_signal: Option<String>,
    pub last_filter_reason: Option<String>,
    pub last_error: Option<String>,
}

impl From<&StatusSnapshot> for StatusResponse {
    fn from(s: &StatusSnapshot) -> Self {
        Self {
            bot_tag: s.bot_tag.clone(),
            symbol: s.symbol.clone(),
            dry_run: s.dry_run,
            cycles: s.cycles,
            updated_at: s.updated_at,
            price: s.price,
            regime: s.regime.map(|r| r.to_string()),
            rsi: s.rsi,
            adx: s.adx,
            atr_pct: s.atr_pct,
            explosion_direction: s.explosion.active_direction().map(|d| d.to_string()),
            explosion_cooldown_bars: s.explosion.cooldown_bars_remaining,
            locked_side: s.risk.locked_side().map(|side| side.to_string()),
            loss_lock_bars_remaining: s.risk.loss_lock_bars_remaining,
            daily_trades: s.risk.daily_trade_count,
            stats: s.stats.clone(),
            in_position: s.position.is_some(),
            unrealized_pnl: s.unrealized_pnl,
            last_signal: s.last_signal.clone(),
            last_filter_reason: s.last_filter_reason.clone(),
            last_error: s.last_error.clone(),
        }
    }
}

/// GET /api/position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionResponse {
    pub id: String,
    pub side: String,
    pub phase: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub initial_quantity: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub trailing_active: bool,
    pub realized_profit: f64,
    pub unrealized_pnl: f64,
    pub opened_at: i64,
}

impl PositionResponse {
    pub fn new(position: &Position, unrealized_pnl: f64) -> Self {
        let phase = match position.phase {
            PositionPhase::Open => "OPEN".to_string(),
            PositionPhase::PartiallyClosed => "PARTIALLY_CLOSED".to_string(),
            PositionPhase::Closing(reason) => format!("CLOSING_{}", reason),
        };
        Self {
            id: position.id.clone(),
            side: position.side.to_string(),
            phase,
            entry_price: position.entry_price,
            quantity: position.quantity,
            initial_quantity: position.initial_quantity,
            tp_price: position.tp_price,
            sl_price: position.sl_price,
            tp1_hit: position.tp1_hit,
            tp2_hit: position.tp2_hit,
            trailing_active: position.trailing_active,
            realized_profit: position.realized_profit,
            unrealized_pnl,
            opened_at: position.opened_at,
        }
    }
}

/// GET /api/trades
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResponse {
    pub id: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub reason: String,
    pub profit: f64,
    pub timestamp: i64,
    pub partial: bool,
}

impl From<&TradeRecord> for TradeResponse {
    fn from(t: &TradeRecord) -> Self {
        Self {
            id: t.id.clone(),
            side: t.side.to_string(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            quantity: t.quantity,
            reason: t.reason.clone(),
            profit: t.profit,
            timestamp: t.timestamp,
            partial: t.partial,
        }
    }
}

/// GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthResponse {
    pub healthy: bool,
    pub market_age_ms: i64,
    pub stale_threshold_ms: i64,
    pub cycles: u64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}
