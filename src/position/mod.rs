//! Position lifecycle state machine
//!
//! `Flat -> Open -> {PartiallyClosed} -> Flat`, with a `Closing` phase for a
//! terminal close the exchange has not confirmed yet. The one-shot flags
//! `tp1_hit`, `tp2_hit` and `trailing_active` only ever go from false to
//! true; a new entry starts from a fresh `Position`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::PositionConfig;
use crate::risk::{floor_to_step, round_price};
use crate::types::{MarketState, Side};

/// Slack for level comparisons so exact ATR multiples trigger
const LEVEL_EPSILON: f64 = 1e-9;

/// Why (part of) a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    RsiOverbought,
    RsiOversold,
    /// Take-profit order could not be placed after entry
    NoTakeProfit,
    /// Stop-loss order could not be placed after entry
    NoStopLoss,
    /// Transport failure while protecting the entry
    Error,
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
            ExitReason::TrailingStop => "TRAILING_SL",
            ExitReason::RsiOverbought => "RSI_OVERBOUGHT",
            ExitReason::RsiOversold => "RSI_OVERSOLD",
            ExitReason::NoTakeProfit => "NO_TP",
            ExitReason::NoStopLoss => "NO_SL",
            ExitReason::Error => "ERROR",
        }
    }

    /// Only a profit-target hit counts as a success for locks and stats
    pub fn is_target(&self) -> bool {
        matches!(self, ExitReason::TakeProfit)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Lifecycle phase of an existing position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionPhase {
    Open,
    PartiallyClosed,
    /// Terminal close requested but not yet confirmed
    Closing(ExitReason),
}

/// Protective level change produced by `update_levels`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum LevelEvent {
    BreakEven { sl: f64 },
    TrailingActivated,
    TrailingMoved { from: f64, to: f64 },
}

/// Partial close request from the early-exit rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyExit {
    pub reason: ExitReason,
    pub quantity: f64,
}

/// The single open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub side: Side,
    pub entry_price: f64,
    pub initial_quantity: f64,
    /// Remaining open quantity
    pub quantity: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub trailing_active: bool,
    pub phase: PositionPhase,
    /// Unix milliseconds
    pub opened_at: i64,
    /// Profit realized by partial exits so far
    pub realized_profit: f64,
    /// Bar of the last early exit (one per bar)
    pub last_partial_bar: Option<i64>,
}

/// Initial take-profit and stop-loss for an entry
pub fn protective_levels(side: Side, entry: f64, atr: f64, config: &PositionConfig) -> (f64, f64) {
    let atr = atr.max(config.min_atr);
    let sign = side.sign();
    let tp = entry + sign * config.tp_atr_mult * atr;
    let sl = entry - sign * config.sl_atr_mult * atr;
    (
        round_price(tp, config.price_decimals),
        round_price(sl, config.price_decimals),
    )
}

impl Position {
    pub fn open(
        id: impl Into<String>,
        side: Side,
        entry_price: f64,
        quantity: f64,
        atr: f64,
        opened_at: i64,
        config: &PositionConfig,
    ) -> Self {
        let (tp_price, sl_price) = protective_levels(side, entry_price, atr, config);
        Self {
            id: id.into(),
            side,
            entry_price,
            initial_quantity: quantity,
            quantity,
            tp_price,
            sl_price,
            tp1_hit: false,
            tp2_hit: false,
            trailing_active: false,
            phase: PositionPhase::Open,
            opened_at,
            realized_profit: 0.0,
            last_partial_bar: None,
        }
    }

    /// Price distance moved in the position's favor (negative when adverse)
    pub fn favorable_move(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price)
    }

    /// Profit of closing `quantity` at `exit_price`
    pub fn realized_profit_at(&self, exit_price: f64, quantity: f64) -> f64 {
        self.side.sign() * (exit_price - self.entry_price) * quantity
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.realized_profit_at(price, self.quantity)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.phase, PositionPhase::Closing(_))
    }

    pub fn closing_reason(&self) -> Option<ExitReason> {
        match self.phase {
            PositionPhase::Closing(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn mark_closing(&mut self, reason: ExitReason) {
        self.phase = PositionPhase::Closing(reason);
    }

    /// Break-even promotion, trailing activation and trailing updates.
    /// Each accepted trailing move tightens the stop relative to the
    /// previous stop only; there is no high-water mark.
    pub fn update_levels(&mut self, price: f64, atr: f64, config: &PositionConfig) -> Vec<LevelEvent> {
        let mut events = Vec::new();
        if self.is_closing() || !(atr > 0.0) {
            return events;
        }
        // Same floor as the protective levels keeps TP1 clear of the touch tolerance
        let atr = atr.max(config.min_atr);

        let moved = self.favorable_move(price);

        if !self.tp1_hit && moved + LEVEL_EPSILON >= config.tp1_atr_mult * atr {
            self.tp1_hit = true;
            self.sl_price = self.entry_price;
            events.push(LevelEvent::BreakEven { sl: self.sl_price });
        }

        if !self.tp2_hit && moved + LEVEL_EPSILON >= config.tp2_atr_mult * atr {
            self.tp2_hit = true;
            self.trailing_active = true;
            events.push(LevelEvent::TrailingActivated);
        }

        if self.trailing_active {
            let candidate = round_price(
                price - self.side.sign() * config.trail_atr_mult * atr,
                config.price_decimals,
            );
            let tighter = match self.side {
                Side::Buy => candidate > self.sl_price,
                Side::Sell => candidate < self.sl_price,
            };
            if tighter {
                events.push(LevelEvent::TrailingMoved {
                    from: self.sl_price,
                    to: candidate,
                });
                self.sl_price = candidate;
            }
        }

        events
    }

    /// Terminal TP/SL touch with the configured tolerance, TP first
    pub fn touched_exit(&self, price: f64, config: &PositionConfig) -> Option<ExitReason> {
        let tol = config.price_tolerance;
        let (tp_hit, sl_hit) = match self.side {
            Side::Buy => (price >= self.tp_price - tol, price <= self.sl_price + tol),
            Side::Sell => (price <= self.tp_price + tol, price >= self.sl_price - tol),
        };

        if tp_hit {
            Some(ExitReason::TakeProfit)
        } else if sl_hit {
            if self.trailing_active {
                Some(ExitReason::TrailingStop)
            } else {
                Some(ExitReason::StopLoss)
            }
        } else {
            None
        }
    }

    /// Overbought/oversold exhaustion exit for part of the remaining size.
    /// Fires at most once per bar and never for a zero rounded quantity.
    pub fn early_exit(&self, market: &MarketState, config: &PositionConfig) -> Option<EarlyExit> {
        if self.is_closing() || self.quantity <= 0.0 {
            return None;
        }
        if self.last_partial_bar == Some(market.ts) {
            return None;
        }
        if !(market.adx < config.early_exit_adx_max) {
            return None;
        }

        let reason = match self.side {
            Side::Buy if market.rsi > config.early_exit_rsi_overbought => ExitReason::RsiOverbought,
            Side::Sell if market.rsi < config.early_exit_rsi_oversold => ExitReason::RsiOversold,
            _ => return None,
        };

        let quantity = floor_to_step(self.quantity * config.partial_close_fraction, config.quantity_step)
            .min(self.quantity);
        if quantity <= 0.0 {
            return None;
        }

        Some(EarlyExit { reason, quantity })
    }

    /// Book a confirmed partial close; returns the realized profit
    pub fn apply_partial(&mut self, quantity: f64, exit_price: f64, bar_ts: i64) -> f64 {
        let closed = quantity.clamp(0.0, self.quantity);
        let profit = self.realized_profit_at(exit_price, closed);
        self.quantity = (self.quantity - closed).max(0.0);
        self.realized_profit += profit;
        self.last_partial_bar = Some(bar_ts);
        if !self.is_closing() {
            self.phase = PositionPhase::PartiallyClosed;
        }
        profit
    }
}
