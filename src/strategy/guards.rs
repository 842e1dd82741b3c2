//! Entry guard chain
//!
//! An explicit ordered list of filters applied to a non-empty signal. The
//! first failing guard wins and its reason is reported; later guards are
//! not evaluated. Rejections are expected outcomes, not errors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::explosion::ExplosionState;
use crate::config::FilterConfig;
use crate::risk::RiskState;
use crate::types::{Direction, MarketState, Side};

/// Guard identity, in default evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardKind {
    Explosion,
    AntiReentry,
    AtrBand,
    AdxFloor,
    Spike,
    ThreeBarMove,
    Cooldown,
    DailyCap,
    Range,
    MinTakeProfit,
}

impl GuardKind {
    pub const DEFAULT_ORDER: [GuardKind; 10] = [
        GuardKind::Explosion,
        GuardKind::AntiReentry,
        GuardKind::AtrBand,
        GuardKind::AdxFloor,
        GuardKind::Spike,
        GuardKind::ThreeBarMove,
        GuardKind::Cooldown,
        GuardKind::DailyCap,
        GuardKind::Range,
        GuardKind::MinTakeProfit,
    ];
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuardKind::Explosion => "EXPLOSION",
            GuardKind::AntiReentry => "ANTI_REENTRY",
            GuardKind::AtrBand => "ATR_BAND",
            GuardKind::AdxFloor => "ADX_FLOOR",
            GuardKind::Spike => "SPIKE",
            GuardKind::ThreeBarMove => "THREE_BAR_MOVE",
            GuardKind::Cooldown => "COOLDOWN",
            GuardKind::DailyCap => "DAILY_CAP",
            GuardKind::Range => "RANGE",
            GuardKind::MinTakeProfit => "MIN_TP",
        };
        write!(f, "{}", name)
    }
}

/// First failing guard and its human-readable reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardRejection {
    pub guard: GuardKind,
    pub reason: String,
}

impl GuardRejection {
    fn new(guard: GuardKind, reason: impl Into<String>) -> Self {
        Self {
            guard,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Everything a guard may look at
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub market: &'a MarketState,
    /// Side of the candidate signal
    pub side: Side,
    pub explosion: &'a ExplosionState,
    /// Entry price of the open position, if any
    pub open_entry: Option<f64>,
    pub risk: &'a RiskState,
    pub now_ms: i64,
    /// Bar interval in seconds
    pub bar_secs: u64,
}

/// Guard thresholds that live outside the filter section
#[derive(Debug, Clone, Copy)]
pub struct TakeProfitEstimate {
    pub tp_atr_mult: f64,
    pub min_atr: f64,
}

impl Default for TakeProfitEstimate {
    fn default() -> Self {
        Self {
            tp_atr_mult: 3.0,
            min_atr: 0.001,
        }
    }
}

/// Ordered entry guard chain
#[derive(Debug, Clone)]
pub struct EntryGuardChain {
    order: Vec<GuardKind>,
    filters: FilterConfig,
    take_profit: TakeProfitEstimate,
}

impl EntryGuardChain {
    pub fn new(filters: FilterConfig, take_profit: TakeProfitEstimate) -> Self {
        Self::with_order(GuardKind::DEFAULT_ORDER.to_vec(), filters, take_profit)
    }

    pub fn with_order(
        order: Vec<GuardKind>,
        filters: FilterConfig,
        take_profit: TakeProfitEstimate,
    ) -> Self {
        Self {
            order,
            filters,
            take_profit,
        }
    }

    pub fn order(&self) -> &[GuardKind] {
        &self.order
    }

    /// Run every guard in order, stopping at the first failure
    pub fn check(&self, ctx: &GuardContext<'_>) -> Result<(), GuardRejection> {
        for kind in &self.order {
            self.check_guard(*kind, ctx)?;
        }
        Ok(())
    }

    /// Evaluate a single guard in isolation
    pub fn check_guard(&self, kind: GuardKind, ctx: &GuardContext<'_>) -> Result<(), GuardRejection> {
        let f = &self.filters;
        let m = ctx.market;

        match kind {
            GuardKind::Explosion => check_explosion(ctx),

            GuardKind::AntiReentry => match ctx.open_entry {
                Some(entry) if (m.price - entry).abs() < f.anti_reentry_atr_mult * m.atr => {
                    Err(GuardRejection::new(kind, "Anti-Reentry Filter"))
                }
                _ => Ok(()),
            },

            GuardKind::AtrBand => {
                let atr_pct = m.atr_pct();
                if f.atr_pct_band.contains(atr_pct) {
                    Ok(())
                } else {
                    Err(GuardRejection::new(kind, format!("ATR% Filter: {:.4}", atr_pct)))
                }
            }

            GuardKind::AdxFloor => {
                if m.adx < f.min_adx {
                    Err(GuardRejection::new(kind, format!("ADX Too Weak: {:.2}", m.adx)))
                } else {
                    Ok(())
                }
            }

            GuardKind::Spike => {
                let limit = f.spike_atr_mult * m.atr;
                match m.bar_move() {
                    Some(moved) if moved > limit => Err(GuardRejection::new(
                        kind,
                        format!("Spike Candle: {:.5} > {:.5}", moved, limit),
                    )),
                    _ => Ok(()),
                }
            }

            GuardKind::ThreeBarMove => {
                if f.max_three_bar_move_pct <= 0.0 {
                    return Ok(());
                }
                match m.close_3_back {
                    Some(base) if base > 0.0 => {
                        let moved_pct = (m.close - base).abs() / base * 100.0;
                        if moved_pct > f.max_three_bar_move_pct {
                            Err(GuardRejection::new(
                                kind,
                                format!("Three-Bar Move: {:.2}%", moved_pct),
                            ))
                        } else {
                            Ok(())
                        }
                    }
                    _ => Ok(()),
                }
            }

            GuardKind::Cooldown => match ctx.risk.cooldown_remaining_secs(
                ctx.now_ms,
                ctx.bar_secs,
                f.cooldown_win_bars,
                f.cooldown_loss_bars,
            ) {
                Some(remaining) => Err(GuardRejection::new(
                    kind,
                    format!("Cooldown: {}s remaining", remaining),
                )),
                None => Ok(()),
            },

            GuardKind::DailyCap => {
                if f.max_daily_trades > 0 && ctx.risk.daily_trade_count >= f.max_daily_trades {
                    Err(GuardRejection::new(
                        kind,
                        format!(
                            "Daily Trade Cap: {}/{}",
                            ctx.risk.daily_trade_count, f.max_daily_trades
                        ),
                    ))
                } else {
                    Ok(())
                }
            }

            GuardKind::Range => {
                if m.range_pct <= f.min_range_pct {
                    Err(GuardRejection::new(
                        kind,
                        format!("Range Filter: {:.2}%", m.range_pct),
                    ))
                } else {
                    Ok(())
                }
            }

            GuardKind::MinTakeProfit => {
                let atr = m.atr.max(self.take_profit.min_atr);
                let est_tp_pct = if m.price > 0.0 {
                    self.take_profit.tp_atr_mult * atr / m.price * 100.0
                } else {
                    0.0
                };
                if est_tp_pct < f.min_tp_pct {
                    Err(GuardRejection::new(
                        kind,
                        format!("Min TP% Filter: {:.2}%", est_tp_pct),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Default for EntryGuardChain {
    fn default() -> Self {
        Self::new(FilterConfig::default(), TakeProfitEstimate::default())
    }
}

fn check_explosion(ctx: &GuardContext<'_>) -> Result<(), GuardRejection> {
    let explosion = ctx.explosion;
    // The direction and confirmation checks are suspended while the cooldown runs
    if explosion.in_cooldown() {
        return Ok(());
    }

    let Some(direction) = explosion.active_direction() else {
        return Ok(());
    };

    if direction.aligned_side() != ctx.side {
        return Err(GuardRejection::new(
            GuardKind::Explosion,
            "Explosion Filter - Opposite Direction",
        ));
    }

    let m = ctx.market;
    let unconfirmed = match direction {
        Direction::Up => m.close < m.open,
        Direction::Down => m.close > m.open,
    };
    if unconfirmed {
        return Err(GuardRejection::new(
            GuardKind::Explosion,
            "Explosion Filter - Need Confirmation Candle",
        ));
    }

    Ok(())
}
