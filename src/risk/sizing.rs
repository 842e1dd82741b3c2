//! Position sizing and exchange rounding
//!
//! Sizing basis is the initial balance plus realized compound profit,
//! capped by what the account can actually fund right now.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::RiskConfig;

/// Order quantity for a new entry, rounded to the exchange step.
/// Returns 0.0 when the inputs cannot fund a single step.
pub fn position_quantity(
    config: &RiskConfig,
    initial_balance: f64,
    compound_profit: f64,
    available_balance: f64,
    price: f64,
    step: f64,
) -> f64 {
    if !(price > 0.0) || !(available_balance > 0.0) {
        return 0.0;
    }

    let basis = (initial_balance + compound_profit) * config.trade_portion;
    let margin = basis.min(available_balance);
    if !(margin > 0.0) {
        return 0.0;
    }

    let notional = margin * config.leverage;
    round_to_step(notional / price, step)
}

/// Round to the nearest multiple of `step` (half away from zero)
pub fn round_to_step(value: f64, step: f64) -> f64 {
    step_round(value, step, RoundingStrategy::MidpointAwayFromZero)
}

/// Round toward zero to a multiple of `step`; never exceeds `value`
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    step_round(value, step, RoundingStrategy::ToZero)
}

fn step_round(value: f64, step: f64, strategy: RoundingStrategy) -> f64 {
    let (Some(v), Some(s)) = (Decimal::from_f64(value), Decimal::from_f64(step)) else {
        return 0.0;
    };
    if s <= Decimal::ZERO {
        return value;
    }
    let steps = (v / s).round_dp_with_strategy(0, strategy);
    (steps * s).normalize().to_f64().unwrap_or(0.0)
}

/// Round a price to `decimals` places (half away from zero)
pub fn round_price(value: f64, decimals: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
