//! Explosion detector
//!
//! Flags abnormal bars: a close-to-close jump, an oversized high-low range,
//! or an ATR% spike against its trailing average. Detection is recomputed
//! every cycle; the cooldown counter is separate and only armed on close.

use serde::{Deserialize, Serialize};

use crate::config::ExplosionConfig;
use crate::types::{Direction, MarketState};

/// Detection for the current bar plus the decaying suppression counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplosionState {
    pub detected: bool,
    pub direction: Option<Direction>,
    pub cooldown_bars_remaining: u32,
}

impl ExplosionState {
    /// Overwrite the detection with this cycle's reading
    pub fn observe(&mut self, market: &MarketState, config: &ExplosionConfig) {
        let reading = detect_explosion(market, config);
        self.detected = reading.is_some();
        self.direction = reading;
    }

    /// Direction of an active explosion
    pub fn active_direction(&self) -> Option<Direction> {
        if self.detected {
            self.direction
        } else {
            None
        }
    }

    pub fn arm_cooldown(&mut self, bars: u32) {
        self.cooldown_bars_remaining = bars;
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_bars_remaining > 0
    }

    /// One bar of decay, never below zero
    pub fn tick(&mut self) {
        self.cooldown_bars_remaining = self.cooldown_bars_remaining.saturating_sub(1);
    }
}

/// Returns the explosion direction when any trigger fires on the current bar
pub fn detect_explosion(market: &MarketState, config: &ExplosionConfig) -> Option<Direction> {
    let prev_close = market.prev_close?;
    if !(market.atr > 0.0) || !(market.close > 0.0) {
        return None;
    }

    let price_move = (market.close - prev_close).abs();
    let range_move = market.high - market.low;
    let atr_pct = market.atr / market.close;
    let avg_atr_pct = market.avg_atr_pct.unwrap_or(atr_pct);

    let exploded = price_move >= config.move_atr_mult * market.atr
        || range_move >= config.range_atr_mult * market.atr
        || atr_pct >= config.atr_pct_ratio * avg_atr_pct;

    if !exploded {
        return None;
    }

    if market.close > prev_close {
        Some(Direction::Up)
    } else {
        Some(Direction::Down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> MarketState {
        MarketState {
            price: 0.150,
            open: 0.1498,
            high: 0.1505,
            low: 0.1495,
            close: 0.150,
            prev_close: Some(0.1499),
            atr: 0.001,
            avg_atr_pct: Some(0.001 / 0.150),
            ..Default::default()
        }
    }

    #[test]
    fn test_calm_bar_not_detected() {
        assert_eq!(detect_explosion(&calm(), &ExplosionConfig::default()), None);
    }

    #[test]
    fn test_price_jump_up() {
        let mut m = calm();
        m.close = 0.1499 + 0.0023;
        m.high = m.close;
        assert_eq!(
            detect_explosion(&m, &ExplosionConfig::default()),
            Some(Direction::Up)
        );
    }

    #[test]
    fn test_range_expansion_down() {
        let mut m = calm();
        m.high = 0.152;
        m.low = 0.1494;
        m.close = 0.1495;
        assert_eq!(
            detect_explosion(&m, &ExplosionConfig::default()),
            Some(Direction::Down)
        );
    }

    #[test]
    fn test_atr_pct_spike() {
        let mut m = calm();
        m.avg_atr_pct = Some(0.004);
        // current ATR% = 0.00667 >= 1.5 * 0.004
        assert!(detect_explosion(&m, &ExplosionConfig::default()).is_some());
    }

    #[test]
    fn test_short_history_uses_current_atr_pct() {
        let mut m = calm();
        m.avg_atr_pct = None;
        assert_eq!(detect_explosion(&m, &ExplosionConfig::default()), None);
    }

    #[test]
    fn test_single_bar_not_detected() {
        let mut m = calm();
        m.prev_close = None;
        m.high = 1.0;
        assert_eq!(detect_explosion(&m, &ExplosionConfig::default()), None);
    }

    #[test]
    fn test_observe_overwrites_and_cooldown_decays() {
        let config = ExplosionConfig::default();
        let mut state = ExplosionState::default();

        let mut jump = calm();
        jump.close = 0.160;
        jump.high = 0.160;
        state.observe(&jump, &config);
        assert_eq!(state.active_direction(), Some(Direction::Up));

        state.arm_cooldown(2);
        state.observe(&calm(), &config);
        assert!(!state.detected);
        assert_eq!(state.active_direction(), None);
        assert!(state.in_cooldown());

        state.tick();
        state.tick();
        state.tick();
        assert_eq!(state.cooldown_bars_remaining, 0);
    }
}
