//! Risk / cooldown controller
//!
//! Process-wide bookkeeping consumed by the entry guards:
//! - Direction lock after a losing close (decays per bar)
//! - Explosion cooldown decay (the counter itself lives in `ExplosionState`)
//! - Daily entry counter with UTC day rollover
//! - Last close time and result for the cooldown timer
//!
//! Nothing here rejects a trade; the guard chain reads this state.

pub mod ledger;
pub mod sizing;

pub use ledger::{LedgerStats, TradeLedger};
pub use sizing::{floor_to_step, position_quantity, round_price, round_to_step};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::strategy::ExplosionState;
use crate::types::Side;

/// Terminal close as seen by the risk controller
#[derive(Debug, Clone, Copy)]
pub struct CloseEvent {
    pub side: Side,
    /// Closed at the profit target
    pub target_hit: bool,
    pub profit: f64,
    pub at: DateTime<Utc>,
}

/// Risk state owned by the decision loop
#[derive(Debug, Clone, Serialize)]
pub struct RiskState {
    pub last_loss_direction: Option<Side>,
    pub loss_lock_bars_remaining: u32,
    pub daily_trade_count: u32,
    pub trading_day: Option<NaiveDate>,
    /// Unix milliseconds of the last terminal close
    pub last_close_at: Option<i64>,
    pub last_close_won: bool,
    #[serde(skip)]
    last_bar_ts: Option<i64>,
    #[serde(skip)]
    loss_lock_bars: u32,
    #[serde(skip)]
    explosion_cooldown_bars: u32,
}

impl RiskState {
    pub fn new(loss_lock_bars: u32, explosion_cooldown_bars: u32) -> Self {
        Self {
            last_loss_direction: None,
            loss_lock_bars_remaining: 0,
            daily_trade_count: 0,
            trading_day: None,
            last_close_at: None,
            last_close_won: false,
            last_bar_ts: None,
            loss_lock_bars,
            explosion_cooldown_bars,
        }
    }

    /// Once per cycle, before any decision. Counters decay only when the bar
    /// open time advances, so several polls inside one bar count once.
    /// Returns true on a new bar.
    pub fn on_cycle(
        &mut self,
        now: DateTime<Utc>,
        bar_ts: i64,
        explosion: &mut ExplosionState,
    ) -> bool {
        self.roll_day(now);

        let new_bar = match self.last_bar_ts {
            Some(prev) => bar_ts > prev,
            None => false,
        };
        if self.last_bar_ts.map_or(true, |prev| bar_ts > prev) {
            self.last_bar_ts = Some(bar_ts);
        }

        if new_bar {
            self.tick_lock();
            explosion.tick();
        }
        new_bar
    }

    fn tick_lock(&mut self) {
        if self.loss_lock_bars_remaining == 0 {
            return;
        }
        self.loss_lock_bars_remaining -= 1;
        if self.loss_lock_bars_remaining == 0 {
            if let Some(side) = self.last_loss_direction.take() {
                info!(side = %side, "🔓 Direction lock released");
            }
        }
    }

    /// Reset the daily counter when the UTC date changes
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.trading_day == Some(today) {
            return false;
        }
        if self.trading_day.is_some() {
            debug!(date = %today, trades = self.daily_trade_count, "New trading day");
        }
        self.trading_day = Some(today);
        self.daily_trade_count = 0;
        true
    }

    /// Side currently suppressed after a loss
    pub fn locked_side(&self) -> Option<Side> {
        if self.loss_lock_bars_remaining > 0 {
            self.last_loss_direction
        } else {
            None
        }
    }

    pub fn on_entry(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.daily_trade_count += 1;
    }

    /// Terminal close. Arms the direction lock on anything but a target hit
    /// and the explosion cooldown when an explosion is active.
    pub fn on_close(&mut self, event: &CloseEvent, explosion: &mut ExplosionState) {
        self.last_close_at = Some(event.at.timestamp_millis());
        self.last_close_won = event.profit > 0.0;

        if !event.target_hit {
            self.last_loss_direction = Some(event.side);
            self.loss_lock_bars_remaining = self.loss_lock_bars;
            info!(
                side = %event.side,
                bars = self.loss_lock_bars,
                "🔒 Direction lock armed"
            );
        }

        if explosion.detected {
            explosion.arm_cooldown(self.explosion_cooldown_bars);
            info!(
                bars = self.explosion_cooldown_bars,
                direction = ?explosion.direction,
                "💥 Explosion cooldown armed"
            );
        }
    }

    /// Seconds left on the post-close cooldown, if any
    pub fn cooldown_remaining_secs(
        &self,
        now_ms: i64,
        bar_secs: u64,
        win_bars: u32,
        loss_bars: u32,
    ) -> Option<u64> {
        let closed_at = self.last_close_at?;
        let bars = if self.last_close_won { win_bars } else { loss_bars };
        let duration_ms = bars as i64 * bar_secs as i64 * 1000;
        let elapsed = now_ms.saturating_sub(closed_at);
        if elapsed < duration_ms {
            let remaining_ms = duration_ms - elapsed;
            Some(((remaining_ms + 999) / 1000) as u64)
        } else {
            None
        }
    }
}

impl Default for RiskState {
    fn default() -> Self {
        Self::new(8, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BAR_MS: i64 = 900_000;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn loss(side: Side, ms: i64) -> CloseEvent {
        CloseEvent {
            side,
            target_hit: false,
            profit: -1.0,
            at: at(ms),
        }
    }

    #[test]
    fn test_loss_locks_side_for_configured_bars() {
        let mut risk = RiskState::new(3, 10);
        let mut explosion = ExplosionState::default();
        risk.on_cycle(at(0), 0, &mut explosion);
        risk.on_close(&loss(Side::Buy, 0), &mut explosion);
        assert_eq!(risk.locked_side(), Some(Side::Buy));

        for bar in 1..=2 {
            risk.on_cycle(at(bar * BAR_MS), bar * BAR_MS, &mut explosion);
            assert_eq!(risk.locked_side(), Some(Side::Buy));
        }
        risk.on_cycle(at(3 * BAR_MS), 3 * BAR_MS, &mut explosion);
        assert_eq!(risk.locked_side(), None);
        assert_eq!(risk.last_loss_direction, None);
    }

    #[test]
    fn test_lock_decays_once_per_bar() {
        let mut risk = RiskState::new(8, 10);
        let mut explosion = ExplosionState::default();
        risk.on_cycle(at(0), 0, &mut explosion);
        risk.on_close(&loss(Side::Sell, 0), &mut explosion);

        // Four polls inside the same bar
        for poll in 0..4 {
            risk.on_cycle(at(poll * 15_000), 0, &mut explosion);
        }
        assert_eq!(risk.loss_lock_bars_remaining, 8);

        risk.on_cycle(at(BAR_MS), BAR_MS, &mut explosion);
        assert_eq!(risk.loss_lock_bars_remaining, 7);
    }

    #[test]
    fn test_target_hit_does_not_lock() {
        let mut risk = RiskState::default();
        let mut explosion = ExplosionState::default();
        let event = CloseEvent {
            side: Side::Buy,
            target_hit: true,
            profit: 2.0,
            at: at(0),
        };
        risk.on_close(&event, &mut explosion);
        assert_eq!(risk.locked_side(), None);
        assert!(risk.last_close_won);
    }

    #[test]
    fn test_close_during_explosion_arms_cooldown() {
        let mut risk = RiskState::new(8, 10);
        let mut explosion = ExplosionState {
            detected: true,
            direction: Some(crate::types::Direction::Down),
            cooldown_bars_remaining: 0,
        };
        risk.on_close(&loss(Side::Buy, 0), &mut explosion);
        assert_eq!(explosion.cooldown_bars_remaining, 10);

        risk.on_cycle(at(0), 0, &mut explosion);
        risk.on_cycle(at(BAR_MS), BAR_MS, &mut explosion);
        assert_eq!(explosion.cooldown_bars_remaining, 9);
    }

    #[test]
    fn test_daily_counter_resets_on_utc_day_change() {
        let mut risk = RiskState::default();
        let day_one = Utc.with_ymd_and_hms(2026, 3, 1, 23, 50, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2026, 3, 2, 0, 5, 0).unwrap();

        risk.on_entry(day_one);
        risk.on_entry(day_one);
        assert_eq!(risk.daily_trade_count, 2);

        assert!(risk.roll_day(day_two));
        assert_eq!(risk.daily_trade_count, 0);
        risk.on_entry(day_two);
        assert_eq!(risk.daily_trade_count, 1);
    }

    #[test]
    fn test_cooldown_depends_on_last_result() {
        let mut risk = RiskState::default();
        let mut explosion = ExplosionState::default();
        assert_eq!(risk.cooldown_remaining_secs(0, 900, 3, 5), None);

        risk.on_close(&loss(Side::Buy, 0), &mut explosion);
        let closed_at = at(0).timestamp_millis();
        // Loss: 5 bars of 900s
        assert_eq!(
            risk.cooldown_remaining_secs(closed_at + 1_000, 900, 3, 5),
            Some(4_499)
        );
        assert_eq!(risk.cooldown_remaining_secs(closed_at + 4_500_000, 900, 3, 5), None);

        let win = CloseEvent {
            side: Side::Buy,
            target_hit: true,
            profit: 1.0,
            at: at(0),
        };
        risk.on_close(&win, &mut explosion);
        assert_eq!(risk.cooldown_remaining_secs(closed_at + 2_700_000, 900, 3, 5), None);
        assert!(risk.cooldown_remaining_secs(closed_at + 2_699_000, 900, 3, 5).is_some());
    }
}
