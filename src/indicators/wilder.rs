//! Streaming indicator primitives
//!
//! Every primitive keeps running state and is advanced with one bar at a time.
//! All of them are `Clone` so a forming bar can be evaluated on a copy without
//! committing it.

use std::collections::VecDeque;

use crate::types::{BollingerBands, Candle, SupertrendState};

/// True range of `bar` against the previous close
fn true_range(bar: &Candle, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(prev) => (bar.high - bar.low)
            .max((bar.high - prev).abs())
            .max((bar.low - prev).abs()),
        None => bar.high - bar.low,
    }
}

/// Exponential moving average seeded from the first sample
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    value: Option<f64>,
    samples: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            samples: 0,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        let next = match self.value {
            Some(prev) => (x - prev) * self.alpha + prev,
            None => x,
        };
        self.value = Some(next);
        self.samples += 1;
        self.value()
    }

    /// Current value once `period` samples have been seen
    pub fn value(&self) -> Option<f64> {
        if self.samples >= self.period {
            self.value
        } else {
            None
        }
    }
}

/// Average of the first `period` samples, then Wilder's smoothing
#[derive(Debug, Clone)]
struct WilderAverage {
    period: usize,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl WilderAverage {
    fn new(period: usize) -> Self {
        Self {
            period,
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                let period = self.period as f64;
                self.value = Some((prev * (period - 1.0) + x) / period);
            }
            None => {
                self.seed_sum += x;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }
}

/// RSI with Wilder's smoothing of gains and losses
#[derive(Debug, Clone)]
pub struct WilderRsi {
    prev_close: Option<f64>,
    avg_gain: WilderAverage,
    avg_loss: WilderAverage,
    value: Option<f64>,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            avg_gain: WilderAverage::new(period),
            avg_loss: WilderAverage::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let change = close - prev;
        let gain = self.avg_gain.update(change.max(0.0));
        let loss = self.avg_loss.update((-change).max(0.0));

        if let (Some(gain), Some(loss)) = (gain, loss) {
            let rsi = if gain < 1e-12 && loss < 1e-12 {
                50.0 // No movement
            } else if loss < 1e-12 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            };
            self.value = Some(rsi);
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Average True Range with Wilder's smoothing
#[derive(Debug, Clone)]
pub struct WilderAtr {
    prev_close: Option<f64>,
    average: WilderAverage,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            average: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, bar: &Candle) -> Option<f64> {
        let tr = true_range(bar, self.prev_close);
        self.prev_close = Some(bar.close);
        self.average.update(tr)
    }
}

/// Average Directional Index
#[derive(Debug, Clone)]
pub struct WilderAdx {
    period: usize,
    prev: Option<Candle>,
    /// Running sums (TR, +DM, -DM) using Wilder's running-total smoothing
    smoothed: Option<(f64, f64, f64)>,
    seed: (f64, f64, f64),
    seed_count: usize,
    dx: WilderAverage,
}

impl WilderAdx {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            smoothed: None,
            seed: (0.0, 0.0, 0.0),
            seed_count: 0,
            dx: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, bar: &Candle) -> Option<f64> {
        let Some(prev) = self.prev.replace(*bar) else {
            return None;
        };

        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
        let tr = true_range(bar, Some(prev.close));

        let period = self.period as f64;
        let (s_tr, s_plus, s_minus) = match self.smoothed {
            Some((s_tr, s_plus, s_minus)) => (
                s_tr - s_tr / period + tr,
                s_plus - s_plus / period + plus_dm,
                s_minus - s_minus / period + minus_dm,
            ),
            None => {
                self.seed.0 += tr;
                self.seed.1 += plus_dm;
                self.seed.2 += minus_dm;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return None;
                }
                self.seed
            }
        };
        self.smoothed = Some((s_tr, s_plus, s_minus));

        if s_tr <= 0.0 {
            return self.dx.value;
        }
        let plus_di = 100.0 * s_plus / s_tr;
        let minus_di = 100.0 * s_minus / s_tr;
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };
        self.dx.update(dx)
    }
}

/// Fixed-capacity window of the most recent samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, x: f64) {
        self.values.push_back(x);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Sample `n` positions back from the newest (0 = newest)
    pub fn back(&self, n: usize) -> Option<f64> {
        let len = self.values.len();
        if n < len {
            self.values.get(len - 1 - n).copied()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &f64> + ExactSizeIterator {
        self.values.iter()
    }
}

/// Bollinger Bands over a rolling window (sample standard deviation)
#[derive(Debug, Clone)]
pub struct RollingBollinger {
    window: RollingWindow,
    std_mult: f64,
}

impl RollingBollinger {
    pub fn new(period: usize, std_mult: f64) -> Self {
        Self {
            window: RollingWindow::new(period),
            std_mult,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BollingerBands> {
        self.window.push(close);
        if !self.window.is_full() || self.window.len() < 2 {
            return None;
        }

        let n = self.window.len() as f64;
        let mid = self.window.mean()?;
        let variance = self.window.iter().map(|c| (c - mid).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();

        Some(BollingerBands {
            upper: mid + self.std_mult * std,
            mid,
            lower: mid - self.std_mult * std,
        })
    }
}

/// Supertrend line/direction with its own ATR
#[derive(Debug, Clone)]
pub struct Supertrend {
    multiplier: f64,
    atr: WilderAtr,
    /// Final (upper, lower) bands of the previous bar
    bands: Option<(f64, f64)>,
    direction: i8,
}

impl Supertrend {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            multiplier,
            atr: WilderAtr::new(period),
            bands: None,
            direction: 1,
        }
    }

    pub fn update(&mut self, bar: &Candle) -> Option<SupertrendState> {
        let atr = self.atr.update(bar)?;
        let hl2 = (bar.high + bar.low) / 2.0;
        let mut upper = hl2 + self.multiplier * atr;
        let mut lower = hl2 - self.multiplier * atr;

        if let Some((prev_upper, prev_lower)) = self.bands {
            if bar.close > prev_upper {
                self.direction = 1;
            } else if bar.close < prev_lower {
                self.direction = -1;
            } else {
                // Bands only ratchet while the direction holds
                if self.direction == 1 && lower < prev_lower {
                    lower = prev_lower;
                }
                if self.direction == -1 && upper > prev_upper {
                    upper = prev_upper;
                }
            }
        }
        self.bands = Some((upper, lower));

        let line = if self.direction == 1 { lower } else { upper };
        Some(SupertrendState {
            line,
            direction: self.direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_ema_seeds_from_first_sample() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(10.0), None);
        assert_eq!(ema.update(10.0), None);
        let v = ema.update(14.0).unwrap();
        // alpha = 0.5 -> 10 + (14 - 10) * 0.5
        assert!((v - 12.0).abs() < 1e-12, "Expected 12.0, got {}", v);
    }

    #[test]
    fn test_rsi_extremes() {
        let mut up = WilderRsi::new(5);
        let mut down = WilderRsi::new(5);
        let mut flat = WilderRsi::new(5);
        for i in 0..10 {
            up.update(100.0 + i as f64);
            down.update(100.0 - i as f64);
            flat.update(100.0);
        }
        assert_eq!(up.value(), Some(100.0));
        assert!(down.value().unwrap() < 1e-9);
        assert_eq!(flat.value(), Some(50.0));
    }

    #[test]
    fn test_rsi_wilder_smoothing_matches_manual() {
        let mut rsi = WilderRsi::new(2);
        rsi.update(10.0);
        rsi.update(11.0); // +1
        let seeded = rsi.update(10.5).unwrap(); // -0.5 -> gain 0.5, loss 0.25
        assert!((seeded - 100.0 * (2.0 / 3.0)).abs() < 1e-9, "got {}", seeded);

        let next = rsi.update(11.5).unwrap(); // +1 -> gain 0.75, loss 0.125
        let expected = 100.0 - 100.0 / (1.0 + 0.75 / 0.125);
        assert!((next - expected).abs() < 1e-9, "Expected {}, got {}", expected, next);
    }

    #[test]
    fn test_atr_constant_range() {
        let mut atr = WilderAtr::new(3);
        let mut last = None;
        for _ in 0..6 {
            last = atr.update(&bar(1.02, 1.0, 1.01));
        }
        assert!((last.unwrap() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_adx_strong_trend_is_high() {
        let mut adx = WilderAdx::new(5);
        let mut last = None;
        for i in 0..30 {
            let base = 1.0 + i as f64 * 0.01;
            last = adx.update(&bar(base + 0.005, base - 0.005, base));
        }
        let value = last.unwrap();
        assert!(value > 90.0, "Expected a one-way trend ADX above 90, got {:.2}", value);
    }

    #[test]
    fn test_adx_needs_two_periods() {
        let mut adx = WilderAdx::new(5);
        let mut ready_at = None;
        for i in 0..20 {
            let base = 1.0 + (i % 2) as f64 * 0.01;
            if adx.update(&bar(base + 0.01, base - 0.01, base)).is_some() && ready_at.is_none() {
                ready_at = Some(i);
            }
        }
        // period bars of DM seeding (after the first bar) + period DX samples
        assert_eq!(ready_at, Some(9));
    }

    #[test]
    fn test_bollinger_sample_std() {
        let mut bb = RollingBollinger::new(4, 2.0);
        let mut out = None;
        for c in [1.0, 2.0, 3.0, 4.0] {
            out = bb.update(c);
        }
        let bands = out.unwrap();
        let std = (5.0f64 / 3.0).sqrt();
        assert!((bands.mid - 2.5).abs() < 1e-12);
        assert!((bands.upper - (2.5 + 2.0 * std)).abs() < 1e-12);
        assert!((bands.lower - (2.5 - 2.0 * std)).abs() < 1e-12);
    }

    #[test]
    fn test_supertrend_flips_on_breakdown() {
        let mut st = Supertrend::new(3, 1.0);
        let mut state = None;
        for i in 0..10 {
            let base = 1.0 + i as f64 * 0.01;
            state = st.update(&bar(base + 0.005, base - 0.005, base));
        }
        let up = state.unwrap();
        assert_eq!(up.direction, 1);
        assert!(up.line < 1.09);

        let crash = st.update(&bar(0.95, 0.80, 0.81)).unwrap();
        assert_eq!(crash.direction, -1);
        assert!(crash.line > 0.81);
    }

    #[test]
    fn test_rolling_window_back_and_extremes() {
        let mut w = RollingWindow::new(3);
        for x in [5.0, 1.0, 7.0, 3.0] {
            w.push(x);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.max(), Some(7.0));
        assert_eq!(w.min(), Some(1.0));
        assert_eq!(w.back(0), Some(3.0));
        assert_eq!(w.back(2), Some(1.0));
        assert_eq!(w.back(3), None);
    }

    #[test]
    fn test_rolling_window_iterates_newest_first_in_reverse() {
        let mut w = RollingWindow::new(4);
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            w.push(x);
        }
        let newest: Vec<f64> = w.iter().rev().take(2).copied().collect();
        assert_eq!(newest, vec![5.0, 4.0]);
        assert_eq!(w.iter().len(), 4);
    }
}
