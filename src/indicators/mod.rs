//! Indicator Pipeline - incremental technical indicators
//!
//! Turns a kline window into a [`MarketState`] snapshot:
//! - EMA fast/slow (seeded from the first close)
//! - RSI, ATR and ADX with Wilder's smoothing
//! - Bollinger Bands (sample std)
//! - Supertrend line and direction
//! - Breakout high/low over the prior N closed bars
//! - Price-range percentage over the last N closes
//! - ATR% history for the explosion detector
//!
//! Closed bars are committed exactly once. The still-forming last bar is
//! evaluated on a cloned state on every call, so repeated polls within the
//! same bar cost O(1) instead of a full recomputation.

pub mod wilder;

pub use wilder::{Ema, RollingBollinger, RollingWindow, Supertrend, WilderAdx, WilderAtr, WilderRsi};

use tracing::debug;

use crate::config::{ExplosionConfig, IndicatorConfig, StrategyConfig};
use crate::types::{BollingerBands, Candle, MarketState, SupertrendState};

/// Window sizes consumed by the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub indicators: IndicatorConfig,
    pub breakout_lookback: usize,
    pub atr_pct_window: usize,
}

impl PipelineSettings {
    pub fn new(
        indicators: &IndicatorConfig,
        strategy: &StrategyConfig,
        explosion: &ExplosionConfig,
    ) -> Self {
        Self {
            indicators: indicators.clone(),
            breakout_lookback: strategy.breakout_lookback,
            atr_pct_window: explosion.atr_pct_window,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::new(
            &IndicatorConfig::default(),
            &StrategyConfig::default(),
            &ExplosionConfig::default(),
        )
    }
}

/// Indicator values after one bar
#[derive(Debug, Clone, Copy, Default)]
struct BarValues {
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    rsi: Option<f64>,
    atr: Option<f64>,
    adx: Option<f64>,
    bollinger: Option<BollingerBands>,
    supertrend: Option<SupertrendState>,
}

#[derive(Debug, Clone)]
struct PipelineState {
    bars: usize,
    last_open_time: Option<i64>,
    ema_fast: Ema,
    ema_slow: Ema,
    rsi: WilderRsi,
    atr: WilderAtr,
    adx: WilderAdx,
    bollinger: RollingBollinger,
    supertrend: Supertrend,
    highs: RollingWindow,
    lows: RollingWindow,
    closes: RollingWindow,
    atr_pct: RollingWindow,
    last: BarValues,
}

impl PipelineState {
    fn new(settings: &PipelineSettings) -> Self {
        let ind = &settings.indicators;
        Self {
            bars: 0,
            last_open_time: None,
            ema_fast: Ema::new(ind.ema_fast),
            ema_slow: Ema::new(ind.ema_slow),
            rsi: WilderRsi::new(ind.rsi_period),
            atr: WilderAtr::new(ind.atr_period),
            adx: WilderAdx::new(ind.adx_period),
            bollinger: RollingBollinger::new(ind.bb_period, ind.bb_std),
            supertrend: Supertrend::new(ind.supertrend_period, ind.supertrend_multiplier),
            highs: RollingWindow::new(settings.breakout_lookback),
            lows: RollingWindow::new(settings.breakout_lookback),
            // Range % and the three-bar move both read from here
            closes: RollingWindow::new(ind.range_window.max(4)),
            atr_pct: RollingWindow::new(settings.atr_pct_window),
            last: BarValues::default(),
        }
    }

    fn push(&mut self, bar: &Candle) -> BarValues {
        let atr = self.atr.update(bar);
        let values = BarValues {
            ema_fast: self.ema_fast.update(bar.close),
            ema_slow: self.ema_slow.update(bar.close),
            rsi: self.rsi.update(bar.close),
            atr,
            adx: self.adx.update(bar),
            bollinger: self.bollinger.update(bar.close),
            supertrend: self.supertrend.update(bar),
        };

        if let Some(atr) = atr {
            if bar.close > 0.0 {
                self.atr_pct.push(atr / bar.close);
            }
        }
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.closes.push(bar.close);
        self.bars += 1;
        self.last_open_time = Some(bar.open_time);
        self.last = values;
        values
    }
}

/// Incremental indicator pipeline for one symbol/interval
#[derive(Debug, Clone)]
pub struct IndicatorPipeline {
    settings: PipelineSettings,
    state: PipelineState,
}

impl IndicatorPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let state = PipelineState::new(&settings);
        Self { settings, state }
    }

    /// Number of closed bars committed so far
    pub fn committed_bars(&self) -> usize {
        self.state.bars
    }

    /// Commit the closed bars of `candles` (all but the last) that have not
    /// been seen yet. A window that no longer overlaps the committed history
    /// triggers a full replay.
    fn commit_closed(&mut self, closed: &[Candle]) {
        let resume_from = match self.state.last_open_time {
            Some(last) => closed.iter().position(|c| c.open_time == last).map(|i| i + 1),
            None => None,
        };

        let start = match resume_from {
            Some(i) => i,
            None => {
                if self.state.bars > 0 {
                    debug!(
                        committed = self.state.bars,
                        "Indicator history gap, replaying window"
                    );
                }
                self.state = PipelineState::new(&self.settings);
                0
            }
        };

        for bar in &closed[start..] {
            self.state.push(bar);
        }
    }

    /// Evaluate the window. Candles must be sorted by open time; the last
    /// candle is treated as the forming bar. Returns `None` while any
    /// indicator is still warming up.
    pub fn evaluate(&mut self, candles: &[Candle]) -> Option<MarketState> {
        let (forming, closed) = candles.split_last()?;
        self.commit_closed(closed);

        let committed = &self.state;
        let rsi_prev = committed.last.rsi?;
        let prev_close = committed.closes.back(0);
        let close_3_back = committed.closes.back(2);
        let breakout_high = committed.highs.max()?;
        let breakout_low = committed.lows.min()?;

        let mut tentative = committed.clone();
        let values = tentative.push(forming);

        let avg_atr_pct = if tentative.atr_pct.is_full() {
            tentative.atr_pct.mean()
        } else {
            None
        };

        let range_window = self.settings.indicators.range_window;
        let range_pct = if tentative.bars >= range_window {
            let recent: Vec<f64> = tentative.closes.iter().rev().take(range_window).copied().collect();
            let highest = recent.iter().copied().fold(f64::MIN, f64::max);
            let lowest = recent.iter().copied().fold(f64::MAX, f64::min);
            if lowest > 0.0 {
                (highest - lowest) / lowest * 100.0
            } else {
                0.0
            }
        } else {
            0.0
        };

        let state = MarketState {
            ts: forming.open_time,
            price: forming.close,
            open: forming.open,
            high: forming.high,
            low: forming.low,
            close: forming.close,
            prev_close,
            close_3_back,
            atr: values.atr?,
            avg_atr_pct,
            ema50: values.ema_fast?,
            ema200: values.ema_slow?,
            rsi: values.rsi?,
            rsi_prev,
            adx: values.adx?,
            bollinger: values.bollinger?,
            supertrend: values.supertrend?,
            breakout_high,
            breakout_low,
            range_pct,
        };

        debug!(
            ts = state.ts,
            price = state.price,
            atr = state.atr,
            rsi = state.rsi,
            adx = state.adx,
            "Indicators evaluated"
        );

        Some(state)
    }
}

impl Default for IndicatorPipeline {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}
