//! Market data - kline sources and per-cycle snapshots
//!
//! A [`CandleSource`] returns the raw kline window; [`MarketFeed`] sorts it,
//! runs it through the incremental [`IndicatorPipeline`] and hands the
//! decision loop a [`MarketState`] or an "insufficient data" outcome.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::indicators::IndicatorPipeline;
use crate::types::{Candle, Interval, MarketState};

/// Market data failures. Neither is fatal to the loop.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("insufficient data: have {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("kline fetch failed: {0:#}")]
    Fetch(#[from] anyhow::Error),
}

/// Source of OHLC windows (exchange REST, replay files, tests)
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Most recent `limit` klines, the last one possibly still forming
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}

/// Kline fetch + indicator pipeline for one symbol
pub struct MarketFeed {
    symbol: String,
    interval: Interval,
    lookback: usize,
    min_bars: usize,
    pipeline: IndicatorPipeline,
}

impl MarketFeed {
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        lookback: usize,
        min_bars: usize,
        pipeline: IndicatorPipeline,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            lookback,
            min_bars,
            pipeline,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Fetch the window and compute this cycle's snapshot
    pub async fn snapshot(
        &mut self,
        source: &dyn CandleSource,
    ) -> Result<MarketState, MarketDataError> {
        let candles = source
            .fetch_klines(&self.symbol, self.interval, self.lookback)
            .await?;
        self.evaluate(candles)
    }

    /// Compute a snapshot from an already fetched window
    pub fn evaluate(&mut self, mut candles: Vec<Candle>) -> Result<MarketState, MarketDataError> {
        candles.retain(|c| c.close > 0.0 && c.high >= c.low);
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        if candles.len() < self.min_bars {
            return Err(MarketDataError::InsufficientData {
                have: candles.len(),
                need: self.min_bars,
            });
        }

        match self.pipeline.evaluate(&candles) {
            Some(state) => Ok(state),
            None => {
                debug!(
                    bars = candles.len(),
                    committed = self.pipeline.committed_bars(),
                    "Indicators still warming up"
                );
                Err(MarketDataError::InsufficientData {
                    have: candles.len(),
                    need: self.min_bars,
                })
            }
        }
    }
}
