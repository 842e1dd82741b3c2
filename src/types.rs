//! Core types used throughout RegimeBot
//!
//! Defines common data structures for candles, market snapshots, orders and trades.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction on the futures contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that flattens a position opened on `self`
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for longs, -1 for shorts
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    /// Exchange wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "LONG" => Some(Side::Buy),
            "SELL" | "SHORT" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price direction of an abnormal bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// The entry side that trades with this move
    pub fn aligned_side(&self) -> Side {
        match self {
            Direction::Up => Side::Buy,
            Direction::Down => Side::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Kline interval supported by the perpetual swap API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
}

impl Interval {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Interval::Min1 => 60,
            Interval::Min5 => 300,
            Interval::Min15 => 900,
            Interval::Min30 => 1_800,
            Interval::Hour1 => 3_600,
            Interval::Hour4 => 14_400,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" => Some(Interval::Min1),
            "5m" => Some(Interval::Min5),
            "15m" => Some(Interval::Min15),
            "30m" => Some(Interval::Min30),
            "1h" => Some(Interval::Hour1),
            "4h" => Some(Interval::Hour4),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Min1 => write!(f, "1m"),
            Interval::Min5 => write!(f, "5m"),
            Interval::Min15 => write!(f, "15m"),
            Interval::Min30 => write!(f, "30m"),
            Interval::Hour1 => write!(f, "1h"),
            Interval::Hour4 => write!(f, "4h"),
        }
    }
}

/// OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time (Unix milliseconds)
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bollinger band triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

/// Supertrend line and its direction (+1 bullish, -1 bearish)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SupertrendState {
    pub line: f64,
    pub direction: i8,
}

/// Immutable per-cycle market snapshot consumed by the decision core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    /// Open time of the bar being evaluated (Unix milliseconds)
    pub ts: i64,
    /// Latest traded price (close of the forming bar)
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Close of the previous bar, if any
    pub prev_close: Option<f64>,
    /// Close three bars back, if any
    pub close_3_back: Option<f64>,
    pub atr: f64,
    /// Average ATR% over the trailing explosion window (None while history is short)
    pub avg_atr_pct: Option<f64>,
    pub ema50: f64,
    pub ema200: f64,
    pub rsi: f64,
    pub rsi_prev: f64,
    pub adx: f64,
    pub bollinger: BollingerBands,
    pub supertrend: SupertrendState,
    /// Highest high of the breakout lookback window
    pub breakout_high: f64,
    /// Lowest low of the breakout lookback window
    pub breakout_low: f64,
    /// (max - min) / min * 100 over the range window of closes
    pub range_pct: f64,
}

impl MarketState {
    /// ATR as a fraction of price
    pub fn atr_pct(&self) -> f64 {
        if self.price > 0.0 {
            self.atr / self.price
        } else {
            0.0
        }
    }

    /// Absolute close-to-close move of the current bar
    pub fn bar_move(&self) -> Option<f64> {
        self.prev_close.map(|prev| (self.close - prev).abs())
    }
}

/// Order kinds understood by the execution gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    TakeProfitMarket,
    StopMarket,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderKind::StopMarket => "STOP_MARKET",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger entry for a realized (partial or full) exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Exit reason label (TP, SL, RSI_OVERBOUGHT, NO_TP, ...)
    pub reason: String,
    pub profit: f64,
    /// Unix milliseconds
    pub timestamp: i64,
    /// True when the position stayed open after this exit
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_roundtrip() {
        for s in ["1m", "5m", "15m", "30m", "1h", "4h"] {
            let interval = Interval::from_str(s).unwrap();
            assert_eq!(interval.to_string(), s);
        }
        assert_eq!(Interval::Min15.duration_secs(), 900);
        assert!(Interval::from_str("2d").is_none());
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(Side::from_str("long"), Some(Side::Buy));
        assert_eq!(Direction::Down.aligned_side(), Side::Sell);
    }

    #[test]
    fn test_atr_pct_guards_zero_price() {
        let state = MarketState {
            price: 0.0,
            atr: 0.01,
            ..Default::default()
        };
        assert_eq!(state.atr_pct(), 0.0);
    }
}
