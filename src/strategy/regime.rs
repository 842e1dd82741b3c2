//! Market regime classification from EMA alignment and ADX strength

use serde::{Deserialize, Serialize};
use std::fmt;

/// Market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
}

impl Default for Regime {
    fn default() -> Self {
        Regime::Ranging
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::TrendingUp => write!(f, "TRENDING_UP"),
            Regime::TrendingDown => write!(f, "TRENDING_DOWN"),
            Regime::Ranging => write!(f, "RANGING"),
        }
    }
}

/// Trending when the EMAs are separated and ADX reaches `adx_min_trend`,
/// ranging otherwise (including equal EMAs and NaN inputs).
pub fn classify_regime(ema50: f64, ema200: f64, adx: f64, adx_min_trend: f64) -> Regime {
    let strong = adx >= adx_min_trend;
    if strong && ema50 > ema200 {
        Regime::TrendingUp
    } else if strong && ema50 < ema200 {
        Regime::TrendingDown
    } else {
        Regime::Ranging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trending_up() {
        assert_eq!(classify_regime(0.071, 0.069, 18.0, 15.0), Regime::TrendingUp);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(classify_regime(0.069, 0.071, 15.0, 15.0), Regime::TrendingDown);
        assert_eq!(classify_regime(0.069, 0.071, 14.99, 15.0), Regime::Ranging);
    }

    #[test]
    fn test_equal_emas_are_ranging() {
        assert_eq!(classify_regime(0.07, 0.07, 40.0, 15.0), Regime::Ranging);
    }

    #[test]
    fn test_total_over_grid() {
        let values = [f64::NAN, -1.0, 0.0, 0.069, 0.07, 0.071, 1e9];
        let adx_values = [f64::NAN, 0.0, 14.0, 15.0, 16.0, 100.0];
        for &fast in &values {
            for &slow in &values {
                for &adx in &adx_values {
                    let regime = classify_regime(fast, slow, adx, 15.0);
                    let expected_up = adx >= 15.0 && fast > slow;
                    let expected_down = adx >= 15.0 && fast < slow;
                    match regime {
                        Regime::TrendingUp => assert!(expected_up),
                        Regime::TrendingDown => assert!(expected_down),
                        Regime::Ranging => assert!(!expected_up && !expected_down),
                    }
                }
            }
        }
    }
}
