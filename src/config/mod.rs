//! Configuration management for RegimeBot
//!
//! Loads built-in defaults, then optional `config/default` and `config/local`
//! files, then `REGIMEBOT__SECTION__KEY` environment overrides (after `.env`).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::Interval;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub exchange: ExchangeConfig,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyConfig,
    pub explosion: ExplosionConfig,
    pub filters: FilterConfig,
    pub position: PositionConfig,
    pub risk: RiskConfig,
    pub persistence: PersistenceConfig,
    pub paper: PaperConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
}

/// Inclusive numeric band
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot version tag for logging and CSV
    pub tag: String,
    /// Perpetual contract symbol (e.g. DOGE-USDT)
    pub symbol: String,
    /// Kline interval (1m, 5m, 15m, 30m, 1h, 4h)
    pub interval: String,
    /// Number of klines requested per cycle
    pub lookback: usize,
    /// Minimum closed history required before deciding (slow EMA window)
    pub min_bars: usize,
    /// Dry run mode (paper gateway, no real orders)
    pub dry_run: bool,
    /// Poll interval while a position is open
    pub poll_open_secs: u64,
    /// Poll interval while flat
    pub poll_flat_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tag: env!("CARGO_PKG_VERSION").to_string(),
            symbol: "DOGE-USDT".to_string(),
            interval: "15m".to_string(),
            lookback: 250,
            min_bars: 200,
            dry_run: true,
            poll_open_secs: 15,
            poll_flat_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// REST endpoint
    pub base_url: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
    /// Position mode sent with every order (one-way = BOTH)
    pub position_side: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open-api.bingx.com".to_string(),
            timeout_secs: 10,
            position_side: "BOTH".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Bollinger Bands period
    pub bb_period: usize,
    /// Bollinger Bands standard deviation multiplier
    pub bb_std: f64,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    /// Closes used for the price-range percentage
    pub range_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            atr_period: 14,
            adx_period: 14,
            ema_fast: 50,
            ema_slow: 200,
            bb_period: 20,
            bb_std: 2.0,
            supertrend_period: 10,
            supertrend_multiplier: 3.0,
            range_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// ADX at or above which an EMA alignment counts as a trend
    pub adx_min_trend: f64,
    /// RSI band for trend-following longs
    pub trend_long_rsi: Band,
    /// RSI band for trend-following shorts
    pub trend_short_rsi: Band,
    /// Ranging long requires RSI (current and previous) below this
    pub ranging_long_rsi_max: f64,
    /// Ranging short requires RSI (current and previous) above this
    pub ranging_short_rsi_min: f64,
    /// Bars in the breakout high/low window
    pub breakout_lookback: usize,
    /// Breakout long requires RSI below this
    pub breakout_long_rsi_max: f64,
    /// Breakout short requires RSI above this
    pub breakout_short_rsi_min: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            adx_min_trend: 15.0,
            trend_long_rsi: Band::new(45.0, 65.0),
            trend_short_rsi: Band::new(35.0, 55.0),
            ranging_long_rsi_max: 40.0,
            ranging_short_rsi_min: 60.0,
            breakout_lookback: 20,
            breakout_long_rsi_max: 72.0,
            breakout_short_rsi_min: 28.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplosionConfig {
    /// Close-to-close move in ATR multiples
    pub move_atr_mult: f64,
    /// Bar range (high - low) in ATR multiples
    pub range_atr_mult: f64,
    /// Current ATR% relative to its trailing average
    pub atr_pct_ratio: f64,
    /// Bars in the trailing ATR% average
    pub atr_pct_window: usize,
    /// Bars of suppression armed when a position closes during an explosion
    pub cooldown_bars: u32,
}

impl Default for ExplosionConfig {
    fn default() -> Self {
        Self {
            move_atr_mult: 2.2,
            range_atr_mult: 2.5,
            atr_pct_ratio: 1.5,
            atr_pct_window: 20,
            cooldown_bars: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Tradable ATR/price band (fractions, not percent)
    pub atr_pct_band: Band,
    /// ADX floor below which nothing is traded
    pub min_adx: f64,
    /// Single-bar move in ATR multiples that blocks entries
    pub spike_atr_mult: f64,
    /// Minimum distance from the open entry, in ATR multiples
    pub anti_reentry_atr_mult: f64,
    /// Max close-to-close move over three bars in percent (0 disables)
    pub max_three_bar_move_pct: f64,
    /// Bars to wait after a winning close
    pub cooldown_win_bars: u32,
    /// Bars to wait after a losing close
    pub cooldown_loss_bars: u32,
    /// Entries allowed per UTC day (0 disables the cap)
    pub max_daily_trades: u32,
    /// Minimum price-range percentage over the range window
    pub min_range_pct: f64,
    /// Minimum estimated take-profit distance in percent of price
    pub min_tp_pct: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            atr_pct_band: Band::new(0.004, 0.05),
            min_adx: 12.0,
            spike_atr_mult: 1.8,
            anti_reentry_atr_mult: 0.25,
            max_three_bar_move_pct: 3.0,
            cooldown_win_bars: 3,
            cooldown_loss_bars: 5,
            max_daily_trades: 0,
            min_range_pct: 1.5,
            min_tp_pct: 0.75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Initial stop distance in ATR multiples
    pub sl_atr_mult: f64,
    /// Take-profit distance in ATR multiples
    pub tp_atr_mult: f64,
    /// Favorable move that promotes the stop to break-even
    pub tp1_atr_mult: f64,
    /// Favorable move that activates trailing
    pub tp2_atr_mult: f64,
    /// Trailing distance in ATR multiples
    pub trail_atr_mult: f64,
    /// Absolute price tolerance for TP/SL touch detection
    pub price_tolerance: f64,
    /// Long early exit when RSI is above this
    pub early_exit_rsi_overbought: f64,
    /// Short early exit when RSI is below this
    pub early_exit_rsi_oversold: f64,
    /// Early exit requires ADX below this
    pub early_exit_adx_max: f64,
    /// Fraction of remaining quantity closed by an early exit
    pub partial_close_fraction: f64,
    /// Exchange quantity step
    pub quantity_step: f64,
    /// Decimal places used for TP/SL prices
    pub price_decimals: u32,
    /// ATR floor used for protective levels
    pub min_atr: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            sl_atr_mult: 1.6,
            tp_atr_mult: 3.0,
            tp1_atr_mult: 1.0,
            tp2_atr_mult: 2.0,
            trail_atr_mult: 1.0,
            price_tolerance: 0.0005,
            early_exit_rsi_overbought: 78.0,
            early_exit_rsi_oversold: 22.0,
            early_exit_adx_max: 12.0,
            partial_close_fraction: 0.5,
            quantity_step: 0.01,
            price_decimals: 5,
            min_atr: 0.001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Bars during which a losing side stays locked
    pub loss_lock_bars: u32,
    /// Exchange leverage
    pub leverage: f64,
    /// Fraction of (initial balance + compound profit) committed per trade
    pub trade_portion: f64,
    /// Initial sizing basis; the startup balance is used when unset
    pub initial_balance: Option<f64>,
    /// Trade ledger capacity
    pub ledger_capacity: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            loss_lock_bars: 8,
            leverage: 10.0,
            trade_portion: 0.60,
            initial_balance: None,
            ledger_capacity: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable CSV logging
    pub csv_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            csv_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting virtual balance in USDT
    pub initial_balance: f64,
    /// Simulated slippage in basis points
    pub slippage_bps: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            slippage_bps: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (REGIMEBOT__*)
            .add_source(
                Environment::with_prefix("REGIMEBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Parsed kline interval
    pub fn interval(&self) -> Result<Interval> {
        Interval::from_str(&self.bot.interval)
            .with_context(|| format!("Unsupported interval '{}'", self.bot.interval))
    }

    /// Reject inconsistent tunables once, at startup
    pub fn validate(&self) -> Result<()> {
        self.interval()?;

        if self.bot.symbol.trim().is_empty() {
            bail!("bot.symbol must not be empty");
        }
        if self.bot.lookback < self.bot.min_bars {
            bail!(
                "bot.lookback ({}) must be >= bot.min_bars ({})",
                self.bot.lookback,
                self.bot.min_bars
            );
        }
        if self.bot.min_bars < self.indicators.ema_slow {
            bail!(
                "bot.min_bars ({}) must cover the slow EMA window ({})",
                self.bot.min_bars,
                self.indicators.ema_slow
            );
        }
        if self.bot.poll_open_secs == 0 || self.bot.poll_flat_secs == 0 {
            bail!("poll intervals must be positive");
        }

        let periods = [
            ("indicators.rsi_period", self.indicators.rsi_period),
            ("indicators.atr_period", self.indicators.atr_period),
            ("indicators.adx_period", self.indicators.adx_period),
            ("indicators.ema_fast", self.indicators.ema_fast),
            ("indicators.bb_period", self.indicators.bb_period),
            ("indicators.supertrend_period", self.indicators.supertrend_period),
            ("indicators.range_window", self.indicators.range_window),
            ("strategy.breakout_lookback", self.strategy.breakout_lookback),
            ("explosion.atr_pct_window", self.explosion.atr_pct_window),
        ];
        for (name, value) in periods {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }
        if self.indicators.ema_fast >= self.indicators.ema_slow {
            bail!("indicators.ema_fast must be shorter than indicators.ema_slow");
        }

        for (name, band) in [
            ("strategy.trend_long_rsi", self.strategy.trend_long_rsi),
            ("strategy.trend_short_rsi", self.strategy.trend_short_rsi),
            ("filters.atr_pct_band", self.filters.atr_pct_band),
        ] {
            if band.min > band.max {
                bail!("{} has min {} above max {}", name, band.min, band.max);
            }
        }

        let multiples = [
            ("explosion.move_atr_mult", self.explosion.move_atr_mult),
            ("explosion.range_atr_mult", self.explosion.range_atr_mult),
            ("explosion.atr_pct_ratio", self.explosion.atr_pct_ratio),
            ("filters.spike_atr_mult", self.filters.spike_atr_mult),
            ("position.sl_atr_mult", self.position.sl_atr_mult),
            ("position.tp_atr_mult", self.position.tp_atr_mult),
            ("position.tp1_atr_mult", self.position.tp1_atr_mult),
            ("position.tp2_atr_mult", self.position.tp2_atr_mult),
            ("position.trail_atr_mult", self.position.trail_atr_mult),
            ("position.quantity_step", self.position.quantity_step),
            ("risk.leverage", self.risk.leverage),
        ];
        for (name, value) in multiples {
            if !(value > 0.0) {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        if self.position.tp2_atr_mult < self.position.tp1_atr_mult {
            bail!("position.tp2_atr_mult must be >= position.tp1_atr_mult");
        }
        if self.position.price_tolerance < 0.0 || self.position.min_atr < 0.0 {
            bail!("position.price_tolerance and position.min_atr must be non-negative");
        }
        let tp1_floor = self.position.tp1_atr_mult * self.position.min_atr;
        if self.position.price_tolerance >= tp1_floor {
            bail!(
                "position.price_tolerance ({}) must be below tp1_atr_mult * min_atr ({})",
                self.position.price_tolerance,
                tp1_floor
            );
        }
        let fraction = self.position.partial_close_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            bail!("position.partial_close_fraction must be in (0, 1], got {}", fraction);
        }
        let portion = self.risk.trade_portion;
        if !(portion > 0.0 && portion <= 1.0) {
            bail!("risk.trade_portion must be in (0, 1], got {}", portion);
        }
        if let Some(initial) = self.risk.initial_balance {
            if !(initial > 0.0) {
                bail!("risk.initial_balance must be positive when set");
            }
        }
        if self.risk.ledger_capacity == 0 {
            bail!("risk.ledger_capacity must be positive");
        }

        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} symbol={} interval={} dry_run={} leverage={}x portion={:.2} adx_trend={:.1}",
            self.bot.tag,
            self.bot.symbol,
            self.bot.interval,
            self.bot.dry_run,
            self.risk.leverage,
            self.risk.trade_portion,
            self.strategy.adx_min_trend
        )
    }

    /// Validate required environment variables for live trading
    pub fn validate_env(&self) -> Result<()> {
        if self.bot.dry_run {
            return Ok(());
        }

        for var in ["BINGX_API_KEY", "BINGX_API_SECRET"] {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {}
                _ => bail!("Required environment variable {} is not set", var),
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bot.symbol, "DOGE-USDT");
        assert_eq!(config.interval().unwrap(), Interval::Min15);
        assert_eq!(config.filters.atr_pct_band, Band::new(0.004, 0.05));
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut config = AppConfig::default();
        config.filters.atr_pct_band = Band::new(0.05, 0.004);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("filters.atr_pct_band"), "got: {}", err);
    }

    #[test]
    fn test_validate_rejects_tp2_below_tp1() {
        let mut config = AppConfig::default();
        config.position.tp2_atr_mult = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tolerance_reaching_tp1() {
        let mut config = AppConfig::default();
        config.position.min_atr = 0.0004;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("position.price_tolerance"), "got: {}", err);

        config.position.min_atr = 0.0006;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_interval_and_fraction() {
        let mut config = AppConfig::default();
        config.bot.interval = "7m".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.position.partial_close_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_history() {
        let mut config = AppConfig::default();
        config.bot.min_bars = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_band_contains_is_inclusive() {
        let band = Band::new(45.0, 65.0);
        assert!(band.contains(45.0));
        assert!(band.contains(65.0));
        assert!(!band.contains(65.01));
    }

    #[test]
    fn test_digest_has_no_secrets() {
        let digest = AppConfig::default().digest();
        assert!(digest.contains("symbol=DOGE-USDT"));
        assert!(!digest.to_lowercase().contains("secret"));
    }
}
