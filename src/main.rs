//! RegimeBot - regime-aware futures bot for a single BingX perpetual
//!
//! Startup: config -> tracing -> gateway -> balance check -> resume -> loop.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use regimebot::config::AppConfig;
use regimebot::engine::TradingEngine;
use regimebot::exchange::{
    BingxClient, BingxCredentials, ExecutionGateway, PaperGateway, PaperPriceTap,
};
use regimebot::indicators::{IndicatorPipeline, PipelineSettings};
use regimebot::market::{CandleSource, MarketFeed};
use regimebot::persistence::CsvPersistence;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    info!("🤖 RegimeBot v{} starting", env!("CARGO_PKG_VERSION"));
    info!(config = %config, "Configuration loaded");
    config.validate_env()?;

    // ─────────────────────────────────────────────────────────────────
    // Gateway and market data
    // ─────────────────────────────────────────────────────────────────

    let credentials = if config.bot.dry_run {
        None
    } else {
        Some(BingxCredentials::from_env().context("Missing BingX credentials")?)
    };
    let bingx = BingxClient::new(
        &config.exchange,
        &config.position,
        &config.bot.symbol,
        credentials,
    )?;

    let gateway: Arc<dyn ExecutionGateway>;
    let source: Box<dyn CandleSource>;
    if config.bot.dry_run {
        info!("📝 Dry run: orders go to the paper gateway");
        let paper = Arc::new(PaperGateway::new(&config.paper, config.risk.leverage));
        gateway = paper.clone();
        source = Box::new(PaperPriceTap::new(bingx, paper));
    } else {
        warn!("🔴 LIVE TRADING on {}", config.bot.symbol);
        let client = Arc::new(bingx);
        gateway = client.clone();
        source = Box::new(SharedSource(client));
    }

    let pipeline = IndicatorPipeline::new(PipelineSettings::new(
        &config.indicators,
        &config.strategy,
        &config.explosion,
    ));
    let mut feed = MarketFeed::new(
        config.bot.symbol.clone(),
        config.interval()?,
        config.bot.lookback,
        config.bot.min_bars,
        pipeline,
    );

    // First snapshot also primes the paper mark price
    let market = feed
        .snapshot(source.as_ref())
        .await
        .context("Cannot fetch market data at startup")?;

    // ─────────────────────────────────────────────────────────────────
    // Sizing basis (fatal when unavailable)
    // ─────────────────────────────────────────────────────────────────

    let balance = gateway
        .balance()
        .await
        .context("Failed to fetch account balance")?;
    if !(balance > 0.0) {
        bail!("Account balance is {:.2}; refusing to start without a sizing basis", balance);
    }
    let initial_balance = config.risk.initial_balance.unwrap_or(balance);
    info!(balance, initial_balance, "💵 Sizing basis set");

    let mut engine = TradingEngine::new(&config, gateway, initial_balance)?;

    if config.persistence.csv_enabled {
        match CsvPersistence::new(&config.persistence.data_dir, &config.bot.tag) {
            Ok(persistence) => engine = engine.with_persistence(Arc::new(persistence)),
            Err(e) => warn!(error = %e, "⚠️ CSV audit trail disabled"),
        }
    }

    if let Err(e) = engine.resume(&market, Utc::now()).await {
        error!(error = %e, "❌ Failed to query open position at startup");
    }

    // ─────────────────────────────────────────────────────────────────
    // Dashboard
    // ─────────────────────────────────────────────────────────────────

    #[cfg(feature = "dashboard")]
    if config.dashboard.enabled {
        let stale_after_ms = (config.bot.poll_flat_secs as i64) * 3 * 1000;
        let state = Arc::new(regimebot::dashboard::DashboardState::new(
            engine.status(),
            stale_after_ms,
        ));
        let bind = config.dashboard.bind.clone();
        let port = config.dashboard.port;
        tokio::spawn(async move {
            if let Err(e) = regimebot::dashboard::start_server(state, &bind, port).await {
                error!(error = %e, "Dashboard server stopped");
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────
    // Loop until Ctrl-C
    // ─────────────────────────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(&mut feed, source.as_ref(), shutdown_rx).await;

    let stats = engine.ledger().stats();
    info!(
        trades = stats.total_trades,
        successful = stats.successful_trades,
        failed = stats.failed_trades,
        compound = stats.compound_profit,
        "👋 RegimeBot stopped"
    );
    Ok(())
}

/// Live mode reads klines from the same client that trades
struct SharedSource(Arc<BingxClient>);

#[async_trait::async_trait]
impl CandleSource for SharedSource {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: regimebot::types::Interval,
        limit: usize,
    ) -> Result<Vec<regimebot::types::Candle>> {
        self.0.fetch_klines(symbol, interval, limit).await
    }
}
