//! End-to-end decision loop tests against the paper gateway

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use regimebot::config::{AppConfig, PaperConfig};
use regimebot::engine::{CycleOutcome, TradingEngine};
use regimebot::exchange::{ExecutionGateway, PaperGateway};
use regimebot::indicators::IndicatorPipeline;
use regimebot::market::{CandleSource, MarketDataError, MarketFeed};
use regimebot::persistence::CsvPersistence;
use regimebot::position::{ExitReason, LevelEvent};
use regimebot::types::{BollingerBands, Candle, Interval, MarketState, Side, SupertrendState};

const BAR_MS: i64 = 900_000;

/// Trending-up snapshot that passes every entry guard
fn base_market() -> MarketState {
    MarketState {
        ts: 1_700_000_100_000,
        price: 0.10,
        open: 0.0995,
        high: 0.1005,
        low: 0.099,
        close: 0.10,
        prev_close: Some(0.0995),
        close_3_back: Some(0.099),
        atr: 0.002,
        avg_atr_pct: Some(0.02),
        ema50: 0.101,
        ema200: 0.099,
        rsi: 58.0,
        rsi_prev: 50.0,
        adx: 20.0,
        bollinger: BollingerBands {
            upper: 0.104,
            mid: 0.10,
            lower: 0.096,
        },
        supertrend: SupertrendState {
            line: 0.098,
            direction: 1,
        },
        breakout_high: 0.11,
        breakout_low: 0.09,
        range_pct: 2.0,
    }
}

/// Same bar, price moved to `price` with a quiet candle around it
fn market_at(price: f64) -> MarketState {
    MarketState {
        price,
        close: price,
        open: price - 0.0003,
        high: price + 0.0003,
        low: price - 0.0005,
        prev_close: Some(price - 0.0003),
        ..base_market()
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_105_000).unwrap()
}

fn make_paper() -> Arc<PaperGateway> {
    Arc::new(PaperGateway::new(
        &PaperConfig {
            initial_balance: 1000.0,
            slippage_bps: 0.0,
        },
        10.0,
    ))
}

async fn cycle_at(
    engine: &mut TradingEngine,
    paper: &PaperGateway,
    market: &MarketState,
    now: DateTime<Utc>,
) -> CycleOutcome {
    paper.set_mark_price(market.price).await;
    engine.run_cycle(market, now).await
}

#[tokio::test]
async fn test_trailing_lifecycle_ends_in_trailing_stop() {
    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();
    let now = start_time();

    let outcome = cycle_at(&mut engine, &paper, &base_market(), now).await;
    assert!(matches!(outcome, CycleOutcome::Entered { side: Side::Buy, .. }), "got {:?}", outcome);
    assert_eq!(paper.protective_orders().await.len(), 2);

    // TP1: stop to break-even
    let outcome = cycle_at(&mut engine, &paper, &market_at(0.102), now).await;
    assert_eq!(outcome, CycleOutcome::Managed(vec![LevelEvent::BreakEven { sl: 0.10 }]));

    // TP2: trailing active, first trail at price - 1 ATR
    let outcome = cycle_at(&mut engine, &paper, &market_at(0.1045), now).await;
    match outcome {
        CycleOutcome::Managed(events) => {
            assert!(events.contains(&LevelEvent::TrailingActivated));
            assert!(events
                .iter()
                .any(|e| matches!(e, LevelEvent::TrailingMoved { to, .. } if (to - 0.1025).abs() < 1e-12)));
        }
        other => panic!("expected managed cycle, got {:?}", other),
    }
    let position = engine.position().unwrap();
    assert!(position.tp2_hit && position.trailing_active);

    // Pullback within tolerance of the trailed stop
    let outcome = cycle_at(&mut engine, &paper, &market_at(0.1028), now).await;
    match outcome {
        CycleOutcome::Closed(record) => {
            assert_eq!(record.reason, ExitReason::TrailingStop.label());
            assert!(record.profit > 0.0, "trailing exit should lock profit");
        }
        other => panic!("expected close, got {:?}", other),
    }

    assert!(paper.open_position().await.unwrap().is_none());
    assert!(paper.protective_orders().await.is_empty());

    let stats = engine.ledger().stats();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.failed_trades, 1, "only a TP hit counts as a success");
    assert_eq!(engine.risk().locked_side(), Some(Side::Buy));
}

#[tokio::test]
async fn test_direction_lock_blocks_same_side_after_loss() {
    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    let outcome = cycle_at(&mut engine, &paper, &market_at(0.0968), now).await;
    match outcome {
        CycleOutcome::Closed(record) => assert_eq!(record.reason, "SL"),
        other => panic!("expected stop-loss close, got {:?}", other),
    }

    // Next bar, well past the post-loss cooldown
    let later = MarketState {
        ts: base_market().ts + BAR_MS,
        ..base_market()
    };
    let outcome = cycle_at(&mut engine, &paper, &later, now + Duration::hours(2)).await;
    assert_eq!(outcome, CycleOutcome::NoSignal);

    let status = engine.status().read().await.clone();
    let reason = status.last_filter_reason.unwrap_or_default();
    assert!(reason.starts_with("Trending Long blocked"), "got {}", reason);
    assert_eq!(engine.risk().loss_lock_bars_remaining, 7);
}

#[tokio::test]
async fn test_rejected_protection_closes_entry() {
    let paper = make_paper();
    paper.set_reject_protective(true).await;
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();

    let outcome = cycle_at(&mut engine, &paper, &base_market(), start_time()).await;
    match outcome {
        CycleOutcome::EntryAborted {
            reason,
            record: Some(record),
        } => {
            assert_eq!(reason, ExitReason::NoTakeProfit);
            assert_eq!(record.reason, "NO_TP");
            assert!(record.profit.abs() < 1e-9);
        }
        other => panic!("expected aborted entry, got {:?}", other),
    }
    assert!(engine.position().is_none());
    assert!(paper.open_position().await.unwrap().is_none());
}

#[tokio::test]
async fn test_close_retry_after_transport_failure() {
    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    paper.fail_next_closes(1).await;

    let outcome = cycle_at(&mut engine, &paper, &market_at(0.106), now).await;
    assert_eq!(outcome, CycleOutcome::CloseFailed(ExitReason::TakeProfit));
    assert!(engine.position().unwrap().is_closing());

    let outcome = cycle_at(&mut engine, &paper, &market_at(0.1058), now).await;
    match outcome {
        CycleOutcome::Closed(record) => assert_eq!(record.reason, "TP"),
        other => panic!("expected retried close, got {:?}", other),
    }
    assert_eq!(engine.ledger().stats().successful_trades, 1);
}

#[tokio::test]
async fn test_daily_cap_after_winning_trade() {
    let mut config = AppConfig::default();
    config.filters.max_daily_trades = 1;
    let paper = make_paper();
    let mut engine = TradingEngine::new(&config, paper.clone(), 1000.0).unwrap();
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    let outcome = cycle_at(&mut engine, &paper, &market_at(0.106), now).await;
    assert!(matches!(outcome, CycleOutcome::Closed(_)), "got {:?}", outcome);
    assert!(engine.ledger().compound_profit() > 0.0);

    // Win cooldown is 3 bars of 15m; 50 minutes later only the cap remains
    let next = MarketState {
        ts: base_market().ts + 4 * BAR_MS,
        ..base_market()
    };
    let outcome = cycle_at(&mut engine, &paper, &next, now + Duration::minutes(50)).await;
    match outcome {
        CycleOutcome::Rejected(rejection) => assert_eq!(rejection.reason, "Daily Trade Cap: 1/1"),
        other => panic!("expected daily cap rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cooldown_follows_winning_close() {
    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    cycle_at(&mut engine, &paper, &market_at(0.106), now).await;

    let outcome = cycle_at(&mut engine, &paper, &base_market(), now + Duration::minutes(10)).await;
    match outcome {
        CycleOutcome::Rejected(rejection) => {
            // 3 bars x 900s - 600s elapsed
            assert_eq!(rejection.reason, "Cooldown: 2100s remaining")
        }
        other => panic!("expected cooldown rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_compound_profit_grows_next_size() {
    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0).unwrap();
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    cycle_at(&mut engine, &paper, &market_at(0.106), now).await;
    let profit = engine.ledger().compound_profit();
    assert!((profit - 360.0).abs() < 1e-6, "got {}", profit);

    let next = MarketState {
        ts: base_market().ts + 4 * BAR_MS,
        ..base_market()
    };
    let outcome = cycle_at(&mut engine, &paper, &next, now + Duration::hours(1)).await;
    match outcome {
        CycleOutcome::Entered { quantity, .. } => {
            // min((1000 + 360) * 0.6, 1360) * 10 / 0.10
            assert!((quantity - 81_600.0).abs() < 1e-6, "got {}", quantity);
        }
        other => panic!("expected entry, got {:?}", other),
    }
}

#[tokio::test]
async fn test_audit_trail_written_for_trades_and_decisions() {
    let data_dir = std::env::temp_dir().join(format!("regimebot_engine_{}", uuid::Uuid::new_v4()));
    let persistence = Arc::new(CsvPersistence::new(data_dir.to_str().unwrap(), "it").unwrap());

    let paper = make_paper();
    let mut engine = TradingEngine::new(&AppConfig::default(), paper.clone(), 1000.0)
        .unwrap()
        .with_persistence(persistence);
    let now = start_time();

    cycle_at(&mut engine, &paper, &base_market(), now).await;
    cycle_at(&mut engine, &paper, &market_at(0.106), now).await;

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let trades = std::fs::read_to_string(
        data_dir.join("trades").join(format!("trades_{}.csv", today)),
    )
    .unwrap();
    assert!(trades.lines().any(|l| l.contains(",TP,")), "trades: {}", trades);

    let decisions = std::fs::read_to_string(
        data_dir.join("decisions").join(format!("decisions_{}.csv", today)),
    )
    .unwrap();
    assert!(decisions.contains("APPROVED"));
    assert!(decisions.contains("Trending Long"));

    let _ = std::fs::remove_dir_all(&data_dir);
}

// ─────────────────────────────────────────────────────────────────
// Market feed
// ─────────────────────────────────────────────────────────────────

struct FixedSource(Vec<Candle>);

#[async_trait]
impl CandleSource for FixedSource {
    async fn fetch_klines(
        &self,
        _symbol: &str,
        _interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let start = self.0.len().saturating_sub(limit);
        Ok(self.0[start..].to_vec())
    }
}

fn uptrend(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 0.10 + i as f64 * 0.0002;
            Candle {
                open_time: 1_700_000_000_000 + i as i64 * BAR_MS,
                open: close - 0.0005,
                high: close + 0.001,
                low: close - 0.001,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

#[tokio::test]
async fn test_feed_reports_insufficient_history() {
    let mut feed = MarketFeed::new("DOGE-USDT", Interval::Min15, 250, 200, IndicatorPipeline::default());
    let result = feed.snapshot(&FixedSource(uptrend(150))).await;
    assert!(matches!(
        result,
        Err(MarketDataError::InsufficientData { have: 150, need: 200 })
    ));
}

#[tokio::test]
async fn test_feed_snapshot_classifies_uptrend() {
    let mut feed = MarketFeed::new("DOGE-USDT", Interval::Min15, 250, 200, IndicatorPipeline::default());
    let market = feed.snapshot(&FixedSource(uptrend(260))).await.unwrap();
    assert!(market.ema50 > market.ema200);
    assert!(market.atr > 0.0);

    let strategy = regimebot::strategy::StrategyEngine::default();
    assert_eq!(strategy.classify(&market), regimebot::strategy::Regime::TrendingUp);
}
