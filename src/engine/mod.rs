//! Trading Engine - the single decision loop
//!
//! One cycle = one market snapshot -> one decision -> at most one
//! position-mutating action. The engine owns `Position`, `RiskState`,
//! `ExplosionState` and the trade ledger; gateway calls are awaited in
//! line so a new cycle never starts before the previous action resolved.
//!
//! Cycle order:
//! 1. Per-bar bookkeeping (direction lock, explosion cooldown, day rollover)
//! 2. Explosion reading for the current bar
//! 3. A pending close is retried before anything else
//! 4. Open position: levels, TP/SL touch, early exit
//! 5. Flat: signal + guard chain, then entry with protective orders

pub mod status;

pub use status::{SharedStatus, StatusSnapshot};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, PositionConfig, RiskConfig};
use crate::exchange::{ExecutionGateway, GatewayError, OrderRequest};
use crate::market::{CandleSource, MarketDataError, MarketFeed};
use crate::persistence::CsvPersistence;
use crate::position::{EarlyExit, ExitReason, LevelEvent, Position};
use crate::risk::{position_quantity, CloseEvent, RiskState, TradeLedger};
use crate::strategy::{
    DecisionInputs, EntryDecision, EntryOutcome, ExplosionState, GuardRejection, StrategyEngine,
};
use crate::types::{MarketState, Side, TradeRecord};

/// Quantities below this are treated as fully closed
const QTY_EPSILON: f64 = 1e-9;

/// What a cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Flat and no candidate signal (or a blocked rule)
    NoSignal,
    /// Candidate rejected by the guard chain
    Rejected(GuardRejection),
    /// Sizing produced no tradable quantity
    Skipped(String),
    /// Balance query or market order failed; nothing was opened
    EntryFailed(String),
    /// Entered and protected
    Entered {
        side: Side,
        quantity: f64,
        entry_price: f64,
    },
    /// Entered but protection failed; the compensating close result is
    /// attached when it went through
    EntryAborted {
        reason: ExitReason,
        record: Option<TradeRecord>,
    },
    /// Position held; level changes applied this cycle
    Managed(Vec<LevelEvent>),
    PartialClosed(TradeRecord),
    Closed(TradeRecord),
    /// Close not confirmed; retried next cycle when the position is Closing
    CloseFailed(ExitReason),
}

/// Loop tunables derived from `AppConfig`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bot_tag: String,
    pub symbol: String,
    pub dry_run: bool,
    pub bar_secs: u64,
    pub poll_open: Duration,
    pub poll_flat: Duration,
    pub risk: RiskConfig,
    pub position: PositionConfig,
    pub loss_lock_bars: u32,
    pub explosion_cooldown_bars: u32,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            bot_tag: config.bot.tag.clone(),
            symbol: config.bot.symbol.clone(),
            dry_run: config.bot.dry_run,
            bar_secs: config.interval()?.duration_secs(),
            poll_open: Duration::from_secs(config.bot.poll_open_secs),
            poll_flat: Duration::from_secs(config.bot.poll_flat_secs),
            risk: config.risk.clone(),
            position: config.position.clone(),
            loss_lock_bars: config.risk.loss_lock_bars,
            explosion_cooldown_bars: config.explosion.cooldown_bars,
        })
    }
}

pub struct TradingEngine {
    settings: EngineSettings,
    gateway: Arc<dyn ExecutionGateway>,
    strategy: StrategyEngine,
    risk: RiskState,
    explosion: ExplosionState,
    ledger: TradeLedger,
    position: Option<Position>,
    /// Sizing basis fixed at startup
    initial_balance: f64,
    persistence: Option<Arc<CsvPersistence>>,
    status: SharedStatus,
    last_decision: Option<EntryDecision>,
    cycles: u64,
}

impl TradingEngine {
    pub fn new(
        config: &AppConfig,
        gateway: Arc<dyn ExecutionGateway>,
        initial_balance: f64,
    ) -> Result<Self> {
        let settings = EngineSettings::from_config(config)?;
        let status = StatusSnapshot::new(
            &settings.bot_tag,
            &settings.symbol,
            settings.dry_run,
            Utc::now().timestamp_millis(),
        )
        .shared();

        Ok(Self {
            risk: RiskState::new(settings.loss_lock_bars, settings.explosion_cooldown_bars),
            ledger: TradeLedger::new(config.risk.ledger_capacity),
            strategy: StrategyEngine::from_config(config),
            explosion: ExplosionState::default(),
            position: None,
            initial_balance,
            persistence: None,
            status,
            last_decision: None,
            cycles: 0,
            settings,
            gateway,
        })
    }

    pub fn with_persistence(mut self, persistence: Arc<CsvPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn explosion(&self) -> &ExplosionState {
        &self.explosion
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Poll interval for the current state
    pub fn poll_interval(&self) -> Duration {
        if self.position.is_some() {
            self.settings.poll_open
        } else {
            self.settings.poll_flat
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Cycle
    // ─────────────────────────────────────────────────────────────────

    /// Run one decision cycle against a fresh snapshot
    pub async fn run_cycle(&mut self, market: &MarketState, now: DateTime<Utc>) -> CycleOutcome {
        self.cycles += 1;
        self.last_decision = None;

        if self.risk.on_cycle(now, market.ts, &mut self.explosion) {
            debug!(bar_ts = market.ts, "New bar");
        }
        self.strategy.observe_explosion(market, &mut self.explosion);

        let pending_close = self.position.as_ref().and_then(Position::closing_reason);
        let outcome = match pending_close {
            Some(reason) => {
                warn!(reason = %reason, "🔁 Retrying pending close");
                self.close_position(reason, market.price, now).await
            }
            None if self.position.is_some() => self.manage(market, now).await,
            None => self.try_enter(market, now).await,
        };

        self.log_cycle(market);
        self.publish(market, now).await;
        outcome
    }

    /// Levels, TP/SL touch and early exit for the open position
    async fn manage(&mut self, market: &MarketState, now: DateTime<Utc>) -> CycleOutcome {
        let config = &self.settings.position;
        let Some(position) = self.position.as_mut() else {
            return CycleOutcome::NoSignal;
        };

        let events = position.update_levels(market.price, market.atr, config);
        for event in &events {
            match event {
                LevelEvent::BreakEven { sl } => {
                    info!(id = %position.id, sl, "🛡️ TP1 reached, stop moved to break-even")
                }
                LevelEvent::TrailingActivated => {
                    info!(id = %position.id, price = market.price, "📈 TP2 reached, trailing active")
                }
                LevelEvent::TrailingMoved { from, to } => {
                    info!(id = %position.id, from, to, "🔁 Trailing stop tightened")
                }
            }
        }

        let touched = position.touched_exit(market.price, config);
        let early = position.early_exit(market, config);
        let entry_price = position.entry_price;

        if let Some(reason) = touched {
            return self.close_position(reason, market.price, now).await;
        }
        if let Some(exit) = early {
            return self.partial_close(exit, market, now).await;
        }

        // Reporting only: the strategy still runs while a position is held
        let decision = self.evaluate(market, now, Some(entry_price));
        if let EntryOutcome::Rejected(rejection) = &decision.outcome {
            debug!(reason = %rejection, "Signal while holding rejected");
        }
        self.persist_decision(now, market, &decision).await;
        self.last_decision = Some(decision);

        CycleOutcome::Managed(events)
    }

    // ─────────────────────────────────────────────────────────────────
    // Entry
    // ─────────────────────────────────────────────────────────────────

    fn evaluate(
        &mut self,
        market: &MarketState,
        now: DateTime<Utc>,
        open_entry: Option<f64>,
    ) -> EntryDecision {
        self.strategy.evaluate(&DecisionInputs {
            market,
            explosion: &self.explosion,
            risk: &self.risk,
            open_entry,
            now_ms: now.timestamp_millis(),
            bar_secs: self.settings.bar_secs,
        })
    }

    async fn try_enter(&mut self, market: &MarketState, now: DateTime<Utc>) -> CycleOutcome {
        let decision = self.evaluate(market, now, None);
        self.persist_decision(now, market, &decision).await;
        self.last_decision = Some(decision.clone());

        match decision.outcome {
            EntryOutcome::NoSignal => {
                if decision.signal.rule.is_some() {
                    info!(reason = %decision.signal.reason, "⛔ Signal blocked");
                }
                CycleOutcome::NoSignal
            }
            EntryOutcome::Rejected(rejection) => {
                info!(
                    signal = %decision.signal.reason,
                    reason = %rejection,
                    "🚫 Entry rejected"
                );
                CycleOutcome::Rejected(rejection)
            }
            EntryOutcome::Approved(side) => {
                info!(side = %side, signal = %decision.signal.reason, "✅ Entry approved");
                self.enter(side, market, now).await
            }
        }
    }

    /// Size, place the market order, then protect it. A protection failure
    /// triggers an immediate compensating close.
    async fn enter(&mut self, side: Side, market: &MarketState, now: DateTime<Utc>) -> CycleOutcome {
        let available = match self.gateway.balance().await {
            Ok(balance) => balance,
            Err(err) => {
                error!(error = %err, "❌ Balance query failed, entry skipped");
                return CycleOutcome::EntryFailed(err.to_string());
            }
        };

        let quantity = position_quantity(
            &self.settings.risk,
            self.initial_balance,
            self.ledger.compound_profit(),
            available,
            market.price,
            self.settings.position.quantity_step,
        );
        if quantity <= 0.0 {
            warn!(available, price = market.price, "⚠️ Position size rounds to zero, entry skipped");
            return CycleOutcome::Skipped(format!("zero quantity at balance {:.2}", available));
        }

        let fill = match self.gateway.place(OrderRequest::market(side, quantity)).await {
            Ok(fill) => fill,
            Err(err) => {
                error!(side = %side, quantity, error = %err, "❌ Market order failed");
                return CycleOutcome::EntryFailed(err.to_string());
            }
        };

        let entry_price = fill.price_or(market.price);
        let filled = if fill.quantity > 0.0 { fill.quantity } else { quantity };
        let position = Position::open(
            Uuid::new_v4().to_string(),
            side,
            entry_price,
            filled,
            market.atr,
            now.timestamp_millis(),
            &self.settings.position,
        );
        info!(
            id = %position.id,
            side = %side,
            quantity = filled,
            entry = entry_price,
            tp = position.tp_price,
            sl = position.sl_price,
            "🚀 Position opened"
        );
        self.position = Some(position);
        self.risk.on_entry(now);

        match self.protect().await {
            Ok(()) => CycleOutcome::Entered {
                side,
                quantity: filled,
                entry_price,
            },
            Err((reason, err)) => {
                error!(reason = %reason, error = %err, "🚨 Protection failed, closing unprotected position");
                let record = match self.close_position(reason, market.price, now).await {
                    CycleOutcome::Closed(record) => Some(record),
                    _ => None,
                };
                CycleOutcome::EntryAborted { reason, record }
            }
        }
    }

    /// Place TP then SL for the remaining quantity
    async fn protect(&self) -> Result<(), (ExitReason, GatewayError)> {
        let Some(position) = self.position.as_ref() else {
            return Ok(());
        };
        let (side, quantity) = (position.side, position.quantity);

        self.gateway
            .place(OrderRequest::take_profit(side, quantity, position.tp_price))
            .await
            .map_err(|err| (failure_reason(&err, ExitReason::NoTakeProfit), err))?;
        self.gateway
            .place(OrderRequest::stop_loss(side, quantity, position.sl_price))
            .await
            .map_err(|err| (failure_reason(&err, ExitReason::NoStopLoss), err))?;

        debug!(tp = position.tp_price, sl = position.sl_price, quantity, "Protective orders placed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Exits
    // ─────────────────────────────────────────────────────────────────

    async fn partial_close(
        &mut self,
        exit: EarlyExit,
        market: &MarketState,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let Some(position) = self.position.as_ref() else {
            return CycleOutcome::NoSignal;
        };
        if exit.quantity + QTY_EPSILON >= position.quantity {
            return self.close_position(exit.reason, market.price, now).await;
        }
        let side = position.side;

        let fill = match self.gateway.close(side, exit.quantity).await {
            Ok(fill) => fill,
            Err(GatewayError::NoOpenPosition) => {
                warn!("⚠️ Exchange already flat during early exit");
                return self.finalize_close(exit.reason, market.price, now).await;
            }
            Err(err) => {
                error!(reason = %exit.reason, error = %err, "❌ Early exit failed");
                return CycleOutcome::CloseFailed(exit.reason);
            }
        };

        let exit_price = fill.price_or(market.price);
        let Some(position) = self.position.as_mut() else {
            return CycleOutcome::NoSignal;
        };
        let profit = position.apply_partial(exit.quantity, exit_price, market.ts);
        let record = TradeRecord {
            id: position.id.clone(),
            side,
            entry_price: position.entry_price,
            exit_price,
            quantity: exit.quantity,
            reason: exit.reason.label().to_string(),
            profit,
            timestamp: now.timestamp_millis(),
            partial: true,
        };
        info!(
            id = %record.id,
            reason = %exit.reason,
            quantity = exit.quantity,
            remaining = position.quantity,
            profit,
            "✂️ Partial close"
        );

        self.ledger.record_partial(record.clone());
        self.persist_trade(&record).await;

        // Resize the exchange-side protection to the remaining quantity
        if let Err(err) = self.gateway.cancel_protective().await {
            warn!(error = %err, "⚠️ Failed to cancel protective orders after partial");
        }
        if let Err((reason, err)) = self.protect().await {
            error!(reason = %reason, error = %err, "🚨 Re-protection failed, closing remainder");
            return self.close_position(reason, market.price, now).await;
        }

        CycleOutcome::PartialClosed(record)
    }

    /// Close the full remaining quantity. On failure the position is marked
    /// Closing and the close is retried next cycle.
    async fn close_position(
        &mut self,
        reason: ExitReason,
        reference_price: f64,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let Some(position) = self.position.as_ref() else {
            return CycleOutcome::NoSignal;
        };
        let (side, quantity) = (position.side, position.quantity);

        match self.gateway.close(side, quantity).await {
            Ok(fill) => {
                self.finalize_close(reason, fill.price_or(reference_price), now)
                    .await
            }
            Err(GatewayError::NoOpenPosition) => {
                warn!(reason = %reason, "⚠️ Exchange already flat, finalizing at market price");
                self.finalize_close(reason, reference_price, now).await
            }
            Err(err) => {
                error!(reason = %reason, error = %err, "❌ Close failed, will retry next cycle");
                if let Some(position) = self.position.as_mut() {
                    position.mark_closing(reason);
                }
                CycleOutcome::CloseFailed(reason)
            }
        }
    }

    /// Book a confirmed terminal close and return to Flat
    async fn finalize_close(
        &mut self,
        reason: ExitReason,
        exit_price: f64,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let Some(position) = self.position.take() else {
            return CycleOutcome::NoSignal;
        };

        let profit = position.realized_profit_at(exit_price, position.quantity);
        let record = TradeRecord {
            id: position.id.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            reason: reason.label().to_string(),
            profit,
            timestamp: now.timestamp_millis(),
            partial: false,
        };

        self.ledger.record_close(record.clone(), reason.is_target());
        self.risk.on_close(
            &CloseEvent {
                side: position.side,
                target_hit: reason.is_target(),
                profit: profit + position.realized_profit,
                at: now,
            },
            &mut self.explosion,
        );

        if let Err(err) = self.gateway.cancel_protective().await {
            warn!(error = %err, "⚠️ Failed to cancel protective orders after close");
        }

        let stats = self.ledger.stats();
        if profit + position.realized_profit > 0.0 {
            info!(
                id = %record.id,
                reason = %reason,
                exit = exit_price,
                profit,
                compound = stats.compound_profit,
                "💰 Position closed in profit"
            );
        } else {
            info!(
                id = %record.id,
                reason = %reason,
                exit = exit_price,
                profit,
                compound = stats.compound_profit,
                "🔻 Position closed at a loss"
            );
        }

        self.persist_trade(&record).await;
        CycleOutcome::Closed(record)
    }

    // ─────────────────────────────────────────────────────────────────
    // Startup and loop
    // ─────────────────────────────────────────────────────────────────

    /// Adopt a position the exchange already holds, with ATR-derived levels
    /// and fresh protective orders
    pub async fn resume(
        &mut self,
        market: &MarketState,
        now: DateTime<Utc>,
    ) -> Result<Option<Position>, GatewayError> {
        let Some(open) = self.gateway.open_position().await? else {
            info!("No open position to resume");
            return Ok(None);
        };

        let position = Position::open(
            Uuid::new_v4().to_string(),
            open.side,
            open.entry_price,
            open.quantity,
            market.atr,
            now.timestamp_millis(),
            &self.settings.position,
        );
        info!(
            id = %position.id,
            side = %position.side,
            quantity = position.quantity,
            entry = position.entry_price,
            tp = position.tp_price,
            sl = position.sl_price,
            "♻️ Resumed open position"
        );
        self.position = Some(position);

        if let Err(err) = self.gateway.cancel_protective().await {
            warn!(error = %err, "⚠️ Failed to clear stale protective orders");
        }
        if let Err((reason, err)) = self.protect().await {
            error!(reason = %reason, error = %err, "🚨 Could not protect resumed position, closing");
            self.close_position(reason, market.price, now).await;
        }

        self.publish(market, now).await;
        Ok(self.position.clone())
    }

    /// Poll the market until `shutdown` flips to true. Market data errors
    /// skip the cycle; nothing here is fatal.
    pub async fn run(
        &mut self,
        feed: &mut MarketFeed,
        source: &dyn CandleSource,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            symbol = %feed.symbol(),
            interval = %feed.interval(),
            "▶️ Decision loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match feed.snapshot(source).await {
                Ok(market) => {
                    self.run_cycle(&market, Utc::now()).await;
                }
                Err(MarketDataError::InsufficientData { have, need }) => {
                    info!(have, need, "⏳ Not enough history yet, no signal this cycle");
                }
                Err(err) => {
                    warn!(error = %err, "⚠️ Market data unavailable, skipping cycle");
                    self.status.write().await.last_error = Some(err.to_string());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match &self.position {
            Some(position) => info!(
                id = %position.id,
                side = %position.side,
                "⏹️ Decision loop stopped; position left open under exchange protection"
            ),
            None => info!("⏹️ Decision loop stopped"),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────

    fn log_cycle(&self, market: &MarketState) {
        let regime = self.strategy.classify(market);
        let explosion = match self.explosion.active_direction() {
            Some(direction) => direction.to_string(),
            None if self.explosion.in_cooldown() => {
                format!("cooldown {}", self.explosion.cooldown_bars_remaining)
            }
            None => "-".to_string(),
        };

        match &self.position {
            Some(p) => info!(
                price = market.price,
                regime = %regime,
                rsi = %format!("{:.2}", market.rsi),
                adx = %format!("{:.2}", market.adx),
                atr_pct = %format!("{:.4}", market.atr_pct()),
                explosion = %explosion,
                side = %p.side,
                qty = p.quantity,
                tp = p.tp_price,
                sl = p.sl_price,
                trailing = p.trailing_active,
                pnl = %format!("{:.4}", p.unrealized_pnl(market.price)),
                "📊 Cycle"
            ),
            None => info!(
                price = market.price,
                regime = %regime,
                rsi = %format!("{:.2}", market.rsi),
                adx = %format!("{:.2}", market.adx),
                atr_pct = %format!("{:.4}", market.atr_pct()),
                explosion = %explosion,
                trades_today = self.risk.daily_trade_count,
                "📊 Cycle"
            ),
        }
    }

    async fn publish(&self, market: &MarketState, now: DateTime<Utc>) {
        let mut status = self.status.write().await;
        status.updated_at = now.timestamp_millis();
        status.market_ok_at = now.timestamp_millis();
        status.cycles = self.cycles;
        status.price = market.price;
        status.bar_ts = market.ts;
        status.regime = Some(self.strategy.classify(market));
        status.rsi = market.rsi;
        status.adx = market.adx;
        status.atr_pct = market.atr_pct();
        status.explosion = self.explosion;
        status.position = self.position.clone();
        status.unrealized_pnl = self
            .position
            .as_ref()
            .map(|p| p.unrealized_pnl(market.price))
            .unwrap_or(0.0);
        status.risk = self.risk.clone();
        status.stats = self.ledger.stats().clone();
        status.recent_trades = self.ledger.recent().cloned().collect();
        if let Some(decision) = &self.last_decision {
            status.last_signal = Some(decision.signal.reason.clone()).filter(|r| !r.is_empty());
        }
        status.last_filter_reason = self.strategy.last_filter_reason().map(str::to_string);
        status.last_error = None;
    }

    async fn persist_decision(&self, now: DateTime<Utc>, market: &MarketState, decision: &EntryDecision) {
        if decision.signal.rule.is_none() {
            return;
        }
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence
                .save_decision(now.timestamp_millis(), market, &self.explosion, decision)
                .await
            {
                warn!(error = %err, "⚠️ Failed to persist decision");
            }
        }
    }

    async fn persist_trade(&self, record: &TradeRecord) {
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.save_trade(record).await {
                warn!(error = %err, "⚠️ Failed to persist trade");
            }
        }
    }
}

/// Transport failures map to ERROR, explicit refusals to the order's reason
fn failure_reason(err: &GatewayError, refused: ExitReason) -> ExitReason {
    if err.is_transport() {
        ExitReason::Error
    } else {
        refused
    }
}
