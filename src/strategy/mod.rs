//! Strategy Engine - regime-aware entry decisions
//!
//! One evaluation per cycle:
//! 1. Classify the regime from EMA alignment and ADX
//! 2. Generate a candidate signal from the ordered rule set
//! 3. Run the candidate through the entry guard chain
//!
//! The engine is stateless apart from the last rejection reason kept for
//! status reporting. Explosion and risk state are owned by the loop and
//! passed in by reference.

pub mod explosion;
pub mod guards;
pub mod regime;
pub mod rules;

pub use explosion::{detect_explosion, ExplosionState};
pub use guards::{EntryGuardChain, GuardContext, GuardKind, GuardRejection, TakeProfitEstimate};
pub use regime::{classify_regime, Regime};
pub use rules::{RuleKind, Signal, SignalContext, SignalGenerator};

use serde::Serialize;
use tracing::debug;

use crate::config::{AppConfig, ExplosionConfig, FilterConfig, StrategyConfig};
use crate::risk::RiskState;
use crate::types::{MarketState, Side};

/// Result of the guard chain for this cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntryOutcome {
    Approved(Side),
    Rejected(GuardRejection),
    NoSignal,
}

/// Full decision record for one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDecision {
    pub regime: Regime,
    pub signal: Signal,
    pub outcome: EntryOutcome,
}

impl EntryDecision {
    pub fn approved_side(&self) -> Option<Side> {
        match self.outcome {
            EntryOutcome::Approved(side) => Some(side),
            _ => None,
        }
    }

    /// Reason string for logs and the audit trail
    pub fn reason(&self) -> &str {
        match &self.outcome {
            EntryOutcome::Rejected(rejection) => &rejection.reason,
            _ => &self.signal.reason,
        }
    }
}

/// Per-cycle inputs owned by the decision loop
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub market: &'a MarketState,
    pub explosion: &'a ExplosionState,
    pub risk: &'a RiskState,
    /// Entry price of the open position, if any
    pub open_entry: Option<f64>,
    pub now_ms: i64,
    pub bar_secs: u64,
}

/// Regime classifier + signal generator + guard chain
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    adx_min_trend: f64,
    explosion: ExplosionConfig,
    generator: SignalGenerator,
    guards: EntryGuardChain,
    last_filter_reason: Option<String>,
}

impl StrategyEngine {
    pub fn new(
        strategy: StrategyConfig,
        explosion: ExplosionConfig,
        filters: FilterConfig,
        take_profit: TakeProfitEstimate,
    ) -> Self {
        Self {
            adx_min_trend: strategy.adx_min_trend,
            explosion,
            generator: SignalGenerator::new(strategy),
            guards: EntryGuardChain::new(filters, take_profit),
            last_filter_reason: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.strategy.clone(),
            config.explosion.clone(),
            config.filters.clone(),
            TakeProfitEstimate {
                tp_atr_mult: config.position.tp_atr_mult,
                min_atr: config.position.min_atr,
            },
        )
    }

    pub fn classify(&self, market: &MarketState) -> Regime {
        classify_regime(market.ema50, market.ema200, market.adx, self.adx_min_trend)
    }

    /// Refresh the explosion reading for this cycle's bar
    pub fn observe_explosion(&self, market: &MarketState, state: &mut ExplosionState) {
        state.observe(market, &self.explosion);
    }

    /// Regime, signal and guard verdict for this cycle
    pub fn evaluate(&mut self, inputs: &DecisionInputs<'_>) -> EntryDecision {
        let regime = self.classify(inputs.market);
        let signal = self.generator.generate(&SignalContext {
            market: inputs.market,
            regime,
            explosion: inputs.explosion,
            locked_side: inputs.risk.locked_side(),
        });

        let outcome = match signal.side {
            None => {
                if !signal.reason.is_empty() {
                    self.last_filter_reason = Some(signal.reason.clone());
                }
                EntryOutcome::NoSignal
            }
            Some(side) => {
                let ctx = GuardContext {
                    market: inputs.market,
                    side,
                    explosion: inputs.explosion,
                    open_entry: inputs.open_entry,
                    risk: inputs.risk,
                    now_ms: inputs.now_ms,
                    bar_secs: inputs.bar_secs,
                };
                match self.guards.check(&ctx) {
                    Ok(()) => EntryOutcome::Approved(side),
                    Err(rejection) => {
                        self.last_filter_reason = Some(rejection.reason.clone());
                        EntryOutcome::Rejected(rejection)
                    }
                }
            }
        };

        debug!(
            regime = %regime,
            signal = %signal.reason,
            outcome = ?outcome,
            "Strategy evaluated"
        );

        EntryDecision {
            regime,
            signal,
            outcome,
        }
    }

    /// Most recent rejection or blocked-rule reason
    pub fn last_filter_reason(&self) -> Option<&str> {
        self.last_filter_reason.as_deref()
    }
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
