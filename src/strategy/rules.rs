//! Signal generator
//!
//! Six regime-specific entry rules evaluated in a fixed priority order. The
//! first rule whose market condition holds decides the cycle: if its
//! permission check fails (direction lock, adverse explosion) the cycle
//! produces no signal instead of falling through to a later rule.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::explosion::ExplosionState;
use super::regime::Regime;
use crate::config::StrategyConfig;
use crate::types::{Direction, MarketState, Side};

/// Entry rule identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    TrendingLong,
    TrendingShort,
    RangingLong,
    RangingShort,
    BreakoutLong,
    BreakoutShort,
}

impl RuleKind {
    pub fn side(&self) -> Side {
        match self {
            RuleKind::TrendingLong | RuleKind::RangingLong | RuleKind::BreakoutLong => Side::Buy,
            RuleKind::TrendingShort | RuleKind::RangingShort | RuleKind::BreakoutShort => {
                Side::Sell
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::TrendingLong => "Trending Long",
            RuleKind::TrendingShort => "Trending Short",
            RuleKind::RangingLong => "Ranging Long",
            RuleKind::RangingShort => "Ranging Short",
            RuleKind::BreakoutLong => "Breakout Long",
            RuleKind::BreakoutShort => "Breakout Short",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Candidate entry produced fresh each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: Option<Side>,
    pub rule: Option<RuleKind>,
    pub reason: String,
}

impl Signal {
    pub fn none() -> Self {
        Self {
            side: None,
            rule: None,
            reason: String::new(),
        }
    }

    fn fired(rule: RuleKind) -> Self {
        Self {
            side: Some(rule.side()),
            rule: Some(rule),
            reason: rule.label().to_string(),
        }
    }

    fn blocked(rule: RuleKind, why: String) -> Self {
        Self {
            side: None,
            rule: Some(rule),
            reason: format!("{} blocked: {}", rule.label(), why),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.side.is_some()
    }
}

/// Read-only inputs for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    pub market: &'a MarketState,
    pub regime: Regime,
    pub explosion: &'a ExplosionState,
    /// Side suppressed by the post-loss direction lock
    pub locked_side: Option<Side>,
}

/// Which explosions veto a rule
#[derive(Debug, Clone, Copy)]
enum ExplosionVeto {
    /// Any active explosion
    Any,
    /// Only an explosion against the rule's side
    Opposite,
}

struct Rule {
    kind: RuleKind,
    condition: fn(&SignalContext<'_>, &StrategyConfig) -> bool,
    veto: ExplosionVeto,
}

fn trending_long(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    ctx.regime == Regime::TrendingUp
        && m.price > m.supertrend.line
        && cfg.trend_long_rsi.contains(m.rsi)
        && m.rsi > m.rsi_prev
}

fn trending_short(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    ctx.regime == Regime::TrendingDown
        && m.price < m.supertrend.line
        && cfg.trend_short_rsi.contains(m.rsi)
        && m.rsi < m.rsi_prev
}

fn ranging_long(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    let turning_up = m.rsi > m.rsi_prev && m.rsi_prev < cfg.ranging_long_rsi_max;
    ctx.regime == Regime::Ranging
        && m.bollinger.lower > 0.0
        && m.price <= m.bollinger.lower
        && turning_up
        && m.rsi < cfg.ranging_long_rsi_max
}

fn ranging_short(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    let turning_down = m.rsi < m.rsi_prev && m.rsi_prev > cfg.ranging_short_rsi_min;
    ctx.regime == Regime::Ranging
        && m.bollinger.upper > 0.0
        && m.price >= m.bollinger.upper
        && turning_down
        && m.rsi > cfg.ranging_short_rsi_min
}

fn breakout_long(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    m.price >= m.breakout_high
        && m.rsi < cfg.breakout_long_rsi_max
        && ctx.regime != Regime::TrendingDown
}

fn breakout_short(ctx: &SignalContext<'_>, cfg: &StrategyConfig) -> bool {
    let m = ctx.market;
    m.price <= m.breakout_low
        && m.rsi > cfg.breakout_short_rsi_min
        && ctx.regime != Regime::TrendingUp
}

const RULES: [Rule; 6] = [
    Rule {
        kind: RuleKind::TrendingLong,
        condition: trending_long,
        veto: ExplosionVeto::Opposite,
    },
    Rule {
        kind: RuleKind::TrendingShort,
        condition: trending_short,
        veto: ExplosionVeto::Opposite,
    },
    Rule {
        kind: RuleKind::RangingLong,
        condition: ranging_long,
        veto: ExplosionVeto::Any,
    },
    Rule {
        kind: RuleKind::RangingShort,
        condition: ranging_short,
        veto: ExplosionVeto::Any,
    },
    Rule {
        kind: RuleKind::BreakoutLong,
        condition: breakout_long,
        veto: ExplosionVeto::Opposite,
    },
    Rule {
        kind: RuleKind::BreakoutShort,
        condition: breakout_short,
        veto: ExplosionVeto::Opposite,
    },
];

/// Regime-aware signal generator
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: StrategyConfig,
}

impl SignalGenerator {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Rule priority, highest first
    pub fn rule_order() -> impl Iterator<Item = RuleKind> {
        RULES.iter().map(|r| r.kind)
    }

    /// Evaluate the rules against an immutable snapshot. Pure.
    pub fn generate(&self, ctx: &SignalContext<'_>) -> Signal {
        let Some(rule) = RULES.iter().find(|r| (r.condition)(ctx, &self.config)) else {
            return Signal::none();
        };

        let side = rule.kind.side();
        if ctx.locked_side == Some(side) {
            return Signal::blocked(rule.kind, format!("direction lock {}", side));
        }

        if let Some(direction) = ctx.explosion.active_direction() {
            let vetoed = match rule.veto {
                ExplosionVeto::Any => true,
                ExplosionVeto::Opposite => direction.aligned_side() != side,
            };
            if vetoed {
                return Signal::blocked(rule.kind, format!("explosion {}", direction));
            }
        }

        Signal::fired(rule.kind)
    }
}

/// Whether `direction` opposes `side`
pub fn opposes(direction: Direction, side: Side) -> bool {
    direction.aligned_side() != side
}
