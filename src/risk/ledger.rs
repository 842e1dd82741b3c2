//! Bounded trade ledger and running statistics

use serde::Serialize;
use std::collections::VecDeque;

use crate::types::TradeRecord;

/// Aggregate counters over the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    /// Full closes
    pub total_trades: u32,
    /// Full closes at the profit target
    pub successful_trades: u32,
    pub failed_trades: u32,
    pub partial_exits: u32,
    /// Realized profit including partial exits
    pub compound_profit: f64,
}

/// Most recent exits, newest first
#[derive(Debug, Clone)]
pub struct TradeLedger {
    records: VecDeque<TradeRecord>,
    capacity: usize,
    stats: LedgerStats,
}

impl TradeLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            stats: LedgerStats::default(),
        }
    }

    /// Partial exit: adds to compound profit, not to the trade counts
    pub fn record_partial(&mut self, record: TradeRecord) {
        self.stats.partial_exits += 1;
        self.stats.compound_profit += record.profit;
        self.push(record);
    }

    /// Terminal close of a position
    pub fn record_close(&mut self, record: TradeRecord, target_hit: bool) {
        self.stats.total_trades += 1;
        if target_hit {
            self.stats.successful_trades += 1;
        } else {
            self.stats.failed_trades += 1;
        }
        self.stats.compound_profit += record.profit;
        self.push(record);
    }

    fn push(&mut self, record: TradeRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.stats
    }

    pub fn compound_profit(&self) -> f64 {
        self.stats.compound_profit
    }

    pub fn recent(&self) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new(20)
    }
}
