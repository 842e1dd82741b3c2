//! CSV Persistence Module
//!
//! Append-only audit trail of realized exits and entry decisions, one file
//! per UTC day:
//! - `trades/trades_YYYY-MM-DD.csv`
//! - `decisions/decisions_YYYY-MM-DD.csv`
//!
//! Nothing here is read back into the decision loop.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::strategy::{EntryDecision, EntryOutcome, ExplosionState};
use crate::types::{MarketState, TradeRecord};

/// Realized exit row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub timestamp: i64,
    pub time: String,
    pub bot_tag: String,
    pub trade_id: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub reason: String,
    pub profit: f64,
    pub partial: bool,
}

impl TradeRow {
    pub fn from_record(record: &TradeRecord, bot_tag: &str) -> Self {
        Self {
            timestamp: record.timestamp,
            time: format_ts(record.timestamp),
            bot_tag: bot_tag.to_string(),
            trade_id: record.id.clone(),
            side: record.side.to_string(),
            entry_price: record.entry_price,
            exit_price: record.exit_price,
            quantity: record.quantity,
            reason: record.reason.clone(),
            profit: record.profit,
            partial: record.partial,
        }
    }
}

/// Entry decision row (approved, rejected or blocked signal)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    pub timestamp: i64,
    pub bar_ts: i64,
    pub bot_tag: String,
    pub price: f64,
    pub regime: String,
    pub rsi: f64,
    pub rsi_prev: f64,
    pub adx: f64,
    pub atr_pct: f64,
    pub explosion: String,
    pub signal: String,
    pub outcome: String,
    pub reason: String,
}

impl DecisionRow {
    pub fn new(
        now_ms: i64,
        market: &MarketState,
        explosion: &ExplosionState,
        decision: &EntryDecision,
        bot_tag: &str,
    ) -> Self {
        let outcome = match &decision.outcome {
            EntryOutcome::Approved(_) => "APPROVED",
            EntryOutcome::Rejected(_) => "REJECTED",
            EntryOutcome::NoSignal => "NO_SIGNAL",
        };
        let explosion = match (explosion.active_direction(), explosion.in_cooldown()) {
            (Some(direction), _) => direction.to_string(),
            (None, true) => format!("COOLDOWN_{}", explosion.cooldown_bars_remaining),
            (None, false) => String::new(),
        };
        Self {
            timestamp: now_ms,
            bar_ts: market.ts,
            bot_tag: bot_tag.to_string(),
            price: market.price,
            regime: decision.regime.to_string(),
            rsi: market.rsi,
            rsi_prev: market.rsi_prev,
            adx: market.adx,
            atr_pct: market.atr_pct(),
            explosion,
            signal: decision
                .signal
                .rule
                .map(|r| r.label().to_string())
                .unwrap_or_default(),
            outcome: outcome.to_string(),
            reason: decision.reason().to_string(),
        }
    }
}

fn format_ts(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// CSV writer that rolls over to a new file when the UTC date changes
struct DailyWriter {
    dir: PathBuf,
    prefix: &'static str,
    date: String,
    writer: csv::Writer<std::fs::File>,
}

impl DailyWriter {
    fn open(dir: PathBuf, prefix: &'static str, now: DateTime<Utc>) -> Result<Self> {
        let date = now.format("%Y-%m-%d").to_string();
        let writer = create_writer(&dir, &format!("{}_{}.csv", prefix, date))?;
        Ok(Self {
            dir,
            prefix,
            date,
            writer,
        })
    }

    fn write<T: Serialize>(&mut self, record: &T, now: DateTime<Utc>) -> Result<()> {
        let date = now.format("%Y-%m-%d").to_string();
        if date != self.date {
            self.writer.flush().context("Failed to flush CSV writer")?;
            self.writer = create_writer(&self.dir, &format!("{}_{}.csv", self.prefix, date))?;
            self.date = date;
        }
        self.writer
            .serialize(record)
            .with_context(|| format!("Failed to write {} record", self.prefix))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {} writer", self.prefix))?;
        Ok(())
    }
}

fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
    let path = dir.join(filename);
    let file_has_data =
        path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(true)
        .open(&path)
        .context("Failed to open CSV file")?;

    let writer = WriterBuilder::new()
        .has_headers(!file_has_data)
        .from_writer(file);

    Ok(writer)
}

/// CSV persistence manager
pub struct CsvPersistence {
    data_dir: PathBuf,
    bot_tag: String,
    trade_writer: AsyncRwLock<DailyWriter>,
    decision_writer: AsyncRwLock<DailyWriter>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager
    pub fn new(data_dir: &str, bot_tag: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        fs::create_dir_all(data_dir.join("trades"))?;
        fs::create_dir_all(data_dir.join("decisions"))?;

        let now = Utc::now();
        let trade_writer = DailyWriter::open(data_dir.join("trades"), "trades", now)?;
        let decision_writer = DailyWriter::open(data_dir.join("decisions"), "decisions", now)?;

        info!(path = %data_dir.display(), "💾 CSV audit trail enabled");

        Ok(Self {
            data_dir,
            bot_tag: bot_tag.to_string(),
            trade_writer: AsyncRwLock::new(trade_writer),
            decision_writer: AsyncRwLock::new(decision_writer),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Save a realized exit (partial or full)
    pub async fn save_trade(&self, record: &TradeRecord) -> Result<()> {
        let row = TradeRow::from_record(record, &self.bot_tag);
        let mut writer = self.trade_writer.write().await;
        writer.write(&row, Utc::now())
    }

    /// Save an entry decision
    pub async fn save_decision(
        &self,
        now_ms: i64,
        market: &MarketState,
        explosion: &ExplosionState,
        decision: &EntryDecision,
    ) -> Result<()> {
        let row = DecisionRow::new(now_ms, market, explosion, decision, &self.bot_tag);
        let mut writer = self.decision_writer.write().await;
        writer.write(&row, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{GuardKind, GuardRejection, Regime, Signal};
    use crate::types::Side;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "regimebot_persistence_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    fn make_record() -> TradeRecord {
        TradeRecord {
            id: "t-1".to_string(),
            side: Side::Buy,
            entry_price: 0.10,
            exit_price: 0.106,
            quantity: 1000.0,
            reason: "TP".to_string(),
            profit: 6.0,
            timestamp: 1_700_000_000_000,
            partial: false,
        }
    }

    #[test]
    fn save_trade_writes_header_once() {
        let data_dir = temp_data_dir("trades");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap(), "test").unwrap();
        tokio_test::block_on(async {
            persistence.save_trade(&make_record()).await.unwrap();
            persistence.save_trade(&make_record()).await.unwrap();
        });

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let file = data_dir.join("trades").join(format!("trades_{}.csv", today));
        let content = fs::read_to_string(&file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(
            lines[0].starts_with("timestamp,time,bot_tag,trade_id,side"),
            "unexpected header line: {}",
            lines[0]
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("TP"));

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let data_dir = temp_data_dir("reopen");
        for _ in 0..2 {
            let persistence = CsvPersistence::new(data_dir.to_str().unwrap(), "test").unwrap();
            tokio_test::block_on(async {
                persistence.save_trade(&make_record()).await.unwrap();
            });
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let file = data_dir.join("trades").join(format!("trades_{}.csv", today));
        let content = fs::read_to_string(&file).unwrap();
        let headers = content.lines().filter(|l| l.starts_with("timestamp")).count();
        assert_eq!(headers, 1);
        assert_eq!(content.lines().count(), 3);

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn save_decision_records_rejection_reason() {
        let data_dir = temp_data_dir("decisions");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap(), "test").unwrap();
        let market = MarketState {
            ts: 5,
            price: 0.15,
            atr: 0.0003,
            ..Default::default()
        };
        let decision = EntryDecision {
            regime: Regime::TrendingUp,
            signal: Signal::none(),
            outcome: EntryOutcome::Rejected(GuardRejection {
                guard: GuardKind::AtrBand,
                reason: "ATR% Filter: 0.0020".to_string(),
            }),
        };

        tokio_test::block_on(async {
            persistence
                .save_decision(1, &market, &ExplosionState::default(), &decision)
                .await
                .unwrap();
        });

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let file = data_dir
            .join("decisions")
            .join(format!("decisions_{}.csv", today));
        let content = fs::read_to_string(&file).unwrap();
        assert!(content.contains("REJECTED"));
        assert!(content.contains("ATR% Filter: 0.0020"));
        assert!(content.contains("TRENDING_UP"));

        let _ = fs::remove_dir_all(&data_dir);
    }
}
