//! Execution gateway
//!
//! The decision loop only talks to [`ExecutionGateway`]. Two implementations:
//! - [`bingx::BingxClient`]: signed REST client for BingX perpetual swaps
//! - [`paper::PaperGateway`]: in-process simulation used for dry runs
//!
//! A fill at a different price than requested is a success; only a refused
//! or failed call is an error.

pub mod bingx;
pub mod paper;

pub use bingx::{BingxClient, BingxCredentials};
pub use paper::{PaperGateway, PaperPriceTap};

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OrderKind, Side};

/// Abstract order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Trigger price for protective orders
    pub trigger_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(side: Side, quantity: f64) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::Market,
            trigger_price: None,
        }
    }

    /// Take-profit for a position opened on `position_side`
    pub fn take_profit(position_side: Side, quantity: f64, price: f64) -> Self {
        Self {
            side: position_side.opposite(),
            quantity,
            kind: OrderKind::TakeProfitMarket,
            trigger_price: Some(price),
        }
    }

    /// Stop-loss for a position opened on `position_side`
    pub fn stop_loss(position_side: Side, quantity: f64, price: f64) -> Self {
        Self {
            side: position_side.opposite(),
            quantity,
            kind: OrderKind::StopMarket,
            trigger_price: Some(price),
        }
    }

    pub fn is_protective(&self) -> bool {
        self.kind != OrderKind::Market
    }
}

/// Exchange acknowledgement of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Option<String>,
    /// Average fill price, when the exchange reports one
    pub avg_price: Option<f64>,
    pub quantity: f64,
}

impl Fill {
    /// Reported fill price, or `reference` when none was returned
    pub fn price_or(&self, reference: f64) -> f64 {
        match self.avg_price {
            Some(price) if price > 0.0 => price,
            _ => reference,
        }
    }
}

/// Position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub unrealized_profit: f64,
}

/// Gateway failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("exchange error {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("no open position")]
    NoOpenPosition,
    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl GatewayError {
    /// Network or decoding trouble, as opposed to an explicit refusal
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Decode(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Order placement seam between the decision loop and an exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Place a market or protective order
    async fn place(&self, order: OrderRequest) -> Result<Fill, GatewayError>;

    /// Market-close `quantity` of the position opened on `position_side`.
    /// Returns `NoOpenPosition` when the exchange is already flat.
    async fn close(&self, position_side: Side, quantity: f64) -> Result<Fill, GatewayError>;

    /// Cancel outstanding take-profit / stop-loss orders
    async fn cancel_protective(&self) -> Result<(), GatewayError>;

    /// Available margin in the quote currency
    async fn balance(&self) -> Result<f64, GatewayError>;

    async fn open_position(&self) -> Result<Option<OpenPosition>, GatewayError>;
}

/// Decimal string for the wire, rounded half away from zero
pub fn wire_decimal(value: f64, decimals: u32) -> String {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
            .normalize()
            .to_string(),
        None => format!("{:.*}", decimals as usize, value),
    }
}

/// Decimal places implied by an exchange step (0.01 -> 2)
pub fn step_decimals(step: f64) -> u32 {
    Decimal::from_f64(step)
        .map(|d| d.normalize().scale())
        .unwrap_or(2)
}
