//! Paper gateway - simulated execution for dry runs
//!
//! Fills market orders at the last mark price plus slippage, keeps a virtual
//! margin balance and a single net position, and records protective orders
//! without triggering them (the decision loop enforces its own levels).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::{ExecutionGateway, Fill, GatewayError, OpenPosition, OrderRequest};
use crate::config::PaperConfig;
use crate::market::CandleSource;
use crate::types::{Candle, Interval, OrderKind, Side};

#[derive(Debug)]
struct PaperState {
    mark_price: f64,
    /// Cash balance including realized profit
    balance: f64,
    position: Option<OpenPosition>,
    protective: Vec<OrderRequest>,
    reject_protective: bool,
    failing_closes: u32,
    next_order_id: u64,
}

/// Simulated exchange account
#[derive(Debug)]
pub struct PaperGateway {
    state: Mutex<PaperState>,
    slippage_bps: f64,
    leverage: f64,
}

impl PaperGateway {
    pub fn new(config: &PaperConfig, leverage: f64) -> Self {
        info!(
            balance = config.initial_balance,
            slippage_bps = config.slippage_bps,
            "📝 [PAPER] Simulated account ready"
        );
        Self {
            state: Mutex::new(PaperState {
                mark_price: 0.0,
                balance: config.initial_balance,
                position: None,
                protective: Vec::new(),
                reject_protective: false,
                failing_closes: 0,
                next_order_id: 1,
            }),
            slippage_bps: config.slippage_bps,
            leverage: leverage.max(1.0),
        }
    }

    pub async fn set_mark_price(&self, price: f64) {
        if price > 0.0 {
            self.state.lock().await.mark_price = price;
        }
    }

    pub async fn mark_price(&self) -> f64 {
        self.state.lock().await.mark_price
    }

    /// Outstanding take-profit / stop-loss orders
    pub async fn protective_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.protective.clone()
    }

    /// Refuse protective orders until reset
    pub async fn set_reject_protective(&self, reject: bool) {
        self.state.lock().await.reject_protective = reject;
    }

    /// Fail the next `count` close calls with a transport error
    pub async fn fail_next_closes(&self, count: u32) {
        self.state.lock().await.failing_closes = count;
    }

    /// Cash balance including realized profit
    pub async fn cash_balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    fn fill_price(&self, mark: f64, side: Side) -> f64 {
        mark * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    fn order_id(state: &mut PaperState) -> String {
        let id = state.next_order_id;
        state.next_order_id += 1;
        format!("paper-{}", id)
    }

    /// Apply a market fill to the net position
    fn execute(&self, state: &mut PaperState, side: Side, quantity: f64) -> Result<Fill, GatewayError> {
        if !(quantity > 0.0) {
            return Err(GatewayError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        if !(state.mark_price > 0.0) {
            return Err(GatewayError::InvalidOrder("no mark price yet".to_string()));
        }

        let price = self.fill_price(state.mark_price, side);
        let order_id = Self::order_id(state);

        match state.position.take() {
            None => {
                state.position = Some(OpenPosition {
                    side,
                    entry_price: price,
                    quantity,
                    unrealized_profit: 0.0,
                });
            }
            Some(mut pos) if pos.side == side => {
                let total = pos.quantity + quantity;
                pos.entry_price = (pos.entry_price * pos.quantity + price * quantity) / total;
                pos.quantity = total;
                state.position = Some(pos);
            }
            Some(mut pos) => {
                let closed = quantity.min(pos.quantity);
                let profit = pos.side.sign() * (price - pos.entry_price) * closed;
                state.balance += profit;
                pos.quantity -= closed;

                let flipped = quantity - closed;
                if flipped > 1e-12 {
                    state.position = Some(OpenPosition {
                        side,
                        entry_price: price,
                        quantity: flipped,
                        unrealized_profit: 0.0,
                    });
                } else if pos.quantity > 1e-12 {
                    state.position = Some(pos);
                }

                if state.position.is_none() {
                    state.protective.clear();
                }
                info!(
                    closed,
                    price,
                    profit,
                    balance = state.balance,
                    "📝 [PAPER] Position reduced"
                );
            }
        }

        Ok(Fill {
            order_id: Some(order_id),
            avg_price: Some(price),
            quantity,
        })
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn place(&self, order: OrderRequest) -> Result<Fill, GatewayError> {
        let mut state = self.state.lock().await;

        if order.kind == OrderKind::Market {
            return self.execute(&mut state, order.side, order.quantity);
        }

        if state.reject_protective {
            return Err(GatewayError::Api {
                code: 80014,
                msg: format!("simulated rejection of {}", order.kind),
            });
        }
        if order.trigger_price.is_none() {
            return Err(GatewayError::InvalidOrder(format!(
                "{} requires a trigger price",
                order.kind
            )));
        }
        if state.position.is_none() {
            return Err(GatewayError::NoOpenPosition);
        }

        let order_id = Self::order_id(&mut state);
        let quantity = order.quantity;
        state.protective.push(order);
        Ok(Fill {
            order_id: Some(order_id),
            avg_price: None,
            quantity,
        })
    }

    async fn close(&self, position_side: Side, quantity: f64) -> Result<Fill, GatewayError> {
        let mut state = self.state.lock().await;
        if state.failing_closes > 0 {
            state.failing_closes -= 1;
            return Err(GatewayError::Transport("simulated timeout".to_string()));
        }

        let open_qty = match &state.position {
            Some(pos) if pos.side == position_side => pos.quantity,
            _ => return Err(GatewayError::NoOpenPosition),
        };
        self.execute(&mut state, position_side.opposite(), quantity.min(open_qty))
    }

    async fn cancel_protective(&self) -> Result<(), GatewayError> {
        self.state.lock().await.protective.clear();
        Ok(())
    }

    async fn balance(&self) -> Result<f64, GatewayError> {
        let state = self.state.lock().await;
        let used_margin = state
            .position
            .as_ref()
            .map(|p| p.entry_price * p.quantity / self.leverage)
            .unwrap_or(0.0);
        Ok((state.balance - used_margin).max(0.0))
    }

    async fn open_position(&self) -> Result<Option<OpenPosition>, GatewayError> {
        let state = self.state.lock().await;
        Ok(state.position.clone().map(|mut p| {
            p.unrealized_profit = p.side.sign() * (state.mark_price - p.entry_price) * p.quantity;
            p
        }))
    }
}

/// Candle source wrapper that feeds the last close to the paper gateway
pub struct PaperPriceTap<S> {
    inner: S,
    gateway: Arc<PaperGateway>,
}

impl<S: CandleSource> PaperPriceTap<S> {
    pub fn new(inner: S, gateway: Arc<PaperGateway>) -> Self {
        Self { inner, gateway }
    }
}

#[async_trait]
impl<S: CandleSource> CandleSource for PaperPriceTap<S> {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let candles = self.inner.fetch_klines(symbol, interval, limit).await?;
        if let Some(last) = candles.iter().max_by_key(|c| c.open_time) {
            self.gateway.set_mark_price(last.close).await;
        }
        Ok(candles)
    }
}
