//! BingX perpetual swap REST client
//!
//! Signed endpoints append `timestamp` to the query, sign the query string
//! (parameters in insertion order) with HMAC-SHA256 and send the hex digest
//! as `signature`, with the API key in the `X-BX-APIKEY` header. Responses
//! use a `{code, msg, data}` envelope where `code == 0` is success.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    step_decimals, wire_decimal, ExecutionGateway, Fill, GatewayError, OpenPosition,
    OrderRequest,
};
use crate::config::{ExchangeConfig, PositionConfig};
use crate::market::CandleSource;
use crate::types::{Candle, Interval, OrderKind, Side};

type HmacSha256 = Hmac<Sha256>;

const ORDER_PATH: &str = "/openApi/swap/v2/trade/order";
const CANCEL_ALL_PATH: &str = "/openApi/swap/v2/trade/allOpenOrders";
const BALANCE_PATH: &str = "/openApi/swap/v2/user/balance";
const POSITIONS_PATH: &str = "/openApi/swap/v2/user/positions";
const KLINES_PATH: &str = "/openApi/swap/v2/quote/klines";

/// API key pair for signed endpoints
#[derive(Clone)]
pub struct BingxCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl BingxCredentials {
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_key = read_env("BINGX_API_KEY")?;
        let api_secret = read_env("BINGX_API_SECRET")?;
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for BingxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingxCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

fn read_env(var: &'static str) -> Result<String, GatewayError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(GatewayError::MissingCredentials(var)),
    }
}

/// Hex HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidOrder(format!("Invalid HMAC key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `k=v&k=v` in insertion order
fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// REST client bound to one symbol
pub struct BingxClient {
    client: Client,
    base_url: String,
    symbol: String,
    position_side: String,
    credentials: Option<BingxCredentials>,
    price_decimals: u32,
    quantity_decimals: u32,
}

impl BingxClient {
    pub fn new(
        exchange: &ExchangeConfig,
        position: &PositionConfig,
        symbol: &str,
        credentials: Option<BingxCredentials>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(exchange.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: exchange.base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            position_side: exchange.position_side.clone(),
            credentials,
            price_decimals: position.price_decimals,
            quantity_decimals: step_decimals(position.quantity_step),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn credentials(&self) -> Result<&BingxCredentials, GatewayError> {
        self.credentials
            .as_ref()
            .ok_or(GatewayError::MissingCredentials("BINGX_API_KEY"))
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Value, GatewayError> {
        let credentials = self.credentials()?;
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = build_query(&params);
        let signature = sign(&credentials.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!(method = %method, path, "BingX request");
        let response = self
            .client
            .request(method, &url)
            .header("X-BX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    async fn public_get(&self, path: &str, params: Vec<(&str, String)>) -> Result<Value, GatewayError> {
        let url = format!("{}{}?{}", self.base_url, path, build_query(&params));
        let response = self.client.get(&url).send().await?;
        Self::read_envelope(response).await
    }

    async fn read_envelope(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                code: status.as_u16() as i64,
                msg: text,
            });
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Decode(format!("{}: {}", e, text)))?;
        unwrap_envelope(body)
    }

    fn order_params(&self, order: &OrderRequest) -> Result<Vec<(&'static str, String)>, GatewayError> {
        if !(order.quantity > 0.0) {
            return Err(GatewayError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }

        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", self.position_side.clone()),
            ("type", order.kind.as_str().to_string()),
            ("quantity", wire_decimal(order.quantity, self.quantity_decimals)),
        ];

        if order.kind != OrderKind::Market {
            let trigger = order.trigger_price.ok_or_else(|| {
                GatewayError::InvalidOrder(format!("{} requires a trigger price", order.kind))
            })?;
            params.push(("stopPrice", wire_decimal(trigger, self.price_decimals)));
            params.push(("workingType", "MARK_PRICE".to_string()));
        }
        Ok(params)
    }
}

/// Strip the `{code, msg, data}` envelope
fn unwrap_envelope(body: Value) -> Result<Value, GatewayError> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let msg = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(GatewayError::Api { code, msg });
    }
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

/// Numbers arrive as JSON numbers or as strings
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn field_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(value_f64)
}

fn parse_fill(data: &Value, quantity: f64) -> Fill {
    let order = data.get("order").unwrap_or(data);
    let order_id = order.get("orderId").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let avg_price = field_f64(order, "avgPrice").filter(|p| *p > 0.0);
    let quantity = field_f64(order, "executedQty")
        .filter(|q| *q > 0.0)
        .unwrap_or(quantity);
    Fill {
        order_id,
        avg_price,
        quantity,
    }
}

fn parse_balance(data: &Value) -> Result<f64, GatewayError> {
    match data.get("balance") {
        Some(Value::Array(assets)) => assets
            .iter()
            .find(|a| a.get("asset").and_then(Value::as_str) == Some("USDT"))
            .and_then(|a| field_f64(a, "availableBalance"))
            .ok_or_else(|| GatewayError::Decode("USDT balance not found".to_string())),
        Some(asset @ Value::Object(_)) => field_f64(asset, "availableMargin")
            .ok_or_else(|| GatewayError::Decode("availableMargin missing".to_string())),
        _ => Err(GatewayError::Decode(format!("unexpected balance payload: {}", data))),
    }
}

fn parse_position(data: &Value) -> Option<OpenPosition> {
    let entries = data.as_array()?;
    entries.iter().find_map(|p| {
        let amount = field_f64(p, "positionAmt")?;
        if amount == 0.0 {
            return None;
        }
        let side = match p.get("positionSide").and_then(Value::as_str) {
            Some("LONG") => Side::Buy,
            Some("SHORT") => Side::Sell,
            _ if amount > 0.0 => Side::Buy,
            _ => Side::Sell,
        };
        let entry_price = field_f64(p, "entryPrice")
            .filter(|v| *v > 0.0)
            .or_else(|| field_f64(p, "avgPrice"))?;
        Some(OpenPosition {
            side,
            entry_price,
            quantity: amount.abs(),
            unrealized_profit: field_f64(p, "unrealizedProfit").unwrap_or(0.0),
        })
    })
}

fn parse_kline(row: &Value) -> Option<Candle> {
    match row {
        Value::Object(_) => Some(Candle {
            open_time: field_f64(row, "time")? as i64,
            open: field_f64(row, "open")?,
            high: field_f64(row, "high")?,
            low: field_f64(row, "low")?,
            close: field_f64(row, "close")?,
            volume: field_f64(row, "volume").unwrap_or(0.0),
        }),
        Value::Array(cols) if cols.len() >= 5 => Some(Candle {
            open_time: value_f64(&cols[0])? as i64,
            open: value_f64(&cols[1])?,
            high: value_f64(&cols[2])?,
            low: value_f64(&cols[3])?,
            close: value_f64(&cols[4])?,
            volume: cols.get(5).and_then(value_f64).unwrap_or(0.0),
        }),
        _ => None,
    }
}

fn parse_klines(data: &Value) -> Result<Vec<Candle>, GatewayError> {
    let rows = data
        .as_array()
        .ok_or_else(|| GatewayError::Decode(format!("klines payload is not a list: {}", data)))?;
    let candles: Vec<Candle> = rows.iter().filter_map(parse_kline).collect();
    if candles.len() < rows.len() {
        warn!(
            dropped = rows.len() - candles.len(),
            "Skipped malformed kline rows"
        );
    }
    Ok(candles)
}

#[async_trait]
impl ExecutionGateway for BingxClient {
    async fn place(&self, order: OrderRequest) -> Result<Fill, GatewayError> {
        let params = self.order_params(&order)?;
        let data = self.signed_request(Method::POST, ORDER_PATH, params).await?;
        Ok(parse_fill(&data, order.quantity))
    }

    async fn close(&self, position_side: Side, quantity: f64) -> Result<Fill, GatewayError> {
        if self.open_position().await?.is_none() {
            return Err(GatewayError::NoOpenPosition);
        }
        self.place(OrderRequest::market(position_side.opposite(), quantity))
            .await
    }

    async fn cancel_protective(&self) -> Result<(), GatewayError> {
        let params = vec![("symbol", self.symbol.clone())];
        self.signed_request(Method::DELETE, CANCEL_ALL_PATH, params)
            .await?;
        Ok(())
    }

    async fn balance(&self) -> Result<f64, GatewayError> {
        let data = self.signed_request(Method::GET, BALANCE_PATH, Vec::new()).await?;
        parse_balance(&data)
    }

    async fn open_position(&self) -> Result<Option<OpenPosition>, GatewayError> {
        let params = vec![("symbol", self.symbol.clone())];
        let data = self.signed_request(Method::GET, POSITIONS_PATH, params).await?;
        Ok(parse_position(&data))
    }
}

#[async_trait]
impl CandleSource for BingxClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let data = self.public_get(KLINES_PATH, params).await?;
        Ok(parse_klines(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_client() -> BingxClient {
        BingxClient::new(
            &ExchangeConfig::default(),
            &PositionConfig::default(),
            "DOGE-USDT",
            Some(BingxCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_signature_is_hex_hmac_of_query() {
        let query = build_query(&[
            ("symbol", "DOGE-USDT".to_string()),
            ("timestamp", "1700000000000".to_string()),
        ]);
        assert_eq!(query, "symbol=DOGE-USDT&timestamp=1700000000000");

        let signature = sign("secret", &query).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signature, sign("secret", &query).unwrap());
        assert_ne!(signature, sign("other", &query).unwrap());
    }

    #[test]
    fn test_protective_order_params() {
        let client = make_client();
        let params = client
            .order_params(&OrderRequest::stop_loss(Side::Buy, 4200.0, 0.0968))
            .unwrap();
        let query = build_query(&params);
        assert_eq!(
            query,
            "symbol=DOGE-USDT&side=SELL&positionSide=BOTH&type=STOP_MARKET&quantity=4200&stopPrice=0.0968&workingType=MARK_PRICE"
        );

        let missing = OrderRequest {
            trigger_price: None,
            ..OrderRequest::take_profit(Side::Buy, 1.0, 0.1)
        };
        assert!(matches!(
            client.order_params(&missing),
            Err(GatewayError::InvalidOrder(_))
        ));
        assert!(client
            .order_params(&OrderRequest::market(Side::Buy, 0.0))
            .is_err());
    }

    #[test]
    fn test_envelope_error_code() {
        let err = unwrap_envelope(json!({"code": 101204, "msg": "Insufficient margin"})).unwrap_err();
        assert_eq!(
            err,
            GatewayError::Api {
                code: 101204,
                msg: "Insufficient margin".to_string()
            }
        );
        let data = unwrap_envelope(json!({"code": 0, "data": {"x": 1}})).unwrap();
        assert_eq!(data["x"], 1);
    }

    #[test]
    fn test_parse_fill_variants() {
        let fill = parse_fill(&json!({"order": {"orderId": 123, "avgPrice": "0.15012"}}), 10.0);
        assert_eq!(fill.order_id.as_deref(), Some("123"));
        assert_eq!(fill.avg_price, Some(0.15012));
        assert_eq!(fill.quantity, 10.0);

        let fill = parse_fill(&json!({"orderId": "abc", "avgPrice": "0"}), 10.0);
        assert_eq!(fill.avg_price, None);
        assert_eq!(fill.price_or(0.2), 0.2);
    }

    #[test]
    fn test_parse_balance_shapes() {
        let list = json!({"balance": [
            {"asset": "BTC", "availableBalance": "1"},
            {"asset": "USDT", "availableBalance": "250.5"}
        ]});
        assert_eq!(parse_balance(&list).unwrap(), 250.5);

        let object = json!({"balance": {"asset": "USDT", "availableMargin": 99.25}});
        assert_eq!(parse_balance(&object).unwrap(), 99.25);

        assert!(parse_balance(&json!({"balance": []})).is_err());
    }

    #[test]
    fn test_parse_position_picks_non_zero() {
        let data = json!([
            {"positionAmt": "0", "entryPrice": "0.1"},
            {"positionAmt": "-1500", "entryPrice": "0.1523", "unrealizedProfit": "-2.1"}
        ]);
        let position = parse_position(&data).unwrap();
        assert_eq!(position.side, Side::Sell);
        assert_eq!(position.quantity, 1500.0);
        assert_eq!(position.entry_price, 0.1523);

        let fallback = json!([{"positionAmt": "10", "entryPrice": "0", "avgPrice": "0.2"}]);
        assert_eq!(parse_position(&fallback).unwrap().entry_price, 0.2);
        assert_eq!(parse_position(&json!([])), None);
    }

    #[test]
    fn test_parse_klines_both_forms() {
        let data = json!([
            {"open": "0.15", "close": "0.151", "high": "0.152", "low": "0.149", "volume": "1000", "time": 1700000000000i64},
            [1700000900000i64, "0.151", "0.153", "0.150", "0.152", "900"],
            {"open": "bad"}
        ]);
        let candles = parse_klines(&data).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert_eq!(candles[1].close, 0.152);
        assert!(parse_klines(&json!({"not": "a list"})).is_err());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let client = BingxClient::new(
            &ExchangeConfig::default(),
            &PositionConfig::default(),
            "DOGE-USDT",
            None,
        )
        .unwrap();
        assert_eq!(
            client.balance().await,
            Err(GatewayError::MissingCredentials("BINGX_API_KEY"))
        );
    }
}
