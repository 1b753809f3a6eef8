//! Delta Exchange REST client
//!
//! Signed requests: `signature = hex(HMAC_SHA256(secret, method + timestamp +
//! path + query + body))`, sent with the `api-key`, `timestamp` and
//! `signature` headers. Quantities on the wire are whole contracts.

use super::{
    CandleHistory, Exchange, ExchangeError, OrderRequest, OrderResult, OrderStatus, OrderType,
    PositionSnapshot, ProductInfo,
};
use crate::candle::{Candle, Timeframe};
use crate::config::{ExchangeConfig, TradingConfig};
use crate::risk::AccountState;
use crate::telemetry::record_latency;
use crate::signal::Direction;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

/// Standard response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: Value,
    #[serde(default)]
    state: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    unfilled_size: i64,
    #[serde(default)]
    average_fill_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    #[serde(default)]
    size: i64,
    #[serde(default)]
    entry_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    asset_symbol: String,
    balance: Decimal,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    id: u64,
    symbol: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    contract_value: Option<Decimal>,
}

/// Client for the Delta Exchange REST API
pub struct DeltaClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    product_id: u64,
    symbol: String,
    lot_size: Decimal,
    settlement_asset: String,
    timeout: Duration,
}

impl DeltaClient {
    /// Create a client for the configured product
    pub fn new(exchange: &ExchangeConfig, trading: &TradingConfig) -> Result<Self, ExchangeError> {
        let timeout = Duration::from_millis(exchange.request_timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(exchange.user_agent.clone())
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: exchange.base_url.trim_end_matches('/').to_string(),
            api_key: exchange.api_key.clone(),
            api_secret: exchange.api_secret.clone(),
            product_id: trading.product_id,
            symbol: trading.symbol.clone(),
            lot_size: trading.lot_size,
            settlement_asset: trading.settlement_asset.clone(),
            timeout,
        })
    }

    /// Symbol this client trades
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// List products whose symbol or description contains `filter` (case-insensitive)
    pub async fn list_products(&self, filter: Option<&str>) -> Result<Vec<ProductInfo>, ExchangeError> {
        let products: Vec<ProductResponse> =
            self.request(Method::GET, "/v2/products", &[], None, false).await?;
        let needle = filter.map(|f| f.to_lowercase());

        Ok(products
            .into_iter()
            .filter(|p| match &needle {
                Some(n) => {
                    p.symbol.to_lowercase().contains(n.as_str())
                        || p.description.to_lowercase().contains(n.as_str())
                }
                None => true,
            })
            .map(|p| ProductInfo {
                id: p.id,
                symbol: p.symbol,
                description: p.description,
                contract_type: p.contract_type,
                contract_value: p.contract_value,
            })
            .collect())
    }

    /// Whole contracts for a base-unit quantity
    fn to_contracts(&self, size: Decimal) -> i64 {
        let contracts = (size / self.lot_size).round_dp_with_strategy(0, RoundingStrategy::ToZero);
        i64::try_from(contracts).unwrap_or(0)
    }

    fn from_contracts(&self, contracts: i64) -> Decimal {
        Decimal::from(contracts) * self.lot_size
    }

    fn order_id_value(order_id: &str) -> Value {
        order_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(order_id))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let query_string = if query.is_empty() {
            String::new()
        } else {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("?{}", pairs.join("&"))
        };
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let url = format!("{}{}{}", self.base_url, path, query_string);

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if signed {
            let timestamp = Utc::now().timestamp().to_string();
            let payload = prehash(method.as_str(), &timestamp, path, &query_string, &body);
            builder = builder
                .header("api-key", &self.api_key)
                .header("timestamp", &timestamp)
                .header("signature", sign(&self.api_secret, &payload));
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout(self.timeout)
            } else {
                ExchangeError::Network(e.to_string())
            }
        })?;
        record_latency(path, started.elapsed());

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(%status, path, body = %text, "Delta request failed");
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unsuccessful response".to_string());
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        envelope
            .result
            .ok_or_else(|| ExchangeError::Decode("missing result".to_string()))
    }

    fn order_result(&self, order: OrderResponse, order_type: OrderType) -> OrderResult {
        let filled_contracts = (order.size - order.unfilled_size).max(0);
        let filled_size = self.from_contracts(filled_contracts);
        let status = match order.state.as_str() {
            _ if order_type == OrderType::StopMarket => OrderStatus::Accepted,
            "closed" if order.unfilled_size == 0 && filled_contracts > 0 => OrderStatus::Filled,
            "closed" | "cancelled" if filled_contracts > 0 => OrderStatus::PartiallyFilled,
            "cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Accepted,
        };
        let id = match order.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        OrderResult {
            id,
            status,
            fill_price: order.average_fill_price,
            filled_size,
            reason: None,
        }
    }
}

/// String that gets signed
pub fn prehash(method: &str, timestamp: &str, path: &str, query: &str, body: &str) -> String {
    format!("{}{}{}{}{}", method, timestamp, path, query, body)
}

/// Hex HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .map(|e| e.to_string())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[async_trait]
impl Exchange for DeltaClient {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, ExchangeError> {
        let contracts = self.to_contracts(order.size);
        if contracts <= 0 {
            return Err(ExchangeError::Rejected(format!(
                "size {} is below one contract",
                order.size
            )));
        }

        let mut body = json!({
            "product_id": self.product_id,
            "size": contracts,
            "side": order.side.as_str(),
            "order_type": "market_order",
            "reduce_only": order.reduce_only,
        });
        match order.order_type {
            OrderType::Market => {
                body["time_in_force"] = json!("ioc");
            }
            OrderType::StopMarket => {
                let stop_price = order
                    .stop_price
                    .ok_or_else(|| ExchangeError::Rejected("stop order without stop price".into()))?;
                body["stop_order_type"] = json!("stop_loss_order");
                body["stop_price"] = json!(stop_price.round_dp(2).to_string());
            }
        }

        tracing::info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            contracts,
            order_type = ?order.order_type,
            reduce_only = order.reduce_only,
            "Placing order"
        );

        let response: Result<OrderResponse, _> =
            self.request(Method::POST, "/v2/orders", &[], Some(body), true).await;
        match response {
            Ok(order_response) => Ok(self.order_result(order_response, order.order_type)),
            // Client errors on order placement are refusals, not transport failures
            Err(ExchangeError::Api { status, message }) if (400..500).contains(&status) && status != 429 => {
                Ok(OrderResult {
                    id: String::new(),
                    status: OrderStatus::Rejected,
                    fill_price: None,
                    filled_size: Decimal::ZERO,
                    reason: Some(message),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn modify_stop(&self, order_id: &str, stop_price: Decimal) -> Result<(), ExchangeError> {
        let body = json!({
            "id": Self::order_id_value(order_id),
            "product_id": self.product_id,
            "stop_price": stop_price.round_dp(2).to_string(),
        });
        let _: Value = self.request(Method::PUT, "/v2/orders", &[], Some(body), true).await?;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let body = json!({
            "id": Self::order_id_value(order_id),
            "product_id": self.product_id,
        });
        let _: Value = self
            .request(Method::DELETE, "/v2/orders", &[], Some(body), true)
            .await?;
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, ExchangeError> {
        if symbol != self.symbol {
            tracing::warn!(symbol, configured = %self.symbol, "Position read for a different symbol");
        }
        let query = [("product_id", self.product_id.to_string())];
        let position: PositionResponse = self
            .request(Method::GET, "/v2/positions", &query, None, true)
            .await?;

        if position.size == 0 {
            return Ok(None);
        }
        let direction = if position.size > 0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Ok(Some(PositionSnapshot {
            direction,
            size: self.from_contracts(position.size.abs()),
            entry_price: position.entry_price.unwrap_or(Decimal::ZERO),
        }))
    }

    async fn get_balance(&self) -> Result<AccountState, ExchangeError> {
        let balances: Vec<BalanceResponse> = self
            .request(Method::GET, "/v2/wallet/balances", &[], None, true)
            .await?;
        let wallet = balances
            .into_iter()
            .find(|b| b.asset_symbol.eq_ignore_ascii_case(&self.settlement_asset))
            .ok_or_else(|| {
                ExchangeError::Decode(format!("no {} wallet in balances", self.settlement_asset))
            })?;
        Ok(AccountState::new(wallet.balance, wallet.available_balance))
    }
}

#[async_trait]
impl CandleHistory for DeltaClient {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = [
            ("resolution", timeframe.as_str().to_string()),
            ("symbol", symbol.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ];
        let rows: Vec<CandleResponse> = self
            .request(Method::GET, "/v2/history/candles", &query, None, false)
            .await?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .filter_map(|row| {
                let open_time = Utc.timestamp_opt(row.time, 0).single()?;
                Some(Candle {
                    open_time,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                    closed: true,
                })
            })
            .collect();
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}
