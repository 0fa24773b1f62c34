use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::MarketGateway;
use crate::config::ExchangeConfig;
use crate::error::GatewayError;
use crate::models::{Bar, ConditionalOrder, LimitOrder, OpenPosition, OrderRef, Side, Ticker};

pub const MEXC_API_BASE: &str = "https://api.mexc.com";
const QUOTE_ASSET: &str = "USDT";

type HmacSha256 = Hmac<Sha256>;

type MexcRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// MEXC spot REST client
///
/// Cloneable; all clones share the same HTTP pool and rate limiter.
#[derive(Clone)]
pub struct MexcClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<MexcRateLimiter>,
}

/// Response from /api/v3/ticker/24hr
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: String,
    high_price: String,
    low_price: String,
}

/// Response from /api/v3/account
#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

/// Response from POST /api/v3/order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: Value,
}

/// Entry of /api/v3/openOrders
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrder {
    side: String,
    price: String,
    orig_qty: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
}

impl MexcClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            rate_limiter,
        })
    }

    fn ensure_credentials(&self) -> Result<(), GatewayError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            Err(GatewayError::Auth("MEXC API key/secret required".to_string()))
        } else {
            Ok(())
        }
    }

    /// Append timestamp/recvWindow and the HMAC-SHA256 signature to a query
    fn sign_params(&self, mut params: Vec<(String, String)>) -> Result<String, GatewayError> {
        params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
        if self.recv_window_ms > 0 {
            params.push(("recvWindow".into(), self.recv_window_ms.to_string()));
        }

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| GatewayError::Malformed(format!("failed to encode query: {e}")))?;
        let signature = sign(&self.api_secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        read_json(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, GatewayError> {
        self.ensure_credentials()?;
        self.rate_limiter.until_ready().await;

        let query = self.sign_params(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .request(method, &url)
            .header("X-MEXC-APIKEY", &self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await?;
        read_json(response).await
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        stop_price: Option<f64>,
    ) -> Result<OrderRef, GatewayError> {
        let mut params = vec![
            ("symbol".to_string(), exchange_symbol(symbol)),
            ("side".to_string(), side.as_str().to_string()),
            ("type".to_string(), "LIMIT".to_string()),
            ("quantity".to_string(), quantity.to_string()),
            ("price".to_string(), price.to_string()),
        ];
        if let Some(stop) = stop_price {
            params.push(("stopPrice".to_string(), stop.to_string()));
        }

        let ack: OrderAck = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await?;

        let order_id = match ack.order_id {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            other => {
                return Err(GatewayError::Malformed(format!(
                    "unexpected orderId: {other}"
                )))
            }
        };

        Ok(OrderRef {
            order_id,
            symbol: symbol.to_string(),
        })
    }
}

#[async_trait]
impl MarketGateway for MexcClient {
    async fn ping(&self) -> Result<(), GatewayError> {
        let _: Value = self.public_get("/api/v3/ping", &[]).await?;
        Ok(())
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, GatewayError> {
        let params = [
            ("symbol", exchange_symbol(symbol)),
            ("interval", kline_interval(timeframe).to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.public_get("/api/v3/klines", &params).await?;

        let mut bars = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>, _>>()?;
        bars.sort_by_key(|bar| bar.timestamp);

        tracing::debug!(symbol = %symbol, timeframe = %timeframe, bars = bars.len(), "Fetched klines");
        Ok(bars)
    }

    async fn fetch_balance(&self) -> Result<f64, GatewayError> {
        let account: AccountInfo = self
            .signed_request(Method::GET, "/api/v3/account", Vec::new())
            .await?;

        match account.balances.iter().find(|b| b.asset == QUOTE_ASSET) {
            Some(balance) => Ok(parse_number(&balance.free)? + parse_number(&balance.locked)?),
            None => Ok(0.0),
        }
    }

    async fn submit_limit_order(&self, order: &LimitOrder) -> Result<OrderRef, GatewayError> {
        // Spot endpoint: leverage has no wire field
        self.place_order(&order.symbol, order.side, order.quantity, order.price, None)
            .await
    }

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderRef, GatewayError> {
        self.place_order(
            &order.symbol,
            order.side,
            order.quantity,
            order.price,
            Some(order.stop_price),
        )
        .await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        let raw: Ticker24h = self
            .public_get("/api/v3/ticker/24hr", &[("symbol", exchange_symbol(symbol))])
            .await?;

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: parse_number(&raw.last_price)?,
            high: parse_number(&raw.high_price)?,
            low: parse_number(&raw.low_price)?,
        })
    }

    async fn fetch_open_positions(
        &self,
        symbols: &[String],
    ) -> Result<Vec<OpenPosition>, GatewayError> {
        let mut positions = Vec::new();

        for symbol in symbols {
            let params = vec![("symbol".to_string(), exchange_symbol(symbol))];
            let orders: Vec<OpenOrder> = self
                .signed_request(Method::GET, "/api/v3/openOrders", params)
                .await?;

            for order in &orders {
                if let Some(position) = position_from_order(symbol, order)? {
                    positions.push(position);
                }
            }
        }

        Ok(positions)
    }
}

/// `BTC/USDT` -> `BTCUSDT`
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// MEXC spot names hourly and weekly klines differently
pub fn kline_interval(timeframe: &str) -> &str {
    match timeframe {
        "1h" => "60m",
        "1w" => "1W",
        other => other,
    }
}

/// Hex HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Auth(format!("failed to init signer: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Map a non-success status onto the gateway taxonomy
pub fn classify_status(status: StatusCode, message: String) -> GatewayError {
    match status.as_u16() {
        429 => GatewayError::RateLimited,
        401 | 403 => GatewayError::Auth(message),
        code @ 500..=599 => GatewayError::Server {
            status: code,
            message,
        },
        code => GatewayError::Rejected {
            status: code,
            message,
        },
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(classify_status(status, body));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn parse_number(raw: &str) -> Result<f64, GatewayError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| GatewayError::Malformed(format!("not a number: {raw:?}")))
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Kline row: [openTime, open, high, low, close, volume, closeTime, quoteVolume]
fn parse_kline(row: &[Value]) -> Result<Bar, GatewayError> {
    if row.len() < 6 {
        return Err(GatewayError::Malformed(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let field = |i: usize| {
        value_f64(&row[i]).ok_or_else(|| GatewayError::Malformed(format!("kline field {i}: {}", row[i])))
    };

    let open_time = row[0]
        .as_i64()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| GatewayError::Malformed(format!("kline open time: {}", row[0])))?;

    Ok(Bar {
        timestamp: open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

/// Resting orders imply exposure: a protective leg (has a stop) guards a
/// position on the opposite side, a plain limit is a pending entry.
fn position_from_order(symbol: &str, order: &OpenOrder) -> Result<Option<OpenPosition>, GatewayError> {
    let side = match order.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(GatewayError::Malformed(format!("order side {other:?}"))),
    };

    let quantity = parse_number(&order.orig_qty)?
        - order
            .executed_qty
            .as_deref()
            .map(parse_number)
            .transpose()?
            .unwrap_or(0.0);

    let stop_price = order
        .stop_price
        .as_deref()
        .map(parse_number)
        .transpose()?
        .filter(|stop| *stop > 0.0);

    let (side, reference_price) = match stop_price {
        Some(stop) => (side.opposite(), stop),
        None => (side, parse_number(&order.price)?),
    };

    if quantity <= 0.0 {
        return Ok(None);
    }

    Ok(Some(OpenPosition {
        symbol: symbol.to_string(),
        side,
        quantity,
        reference_price,
    }))
}
