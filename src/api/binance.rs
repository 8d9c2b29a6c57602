use super::{GatewayError, Kline, MarketGateway, OrderFill, OrderRequest, OrderType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;

const BINANCE_API_BASE: &str = "https://api.binance.com";
const RECV_WINDOW_MS: u64 = 5000;
// Binance allows 1200 request weight/min; stay well under it
const REQUESTS_PER_SECOND: u32 = 10;

type HmacSha256 = Hmac<Sha256>;

/// Live REST client for the Binance spot API
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    limiter: DefaultDirectRateLimiter,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: String,
    #[serde(default)]
    status: String,
}

impl BinanceClient {
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> Self {
        if api_key.is_none() {
            tracing::warn!("Binance API keys not set, client limited to public endpoints");
        }

        Self {
            client: Client::new(),
            base_url: BINANCE_API_BASE.to_string(),
            api_key,
            api_secret,
            limiter: RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(REQUESTS_PER_SECOND).unwrap(),
            )),
        }
    }

    /// Point the client at a different host (testnet, mock server)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn sign(&self, query: &str) -> Result<String, GatewayError> {
        let secret = self
            .api_secret
            .as_deref()
            .ok_or_else(|| GatewayError::Credentials("api secret required".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::Credentials(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &str) -> Result<String, GatewayError> {
        let timestamp = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("recvWindow={}&timestamp={}", RECV_WINDOW_MS, timestamp)
        } else {
            format!(
                "{}&recvWindow={}&timestamp={}",
                params, RECV_WINDOW_MS, timestamp
            )
        };
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Credentials("api key required".to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn parse_f64(value: &str, what: &str) -> Result<f64, GatewayError> {
        value
            .parse::<f64>()
            .map_err(|e| GatewayError::Parse(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl MarketGateway for BinanceClient {
    async fn get_ticker(&self, symbol: &str) -> Result<f64, GatewayError> {
        self.limiter.until_ready().await;

        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let response = Self::check_status(self.client.get(&url).send().await?).await?;
        let ticker: TickerResponse = response.json().await?;

        Self::parse_f64(&ticker.price, "ticker price")
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, GatewayError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let response = Self::check_status(self.client.get(&url).send().await?).await?;

        // Binance returns heterogeneous arrays:
        // [open_time, "open", "high", "low", "close", "volume", close_time, ...]
        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        let mut klines = Vec::with_capacity(rows.len());

        for row in rows {
            if row.len() < 6 {
                return Err(GatewayError::Parse("kline row too short".to_string()));
            }
            let open_time_ms = row[0]
                .as_i64()
                .ok_or_else(|| GatewayError::Parse("kline open time".to_string()))?;
            let field = |i: usize, what: &str| -> Result<f64, GatewayError> {
                let s = row[i]
                    .as_str()
                    .ok_or_else(|| GatewayError::Parse(format!("kline {}", what)))?;
                Self::parse_f64(s, what)
            };

            klines.push(Kline {
                open_time: Utc
                    .timestamp_millis_opt(open_time_ms)
                    .single()
                    .ok_or_else(|| GatewayError::Parse("kline timestamp".to_string()))?,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
            });
        }

        Ok(klines)
    }

    async fn get_balances(&self) -> Result<HashMap<String, f64>, GatewayError> {
        self.limiter.until_ready().await;

        let query = self.signed_query("")?;
        let url = format!("{}/api/v3/account?{}", self.base_url, query);
        let response = Self::check_status(
            self.client
                .get(&url)
                .header("X-MBX-APIKEY", self.api_key()?)
                .send()
                .await?,
        )
        .await?;
        let account: AccountResponse = response.json().await?;

        let mut balances = HashMap::new();
        for entry in account.balances {
            let free = Self::parse_f64(&entry.free, "balance free")?;
            let locked = Self::parse_f64(&entry.locked, "balance locked")?;
            if free > 0.0 || locked > 0.0 {
                balances.insert(entry.asset, free + locked);
            }
        }
        Ok(balances)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        self.limiter.until_ready().await;

        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}",
            order.symbol,
            order.side.as_str(),
            order.order_type.as_str(),
            order.quantity
        );
        if order.order_type == OrderType::Limit {
            let price = order.price.ok_or_else(|| {
                GatewayError::OrderRejected("limit order without price".to_string())
            })?;
            params.push_str(&format!("&price={}&timeInForce=GTC", price));
        }

        let query = self.signed_query(&params)?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let response = Self::check_status(
            self.client
                .post(&url)
                .header("X-MBX-APIKEY", self.api_key()?)
                .send()
                .await?,
        )
        .await?;
        let order_res: OrderResponse = response.json().await?;

        tracing::info!(
            order_id = order_res.order_id,
            status = %order_res.status,
            "Order placed on Binance"
        );

        Ok(OrderFill {
            order_id: order_res.order_id.to_string(),
            executed_qty: Self::parse_f64(&order_res.executed_qty, "executed qty")?,
            cumulative_quote: Self::parse_f64(&order_res.cummulative_quote_qty, "quote qty")?,
            status: order_res.status,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError> {
        self.limiter.until_ready().await;

        let params = format!("symbol={}&orderId={}", symbol, order_id);
        let query = self.signed_query(&params)?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        Self::check_status(
            self.client
                .delete(&url)
                .header("X-MBX-APIKEY", self.api_key()?)
                .send()
                .await?,
        )
        .await?;

        tracing::info!(symbol, order_id, "Order cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    #[tokio::test]
    async fn test_get_ticker_mock() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price?symbol=BTCUSDT")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol":"BTCUSDT","price":"65000.50"}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(None, None).with_base_url(&server.url());
        let price = client.get_ticker("BTCUSDT").await.unwrap();

        assert_eq!(price, 65000.50);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_ticker_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price?symbol=NOPE")
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(None, None).with_base_url(&server.url());
        let err = client.get_ticker("NOPE").await.unwrap_err();

        match err {
            GatewayError::Api { status, .. } => assert_eq!(status, 400),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_klines_mock() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines?symbol=BTCUSDT&interval=1h&limit=2")
            .with_status(200)
            .with_body(
                r#"[[1700000000000,"100.0","110.0","95.0","105.0","12.5",1700003599999,"0",0,"0","0","0"],
                    [1700003600000,"105.0","112.0","104.0","111.0","9.1",1700007199999,"0",0,"0","0","0"]]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(None, None).with_base_url(&server.url());
        let klines = client.get_klines("BTCUSDT", "1h", 2).await.unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].close, 105.0);
        assert_eq!(klines[1].volume, 9.1);
    }

    #[tokio::test]
    async fn test_signed_endpoints_require_credentials() {
        let client = BinanceClient::new(None, None);
        let order = OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: 0.01,
            price: None,
        };
        assert!(matches!(
            client.place_order(&order).await,
            Err(GatewayError::Credentials(_))
        ));
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let client = BinanceClient::new(
            Some("key".to_string()),
            Some("secret".to_string()),
        );
        let sig = client.sign("symbol=BTCUSDT&side=BUY").unwrap();
        // HMAC-SHA256 hex digest is 64 chars and stable for fixed inputs
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, client.sign("symbol=BTCUSDT&side=BUY").unwrap());
    }
}
