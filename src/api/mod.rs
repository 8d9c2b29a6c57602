// Market/order gateway interface and its two variants
pub mod binance;
pub mod paper;
pub mod stream;

pub use binance::BinanceClient;
pub use paper::PaperGateway;
pub use stream::{create_tick_channel, run_trade_stream, subscribe_trades, Tick};

use crate::models::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Typed error surface for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected request ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Missing credentials: {0}")]
    Credentials(String),

    #[error("Order rejected by exchange: {0}")]
    OrderRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

/// Order to be routed through a gateway
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Limit price, or the reference price a paper fill should use
    pub price: Option<f64>,
}

impl OrderRequest {
    /// price * quantity when a price is known
    pub fn notional(&self) -> Option<f64> {
        self.price.map(|p| p * self.quantity)
    }
}

/// Exchange response to a placed order
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    pub executed_qty: f64,
    pub cumulative_quote: f64,
    pub status: String,
}

impl OrderFill {
    /// Average fill price reconciled from the quote total
    pub fn avg_price(&self) -> Option<f64> {
        if self.executed_qty > 0.0 {
            Some(self.cumulative_quote / self.executed_qty)
        } else {
            None
        }
    }
}

/// One OHLCV bar
#[derive(Debug, Clone)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The single gateway interface both the live and paper variants implement.
/// Coordinator and router depend only on this trait, never on a mode.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Latest traded price for a symbol
    async fn get_ticker(&self, symbol: &str) -> Result<f64, GatewayError>;

    /// Recent OHLCV bars, newest last
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, GatewayError>;

    /// Non-zero asset balances
    async fn get_balances(&self) -> Result<HashMap<String, f64>, GatewayError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError>;
}
