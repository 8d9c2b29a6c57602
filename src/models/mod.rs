use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison operator a price trigger is armed with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerOp {
    /// Fire when price >= target
    GTE,
    /// Fire when price <= target
    LTE,
    /// Fire on the next manual poll, no price condition
    IMMEDIATE,
}

impl TriggerOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GTE" => Some(Self::GTE),
            "LTE" => Some(Self::LTE),
            "IMMEDIATE" => Some(Self::IMMEDIATE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GTE => "GTE",
            Self::LTE => "LTE",
            Self::IMMEDIATE => "IMMEDIATE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerKind {
    PriceLevel,
    Manual,
    Time,
}

impl TriggerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRICE_LEVEL" => Some(Self::PriceLevel),
            "MANUAL" => Some(Self::Manual),
            "TIME" => Some(Self::Time),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceLevel => "PRICE_LEVEL",
            Self::Manual => "MANUAL",
            Self::Time => "TIME",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerStatus {
    Active,
    Triggered,
    Cancelled,
}

impl TriggerStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "TRIGGERED" => Some(Self::Triggered),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Triggered => "TRIGGERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// A stored wake condition for the decision loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub description: String,
    pub symbol: String,
    pub operator: TriggerOp,
    pub target_value: f64,
    pub kind: TriggerKind,
    pub status: TriggerStatus,
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    /// Manual triggers (and IMMEDIATE operators) are due on the next poll,
    /// independent of price.
    pub fn is_manual(&self) -> bool {
        self.kind == TriggerKind::Manual || self.operator == TriggerOp::IMMEDIATE
    }
}

/// Trigger row to be inserted (id assigned by the store)
#[derive(Debug, Clone)]
pub struct NewTrigger {
    pub description: String,
    pub symbol: String,
    pub operator: TriggerOp,
    pub target_value: f64,
    pub kind: TriggerKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Some(Self::New),
            "FILLED" => Some(Self::Filled),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// Current holding in one symbol, weighted-average cost basis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub amount: f64,
    pub avg_entry_price: f64,
    pub last_mark_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            amount: 0.0,
            avg_entry_price: 0.0,
            last_mark_price: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    /// Mark-to-market value of the holding
    pub fn market_value(&self) -> f64 {
        self.amount * self.last_mark_price
    }
}

/// Immutable record of one completed fill, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub order_id: String,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// One decision cycle's audit row, persisted unconditionally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_type: String,
    /// Context snapshot handed to the reasoning backend
    pub input_data: serde_json::Value,
    /// Parsed output, or `{"error": ..., "raw_response": ...}` on failure
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// What woke the coordinator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WakeKind {
    /// Hard GTE/LTE hit
    TriggerHit,
    /// Price within 0.5% of a target
    ProximityAlert,
    /// User-initiated manual trigger
    ManualIntervention,
}

impl WakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerHit => "TRIGGER_HIT",
            Self::ProximityAlert => "PROXIMITY_ALERT",
            Self::ManualIntervention => "MANUAL_INTERVENTION",
        }
    }
}

/// Locally computed indicator digest included in the wake event so the
/// reasoning backend does not have to be sent raw klines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSummary {
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub volatility: Option<f64>,
    pub trend: Option<String>,
    pub price_vs_sma20_pct: Option<f64>,
}

/// TRADE action parameters as produced by the reasoning backend. Parsed
/// permissively: the model sometimes writes `action` instead of `side`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeParams {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, alias = "action")]
    pub side: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// The discrete event handed to the decision coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeEvent {
    pub kind: WakeKind,
    pub symbol: String,
    pub current_price: f64,
    pub reason: String,
    pub technical_summary: MarketSummary,
    pub timestamp: DateTime<Utc>,
}
