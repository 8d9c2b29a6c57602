use crate::api::OrderRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard pre-trade limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Daily-loss circuit breaker as a fraction of initial equity
    pub max_daily_loss: f64,
    /// Fat-finger cap: max order notional as a fraction of equity
    pub max_order_fraction: f64,
    /// Exchange dust floor in quote currency
    pub min_notional: f64,
    /// Max fills in the trailing 24h window
    pub daily_trade_limit: u32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.05,
            max_order_fraction: 0.20,
            min_notional: 10.0,
            daily_trade_limit: 20,
        }
    }
}

/// Why an order was blocked. A rejection is expected policy output, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyReject {
    InvalidQuantity(f64),
    UnknownNotional,
    BelowMinNotional { notional: f64, min: f64 },
    FatFinger { notional: f64, cap: f64 },
    CircuitBreaker { drawdown: f64 },
    TradeLimit { count: u32, limit: u32 },
}

impl fmt::Display for SafetyReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidQuantity(q) => write!(f, "invalid quantity {}", q),
            Self::UnknownNotional => write!(f, "cannot compute order notional"),
            Self::BelowMinNotional { notional, min } => {
                write!(f, "notional ${:.2} below minimum ${:.2}", notional, min)
            }
            Self::FatFinger { notional, cap } => {
                write!(f, "notional ${:.2} exceeds per-order cap ${:.2}", notional, cap)
            }
            Self::CircuitBreaker { drawdown } => {
                write!(f, "daily loss limit reached ({:.1}% drawdown), trading halted", drawdown * 100.0)
            }
            Self::TradeLimit { count, limit } => {
                write!(f, "trade frequency cap reached ({} of {})", count, limit)
            }
        }
    }
}

/// Pre-trade policy checks, run in order and short-circuiting.
///
/// The guard never mutates anything; anything it cannot evaluate is a
/// rejection (fail closed).
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    limits: SafetyLimits,
    /// Circuit-breaker baseline captured at startup
    initial_equity: f64,
}

impl SafetyGuard {
    pub fn new(limits: SafetyLimits, initial_equity: f64) -> Self {
        tracing::info!(
            "SafetyGuard armed: max_daily_loss={:.0}%, max_order_fraction={:.0}%, min_notional=${}, daily_trade_limit={}",
            limits.max_daily_loss * 100.0,
            limits.max_order_fraction * 100.0,
            limits.min_notional,
            limits.daily_trade_limit
        );
        Self {
            limits,
            initial_equity,
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Gate an order against current equity and the trailing trade count
    pub fn check(
        &self,
        equity: f64,
        recent_trades: u32,
        order: &OrderRequest,
    ) -> Result<(), SafetyReject> {
        // 1. Basic sanity
        if !(order.quantity > 0.0) || !order.quantity.is_finite() {
            return Err(SafetyReject::InvalidQuantity(order.quantity));
        }

        let notional = match order.notional() {
            Some(n) if n.is_finite() && n > 0.0 => n,
            _ => return Err(SafetyReject::UnknownNotional),
        };

        // 2. Dust check
        if notional < self.limits.min_notional {
            return Err(SafetyReject::BelowMinNotional {
                notional,
                min: self.limits.min_notional,
            });
        }

        // 3. Fat finger: single order vs equity
        let cap = equity * self.limits.max_order_fraction;
        if !cap.is_finite() || notional > cap {
            return Err(SafetyReject::FatFinger { notional, cap });
        }

        // 4. Daily-loss circuit breaker vs the initial-equity baseline
        if self.initial_equity > 0.0 {
            let drawdown = (self.initial_equity - equity) / self.initial_equity;
            if drawdown > self.limits.max_daily_loss {
                return Err(SafetyReject::CircuitBreaker { drawdown });
            }
        }

        // 5. Frequency cap on the trailing window
        if recent_trades >= self.limits.daily_trade_limit {
            return Err(SafetyReject::TradeLimit {
                count: recent_trades,
                limit: self.limits.daily_trade_limit,
            });
        }

        tracing::debug!(
            "Safety checks passed: {} {} notional ${:.2}",
            order.symbol,
            order.side.as_str(),
            notional
        );
        Ok(())
    }
}
