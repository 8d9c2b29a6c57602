use super::{AccountLedger, PositionBook, SafetyGuard};
use crate::api::{MarketGateway, OrderRequest, OrderType};
use crate::config::TradingMode;
use crate::db::Store;
use crate::models::{OrderStatus, Position, Side, TradeParams, TradeRecord};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Config key the paper cash balance is persisted under
pub const CASH_BALANCE_KEY: &str = "cash_balance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Order filled and all three effects applied
    Filled,
    /// Blocked by policy (safety guard or insufficient balance), expected
    Rejected,
    /// Nothing to do (HOLD or unsupported action)
    Skipped,
    /// Gateway/persistence failure
    Failed,
}

/// Outcome of routing one TRADE action
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub order_id: Option<String>,
    pub message: String,
    pub filled_price: f64,
    pub filled_qty: f64,
}

impl ExecutionResult {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            order_id: None,
            message: message.into(),
            filled_price: 0.0,
            filled_qty: 0.0,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            order_id: None,
            message: message.into(),
            filled_price: 0.0,
            filled_qty: 0.0,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            order_id: None,
            message: message.into(),
            filled_price: 0.0,
            filled_qty: 0.0,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == ExecutionStatus::Filled
    }
}

/// Caller-facing account digest
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub cash_balance: f64,
    pub positions_value: f64,
    pub equity: f64,
    pub mode: String,
}

struct ExecState {
    positions: PositionBook,
    ledger: AccountLedger,
}

/// Turns a TRADE action into an atomic ledger/position/trade-log mutation
/// after the hard safety gates. Sole writer of all three.
pub struct ExecutionRouter {
    gateway: Arc<dyn MarketGateway>,
    store: Arc<dyn Store>,
    guard: SafetyGuard,
    state: Mutex<ExecState>,
    mode: TradingMode,
    paper_fee_rate: f64,
    quote_asset: String,
}

impl ExecutionRouter {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        store: Arc<dyn Store>,
        guard: SafetyGuard,
        ledger: AccountLedger,
        positions: PositionBook,
        paper_fee_rate: f64,
        quote_asset: String,
    ) -> Self {
        let mode = ledger.mode();
        tracing::info!("ExecutionRouter initialized in [{}] mode", mode.as_str());
        Self {
            gateway,
            store,
            guard,
            state: Mutex::new(ExecState { positions, ledger }),
            mode,
            paper_fee_rate,
            quote_asset,
        }
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state.lock().unwrap().positions.open_positions()
    }

    pub fn account_summary(&self) -> AccountSummary {
        let state = self.state.lock().unwrap();
        let cash = state.ledger.cash_balance();
        let positions_value = state.positions.market_value();
        AccountSummary {
            cash_balance: cash,
            positions_value,
            equity: cash + positions_value,
            mode: self.mode.as_str().to_string(),
        }
    }

    /// Execute one TRADE action end to end.
    ///
    /// Never panics and never raises past this boundary: every outcome is
    /// an ExecutionResult so a failed trade cannot take down the tick loop.
    pub async fn execute(&self, params: &TradeParams) -> ExecutionResult {
        // 1. Only BUY/SELL are actionable; everything else is a no-op
        let side = match params.side.as_deref().and_then(Side::parse) {
            Some(s) => s,
            None => {
                return ExecutionResult::skipped(format!(
                    "Ignored action: {}",
                    params.side.as_deref().unwrap_or("HOLD")
                ))
            }
        };

        let symbol = match params.symbol.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return ExecutionResult::failed("Missing symbol in decision"),
        };

        let quantity = match params.quantity {
            Some(q) if q > 0.0 => q,
            _ => return ExecutionResult::failed("Missing quantity in decision"),
        };

        let order_type = params
            .order_type
            .as_deref()
            .and_then(OrderType::parse)
            .unwrap_or(OrderType::Market);

        // 2. Resolve a reference price. A market order with no price cannot
        // be notional-checked, so it fails closed; a limit order can fall
        // back to its own limit price.
        let reference_price = match self.gateway.get_ticker(&symbol).await {
            Ok(p) => p,
            Err(e) => match (order_type, params.price) {
                (OrderType::Limit, Some(p)) if p > 0.0 => {
                    tracing::warn!(
                        "No reference price for {} ({}), falling back to limit price",
                        symbol,
                        e
                    );
                    p
                }
                _ => {
                    return ExecutionResult::failed(format!(
                        "No reference price for {}: {}",
                        symbol, e
                    ))
                }
            },
        };

        let order_price = match order_type {
            OrderType::Limit => params.price.unwrap_or(reference_price),
            OrderType::Market => reference_price,
        };
        let order = OrderRequest {
            symbol: symbol.clone(),
            side,
            order_type,
            quantity,
            price: Some(order_price),
        };
        let notional = order_price * quantity;

        // 3. Snapshot ledger/holdings without holding the lock across awaits
        let (cash, held_amount, positions_value) = {
            let state = self.state.lock().unwrap();
            (
                state.ledger.cash_balance(),
                state.positions.amount(&symbol),
                state.positions.market_value(),
            )
        };

        // Equity base: paper mode trusts the ledger; live mode asks the
        // exchange for the quote balance (conservative) plus marked holdings
        let equity = match self.mode {
            TradingMode::Paper => cash + positions_value,
            TradingMode::Live => match self.gateway.get_balances().await {
                Ok(balances) => {
                    balances.get(&self.quote_asset).copied().unwrap_or(0.0) + positions_value
                }
                Err(e) => {
                    return ExecutionResult::failed(format!("Cannot fetch balances: {}", e))
                }
            },
        };

        // 4. Ledger affordability, distinct from the equity caps below
        {
            let state = self.state.lock().unwrap();
            if let Err(reject) = state
                .ledger
                .validate_balance(side, notional, quantity, held_amount)
            {
                tracing::warn!("Order rejected: {}", reject);
                return ExecutionResult::rejected(reject.to_string());
            }
        }

        // 5. Hard safety gates
        let recent_trades = match self
            .store
            .count_trades_since(Utc::now() - Duration::hours(24))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                // Fail closed: an unknown trade count blocks the frequency cap
                return ExecutionResult::failed(format!("Cannot check trade frequency: {}", e));
            }
        };

        if let Err(reject) = self.guard.check(equity, recent_trades, &order) {
            tracing::warn!("Blocked by SafetyGuard: {}", reject);
            return ExecutionResult::rejected(format!("Blocked by SafetyGuard: {}", reject));
        }

        // 6. Route through the gateway (paper fills locally, live goes out)
        if self.mode == TradingMode::Live {
            tracing::warn!(
                "SENDING LIVE ORDER: {} {} {}",
                order.symbol,
                order.side.as_str(),
                order.quantity
            );
        }

        let fill = match self.gateway.place_order(&order).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("Order routing failed: {}", e);
                return ExecutionResult::failed(format!("Gateway error: {}", e));
            }
        };

        if fill.status.eq_ignore_ascii_case("REJECTED") {
            return ExecutionResult::rejected(format!("Exchange rejected order {}", fill.order_id));
        }

        // 7. Reconcile the fill
        let filled_qty = if fill.executed_qty > 0.0 {
            fill.executed_qty
        } else {
            return ExecutionResult::failed(format!(
                "Order {} reported no executed quantity",
                fill.order_id
            ));
        };
        let filled_price = fill.avg_price().unwrap_or(order_price);
        let filled_notional = filled_price * filled_qty;
        let fee = match self.mode {
            TradingMode::Paper => filled_notional * self.paper_fee_rate,
            TradingMode::Live => 0.0,
        };

        let trade = TradeRecord {
            symbol: symbol.clone(),
            side,
            price: filled_price,
            quantity: filled_qty,
            fee,
            order_id: fill.order_id.clone(),
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
        };
        let new_position = {
            let state = self.state.lock().unwrap();
            state
                .positions
                .after_fill(&symbol, side, filled_qty, filled_price)
        };
        let new_cash = {
            let state = self.state.lock().unwrap();
            match side {
                Side::Buy => state.ledger.cash_balance() - filled_notional,
                Side::Sell => state.ledger.cash_balance() + filled_notional - fee,
            }
        };

        // 8. Three effects as one logical unit: trade log, position, ledger.
        // Any persistence failure makes the whole fill unsuccessful and
        // leaves the in-memory state untouched.
        if let Err(e) = self.store.append_trade(&trade).await {
            tracing::error!("Trade log append failed, fill NOT applied: {}", e);
            return ExecutionResult::failed(format!("Trade log append failed: {}", e));
        }
        if let Err(e) = self.store.upsert_position(&new_position).await {
            tracing::error!("Position persist failed, fill NOT applied: {}", e);
            return ExecutionResult::failed(format!("Position persist failed: {}", e));
        }
        if let Err(e) = self
            .store
            .set_config(CASH_BALANCE_KEY, &format!("{:.8}", new_cash))
            .await
        {
            tracing::error!("Ledger persist failed, fill NOT applied: {}", e);
            return ExecutionResult::failed(format!("Ledger persist failed: {}", e));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.positions.commit(new_position);
            state.ledger.apply_fill(side, filled_notional, fee);
        }

        tracing::info!(
            "Fill applied: {} {} {:.8} @ {:.2} (order {})",
            symbol,
            side.as_str(),
            filled_qty,
            filled_price,
            fill.order_id
        );

        ExecutionResult {
            status: ExecutionStatus::Filled,
            order_id: Some(fill.order_id),
            message: match self.mode {
                TradingMode::Paper => "Paper order filled".to_string(),
                TradingMode::Live => "Live order filled".to_string(),
            },
            filled_price,
            filled_qty,
        }
    }
}
