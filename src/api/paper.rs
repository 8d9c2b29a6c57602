use super::{GatewayError, Kline, MarketGateway, OrderFill, OrderRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Paper-trading gateway variant.
///
/// Market data passes through to the inner (real) gateway so the simulation
/// sees real prices; orders are filled immediately and locally with a
/// synthetic id. Cash and holdings are NOT tracked here; the AccountLedger
/// is the single authority for the simulated account.
pub struct PaperGateway {
    inner: Arc<dyn MarketGateway>,
}

impl PaperGateway {
    pub fn new(inner: Arc<dyn MarketGateway>) -> Self {
        tracing::info!("Paper trading gateway enabled, orders will be simulated");
        Self { inner }
    }
}

#[async_trait]
impl MarketGateway for PaperGateway {
    async fn get_ticker(&self, symbol: &str) -> Result<f64, GatewayError> {
        self.inner.get_ticker(symbol).await
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, GatewayError> {
        self.inner.get_klines(symbol, interval, limit).await
    }

    async fn get_balances(&self) -> Result<HashMap<String, f64>, GatewayError> {
        // No exchange account exists in paper mode; the ledger owns the cash
        Ok(HashMap::new())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        // Full fill at the supplied reference/limit price, fetching a fresh
        // ticker only when the router did not resolve one
        let fill_price = match order.price {
            Some(p) => p,
            None => self.inner.get_ticker(&order.symbol).await?,
        };

        let order_id = format!("paper-{}", &Uuid::new_v4().simple().to_string()[..8]);

        tracing::info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            qty = order.quantity,
            price = fill_price,
            order_id = %order_id,
            "Simulated order filled"
        );

        Ok(OrderFill {
            order_id,
            executed_qty: order.quantity,
            cumulative_quote: fill_price * order.quantity,
            status: "FILLED".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), GatewayError> {
        tracing::info!(order_id, "Simulated order cancelled");
        Ok(())
    }
}
