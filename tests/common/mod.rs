use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tradewake::api::{GatewayError, Kline, MarketGateway, OrderFill, OrderRequest};
use tradewake::db::{MemStore, Store};
use tradewake::execution::{
    AccountLedger, ExecutionRouter, PositionBook, SafetyGuard, SafetyLimits,
};
use tradewake::config::TradingMode;
use tradewake::llm::ReasoningBackend;
use tradewake::models::Position;
use tradewake::Result;

/// Gateway fake with a settable price and a recorded order log
pub struct FakeGateway {
    price: Mutex<f64>,
    fail_ticker: AtomicBool,
    orders: Mutex<Vec<OrderRequest>>,
}

impl FakeGateway {
    pub fn new(price: f64) -> Self {
        Self {
            price: Mutex::new(price),
            fail_ticker: AtomicBool::new(false),
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_fail_ticker(&self, fail: bool) {
        self.fail_ticker.store(fail, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl MarketGateway for FakeGateway {
    async fn get_ticker(&self, _symbol: &str) -> std::result::Result<f64, GatewayError> {
        if self.fail_ticker.load(Ordering::SeqCst) {
            return Err(GatewayError::Parse("ticker unavailable".to_string()));
        }
        Ok(*self.price.lock().unwrap())
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: u32,
    ) -> std::result::Result<Vec<Kline>, GatewayError> {
        Ok(vec![])
    }

    async fn get_balances(&self) -> std::result::Result<HashMap<String, f64>, GatewayError> {
        Ok(HashMap::new())
    }

    async fn place_order(
        &self,
        order: &OrderRequest,
    ) -> std::result::Result<OrderFill, GatewayError> {
        self.orders.lock().unwrap().push(order.clone());
        let price = order.price.unwrap_or(*self.price.lock().unwrap());
        Ok(OrderFill {
            order_id: format!("fake-{}", self.order_count()),
            executed_qty: order.quantity,
            cumulative_quote: price * order.quantity,
            status: "FILLED".to_string(),
        })
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        _order_id: &str,
    ) -> std::result::Result<(), GatewayError> {
        Ok(())
    }
}

/// Backend fake that replays canned responses in order
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicU32,
    delay_ms: u64,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: AtomicU32::new(0),
            delay_ms: 0,
        }
    }

    /// Simulate a slow reasoning call (for single-flight tests)
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn complete(&self, _system: &str, _context: &str, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| "backend script exhausted".into())
    }
}

/// Router wired for paper trading over the fake gateway
pub struct PaperRig {
    pub store: Arc<MemStore>,
    pub gateway: Arc<FakeGateway>,
    pub router: Arc<ExecutionRouter>,
}

pub fn paper_router(
    price: f64,
    initial_cash: f64,
    seeded_positions: Vec<Position>,
    fee_rate: f64,
) -> PaperRig {
    let store = Arc::new(MemStore::new());
    let gateway = Arc::new(FakeGateway::new(price));
    let paper = Arc::new(tradewake::api::PaperGateway::new(
        gateway.clone() as Arc<dyn MarketGateway>
    ));

    let router = Arc::new(ExecutionRouter::new(
        paper,
        store.clone() as Arc<dyn Store>,
        SafetyGuard::new(SafetyLimits::default(), initial_cash),
        AccountLedger::new(initial_cash, TradingMode::Paper),
        PositionBook::from_positions(seeded_positions),
        fee_rate,
        "USDT".to_string(),
    ));

    PaperRig {
        store,
        gateway,
        router,
    }
}

pub fn seeded_position(symbol: &str, amount: f64, avg: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        amount,
        avg_entry_price: avg,
        last_mark_price: avg,
        unrealized_pnl: 0.0,
    }
}
