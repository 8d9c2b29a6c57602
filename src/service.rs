use crate::api::{create_tick_channel, run_trade_stream, MarketGateway, PaperGateway, Tick};
use crate::brain::DecisionCoordinator;
use crate::config::{Settings, TradingMode};
use crate::db::Store;
use crate::events::{CycleEvent, EventBus};
use crate::execution::{
    AccountLedger, AccountSummary, ExecutionRouter, PositionBook, SafetyGuard, SafetyLimits,
    CASH_BALANCE_KEY,
};
use crate::indicators::summarize_klines;
use crate::llm::ReasoningBackend;
use crate::models::{
    DecisionRecord, MarketSummary, NewTrigger, Position, TradeRecord, Trigger, TriggerKind,
    TriggerOp, TriggerStatus, WakeEvent,
};
use crate::triggers::{TriggerEngine, Wake, MANUAL_POLL_INTERVAL};
use crate::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const SYSTEM_STATUS_KEY: &str = "system_status";
const HEARTBEAT_KEY: &str = "system_heartbeat";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SUMMARY_KLINE_INTERVAL: &str = "1h";
const SUMMARY_KLINE_LIMIT: u32 = 50;

/// Composition root. Owns every component explicitly, no globals, and
/// exposes the surface the presentation layer calls.
pub struct TradingService {
    settings: Settings,
    store: Arc<dyn Store>,
    gateway: Arc<dyn MarketGateway>,
    engine: Arc<TriggerEngine>,
    router: Arc<ExecutionRouter>,
    coordinator: Arc<DecisionCoordinator>,
    bus: EventBus,
    last_heartbeat: Mutex<Instant>,
}

impl TradingService {
    /// Wire up the whole system. `live_gateway` is the real exchange client;
    /// in paper mode it is wrapped so market data stays real while orders
    /// are simulated.
    pub async fn build(
        settings: Settings,
        store: Arc<dyn Store>,
        live_gateway: Arc<dyn MarketGateway>,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Result<Arc<Self>> {
        let mode = settings.trading.mode;
        let gateway: Arc<dyn MarketGateway> = match mode {
            TradingMode::Paper => Arc::new(PaperGateway::new(live_gateway)),
            TradingMode::Live => {
                tracing::warn!("LIVE TRADING mode enabled");
                live_gateway
            }
        };

        // Restore durable state
        let positions = match store.load_positions().await {
            Ok(rows) => PositionBook::from_positions(rows),
            Err(e) => {
                tracing::warn!("Could not load positions ({}), starting flat", e);
                PositionBook::new()
            }
        };

        let initial_balance = settings.trading.initial_balance;
        let cash = match store.get_config(CASH_BALANCE_KEY).await {
            Ok(Some(value)) => value.parse::<f64>().unwrap_or(initial_balance),
            Ok(None) => initial_balance,
            Err(e) => {
                tracing::warn!("Could not load cash balance ({}), using initial", e);
                initial_balance
            }
        };
        let ledger = AccountLedger::new(cash, mode);

        let limits = SafetyLimits {
            max_daily_loss: settings.risk.max_daily_loss,
            max_order_fraction: settings.risk.max_order_fraction,
            min_notional: settings.risk.min_notional,
            daily_trade_limit: settings.risk.daily_trade_limit,
        };
        let guard = SafetyGuard::new(limits, initial_balance);

        let router = Arc::new(ExecutionRouter::new(
            gateway.clone(),
            store.clone(),
            guard,
            ledger,
            positions,
            settings.trading.paper_fee_rate,
            settings.trading.quote_asset.clone(),
        ));

        let engine = Arc::new(TriggerEngine::with_cooldown(
            store.clone(),
            Duration::from_secs(settings.risk.wake_cooldown_secs),
        ));
        engine.reload().await;

        // Resume the previous enabled state
        let running = match store.get_config(SYSTEM_STATUS_KEY).await {
            Ok(Some(status)) => status == "RUNNING",
            _ => false,
        };
        engine.set_enabled(running);

        let bus = EventBus::new();
        let coordinator = Arc::new(DecisionCoordinator::new(
            backend,
            gateway.clone(),
            store.clone(),
            router.clone(),
            engine.clone(),
            bus.clone(),
            settings.llm.temperature,
        ));

        tracing::info!(
            "TradingService ready: mode={}, symbols={:?}, cooldown={}s",
            mode.as_str(),
            settings.trading.symbols,
            settings.risk.wake_cooldown_secs
        );

        Ok(Arc::new(Self {
            settings,
            store,
            gateway,
            engine,
            router,
            coordinator,
            bus,
            last_heartbeat: Mutex::new(Instant::now() - HEARTBEAT_INTERVAL),
        }))
    }

    // ------------------------------------------------------------------
    // Caller surface (presentation layer)
    // ------------------------------------------------------------------

    /// Enable price-driven wakes
    pub async fn start(&self) -> Result<()> {
        self.store.set_config(SYSTEM_STATUS_KEY, "RUNNING").await?;
        self.engine.set_enabled(true);
        Ok(())
    }

    /// Disable price-driven wakes; manual triggers keep working
    pub async fn stop(&self) -> Result<()> {
        self.store.set_config(SYSTEM_STATUS_KEY, "STOPPED").await?;
        self.engine.set_enabled(false);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_enabled()
    }

    /// Queue a user-initiated decision cycle; the manual poll loop services
    /// it within one poll interval.
    pub async fn trigger_manual_cycle(&self, description: &str, symbol: Option<&str>) -> Result<i64> {
        let symbol = symbol
            .map(|s| s.to_string())
            .or_else(|| self.settings.trading.symbols.first().cloned())
            .unwrap_or_else(|| "BTCUSDT".to_string());

        self.store
            .add_trigger(&NewTrigger {
                description: description.to_string(),
                symbol,
                operator: TriggerOp::IMMEDIATE,
                target_value: 0.0,
                kind: TriggerKind::Manual,
            })
            .await
    }

    pub fn get_active_triggers(&self) -> Vec<Trigger> {
        self.engine.active_triggers()
    }

    pub async fn cancel_trigger(&self, id: i64) -> Result<()> {
        self.store
            .set_trigger_status(id, TriggerStatus::Cancelled)
            .await?;
        self.engine.reload().await;
        Ok(())
    }

    pub async fn get_recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        self.store.recent_decisions(limit).await
    }

    pub async fn get_trade_history(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        self.store.recent_trades(limit).await
    }

    pub fn get_positions(&self) -> Vec<Position> {
        self.router.positions()
    }

    pub fn get_account_summary(&self) -> AccountSummary {
        self.router.account_summary()
    }

    /// Observer registration; each subscriber gets its own lossy buffer
    pub fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent> {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Control loops
    // ------------------------------------------------------------------

    /// Spawn the streaming, tick-evaluation and manual-poll tasks
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let (tick_tx, tick_rx) = create_tick_channel();
        let symbols = self.settings.trading.symbols.clone();

        let stream_task = tokio::spawn(run_trade_stream(symbols, tick_tx));
        let tick_task = tokio::spawn(self.clone().tick_loop(tick_rx));
        let poll_task = tokio::spawn(self.clone().manual_poll_loop());

        vec![stream_task, tick_task, poll_task]
    }

    /// Inline trigger evaluation over the tick stream. Never blocks on a
    /// decision cycle: wakes are handed off to a spawned task and further
    /// ticks keep flowing.
    pub async fn tick_loop(self: Arc<Self>, mut ticks: mpsc::Receiver<Tick>) {
        tracing::info!("Tick loop started");
        while let Some(tick) = ticks.recv().await {
            self.on_tick(&tick).await;
        }
        tracing::info!("Tick loop ended (stream closed)");
    }

    async fn on_tick(&self, tick: &Tick) {
        if !self.engine.is_enabled() {
            return;
        }

        self.touch_heartbeat().await;

        let Some(wake) = self.engine.evaluate(&tick.symbol, tick.price) else {
            return;
        };

        tracing::info!("Waking decision loop for {}: {}", tick.symbol, wake.reason);
        self.consume_trigger(&wake).await;

        let event = WakeEvent {
            kind: wake.kind,
            symbol: tick.symbol.clone(),
            current_price: tick.price,
            reason: wake.reason,
            technical_summary: self.market_summary(&tick.symbol).await,
            timestamp: Utc::now(),
        };

        // Hand off; single-flight inside the coordinator drops overlaps
        let coordinator = self.coordinator.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            coordinator.run_cycle(event).await;
            engine.reload().await;
        });
    }

    /// Independent loop servicing MANUAL/IMMEDIATE triggers, bypassing
    /// cool-down and the enabled gate.
    pub async fn manual_poll_loop(self: Arc<Self>) {
        tracing::info!("Manual trigger poll loop started");
        let mut ticker = tokio::time::interval(MANUAL_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.engine.reload().await;

            let Some(wake) = self.engine.next_manual() else {
                continue;
            };

            tracing::info!("Manual trigger detected: {}", wake.trigger.description);
            self.consume_trigger(&wake).await;

            let symbol = wake.trigger.symbol.clone();
            let current_price = match self.gateway.get_ticker(&symbol).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("No price for manual cycle ({}), continuing without", e);
                    0.0
                }
            };

            let event = WakeEvent {
                kind: wake.kind,
                symbol: symbol.clone(),
                current_price,
                reason: wake.reason.clone(),
                technical_summary: self.market_summary(&symbol).await,
                timestamp: Utc::now(),
            };

            self.coordinator.run_cycle(event).await;
            self.engine.reload().await;
        }
    }

    async fn consume_trigger(&self, wake: &Wake) {
        if let Err(e) = self
            .store
            .set_trigger_status(wake.trigger.id, TriggerStatus::Triggered)
            .await
        {
            // The local consumed-set still prevents a refire this snapshot
            tracing::error!("Failed to mark trigger {} consumed: {}", wake.trigger.id, e);
        }
    }

    async fn market_summary(&self, symbol: &str) -> MarketSummary {
        match self
            .gateway
            .get_klines(symbol, SUMMARY_KLINE_INTERVAL, SUMMARY_KLINE_LIMIT)
            .await
        {
            Ok(klines) => summarize_klines(&klines),
            Err(e) => {
                tracing::warn!("Kline fetch failed for {}: {}", symbol, e);
                MarketSummary::default()
            }
        }
    }

    async fn touch_heartbeat(&self) {
        let due = {
            let mut last = self.last_heartbeat.lock().unwrap();
            if last.elapsed() >= HEARTBEAT_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            if let Err(e) = self
                .store
                .set_config(HEARTBEAT_KEY, &Utc::now().format("%H:%M:%S").to_string())
                .await
            {
                tracing::debug!("Heartbeat write failed: {}", e);
            }
        }
    }
}
