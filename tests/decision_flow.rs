mod common;

use common::*;
use std::sync::Arc;
use tradewake::brain::{CycleOutcome, DecisionCoordinator};
use tradewake::config::Settings;
use tradewake::db::{MemStore, Store};
use tradewake::events::EventBus;
use tradewake::models::{
    MarketSummary, NewTrigger, TradeParams, TriggerKind, TriggerOp, WakeEvent, WakeKind,
};
use tradewake::execution::ExecutionStatus;
use tradewake::service::TradingService;
use tradewake::triggers::TriggerEngine;
use tradewake::api::MarketGateway;
use chrono::Utc;

fn buy(symbol: &str, qty: f64) -> TradeParams {
    TradeParams {
        symbol: Some(symbol.to_string()),
        side: Some("BUY".to_string()),
        quantity: Some(qty),
        ..TradeParams::default()
    }
}

fn sell(symbol: &str, qty: f64) -> TradeParams {
    TradeParams {
        side: Some("SELL".to_string()),
        ..buy(symbol, qty)
    }
}

fn wake(symbol: &str, price: f64) -> WakeEvent {
    WakeEvent {
        kind: WakeKind::TriggerHit,
        symbol: symbol.to_string(),
        current_price: price,
        reason: "test wake".to_string(),
        technical_summary: MarketSummary::default(),
        timestamp: Utc::now(),
    }
}

fn coordinator_for(rig: &PaperRig, backend: Arc<ScriptedBackend>) -> Arc<DecisionCoordinator> {
    let engine = Arc::new(TriggerEngine::new(rig.store.clone() as Arc<dyn Store>));
    Arc::new(DecisionCoordinator::new(
        backend,
        rig.gateway.clone() as Arc<dyn MarketGateway>,
        rig.store.clone() as Arc<dyn Store>,
        rig.router.clone(),
        engine,
        EventBus::new(),
        0.1,
    ))
}

// --- Execution scenarios -------------------------------------------------

#[tokio::test]
async fn fat_finger_order_is_rejected() {
    // equity 10000, BUY 0.1 BTC @ 50000 = 5000 notional > 20% cap
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);

    let result = rig.router.execute(&buy("BTCUSDT", 0.1)).await;

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.message.contains("SafetyGuard"));
    // Nothing reached the gateway, nothing was recorded
    assert_eq!(rig.gateway.order_count(), 0);
    assert_eq!(rig.store.trade_count(), 0);
}

#[tokio::test]
async fn small_buy_fills_and_updates_cash_and_position() {
    // equity 10000, BUY 0.01 BTC @ 50000 = 500 notional, under the cap
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);

    let result = rig.router.execute(&buy("BTCUSDT", 0.01)).await;

    assert_eq!(result.status, ExecutionStatus::Filled);
    assert_eq!(result.filled_price, 50_000.0);
    assert_eq!(result.filled_qty, 0.01);
    assert!(result.order_id.unwrap().starts_with("paper-"));

    let summary = rig.router.account_summary();
    assert!((summary.cash_balance - 9_500.0).abs() < 1e-9);

    let positions = rig.router.positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].amount, 0.01);
    assert_eq!(positions[0].avg_entry_price, 50_000.0);

    // Trade log got the simulated fee
    let trade = rig.store.last_trade().unwrap();
    assert!((trade.fee - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn full_sell_resets_position_and_credits_cash() {
    // Position 0.1 @ 50000; SELL 0.1 @ 60000 with no fee. Cash is sized so
    // the 6000 notional stays under the 20% fat-finger cap.
    let rig = paper_router(
        60_000.0,
        30_000.0,
        vec![seeded_position("BTCUSDT", 0.1, 50_000.0)],
        0.0,
    );

    let result = rig.router.execute(&sell("BTCUSDT", 0.1)).await;

    assert_eq!(result.status, ExecutionStatus::Filled);

    let positions = rig.router.positions();
    assert!(positions.is_empty(), "closed position should drop out");

    // Credited exactly the filled notional
    let summary = rig.router.account_summary();
    assert!((summary.cash_balance - 36_000.0).abs() < 1e-9);
}

#[tokio::test]
async fn insufficient_funds_is_a_distinct_rejection() {
    let rig = paper_router(50_000.0, 100.0, vec![], 0.001);

    // 500 notional with 100 cash: affordable check fires before the guard
    let result = rig.router.execute(&buy("BTCUSDT", 0.01)).await;

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.message.contains("insufficient funds"));
}

#[tokio::test]
async fn sell_without_holdings_is_rejected() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);

    let result = rig.router.execute(&sell("BTCUSDT", 0.01)).await;

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.message.contains("insufficient holdings"));
}

#[tokio::test]
async fn hold_action_short_circuits() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);

    let params = TradeParams {
        side: Some("HOLD".to_string()),
        ..buy("BTCUSDT", 0.01)
    };
    let result = rig.router.execute(&params).await;

    assert_eq!(result.status, ExecutionStatus::Skipped);
    assert_eq!(rig.gateway.order_count(), 0);
}

#[tokio::test]
async fn market_order_without_reference_price_fails_closed() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    rig.gateway.set_fail_ticker(true);

    let result = rig.router.execute(&buy("BTCUSDT", 0.01)).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(rig.store.trade_count(), 0);
}

#[tokio::test]
async fn limit_order_falls_back_to_its_own_price() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    rig.gateway.set_fail_ticker(true);

    let params = TradeParams {
        order_type: Some("LIMIT".to_string()),
        price: Some(49_000.0),
        ..buy("BTCUSDT", 0.01)
    };
    let result = rig.router.execute(&params).await;

    assert_eq!(result.status, ExecutionStatus::Filled);
    assert_eq!(result.filled_price, 49_000.0);
}

#[tokio::test]
async fn persistence_failure_applies_nothing() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    rig.store.set_fail_writes(true);

    let result = rig.router.execute(&buy("BTCUSDT", 0.01)).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    // In-memory state untouched: no position, cash intact
    assert!(rig.router.positions().is_empty());
    assert_eq!(rig.router.account_summary().cash_balance, 10_000.0);
}

// --- Coordinator scenarios -----------------------------------------------

#[tokio::test]
async fn unparseable_output_persists_error_and_skips_execution() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    let backend = Arc::new(ScriptedBackend::new(vec![
        "The market looks fine, nothing to do today.",
    ]));
    let coordinator = coordinator_for(&rig, backend);

    let outcome = coordinator.run_cycle(wake("BTCUSDT", 50_000.0)).await;

    assert_eq!(outcome, CycleOutcome::ParseError);
    // Decision persisted with the error and raw text for audit
    assert_eq!(rig.store.decision_count(), 1);
    let decisions = rig.store.recent_decisions(1).await.unwrap();
    assert!(decisions[0].error.is_some());
    assert!(decisions[0].output["raw_response"]
        .as_str()
        .unwrap()
        .contains("market looks fine"));
    // The router was never invoked
    assert_eq!(rig.gateway.order_count(), 0);
    assert_eq!(rig.store.trade_count(), 0);
}

#[tokio::test]
async fn backend_failure_still_leaves_an_audit_record() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    let backend = Arc::new(ScriptedBackend::new(vec![])); // exhausted -> error
    let coordinator = coordinator_for(&rig, backend);

    let outcome = coordinator.run_cycle(wake("BTCUSDT", 50_000.0)).await;

    assert_eq!(outcome, CycleOutcome::BackendError);
    assert_eq!(rig.store.decision_count(), 1);
    assert!(rig.store.recent_decisions(1).await.unwrap()[0].error.is_some());
}

#[tokio::test]
async fn trade_action_executes_and_arms_next_triggers() {
    let rig = paper_router(65_000.0, 10_000.0, vec![], 0.001);
    let backend = Arc::new(ScriptedBackend::new(vec![
        r#"```json
{
  "thought_process": "Momentum is intact, buying a small clip.",
  "action": {"type": "TRADE", "params": {"symbol": "BTCUSDT", "side": "BUY", "quantity": 0.01}},
  "next_triggers": [
    {"type": "PRICE_LEVEL", "condition": {"symbol": "BTCUSDT", "operator": "LTE", "value": 64000}, "description": "stop loss alert"}
  ]
}
```"#,
    ]));
    let coordinator = coordinator_for(&rig, backend);

    let outcome = coordinator.run_cycle(wake("BTCUSDT", 65_000.0)).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            action: "TRADE".to_string()
        }
    );
    assert_eq!(rig.store.trade_count(), 1);
    assert_eq!(rig.router.positions().len(), 1);

    let history = rig.store.recent_trades(5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].symbol, "BTCUSDT");

    // Follow-up trigger landed in the store
    let armed = rig.store.list_active_triggers().await.unwrap();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].description, "stop loss alert");
    assert_eq!(armed[0].operator, TriggerOp::LTE);

    // And the decision record reflects the dispatched action
    let decisions = rig.store.recent_decisions(1).await.unwrap();
    assert_eq!(decisions[0].decision_type, "TRADE");
    assert!(decisions[0].error.is_none());
}

#[tokio::test]
async fn wait_action_mutates_nothing() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    let backend = Arc::new(ScriptedBackend::new(vec![
        r#"{"thought_process": "No edge here.", "action": {"type": "WAIT", "params": {}}}"#,
    ]));
    let coordinator = coordinator_for(&rig, backend);

    let outcome = coordinator.run_cycle(wake("BTCUSDT", 50_000.0)).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            action: "WAIT".to_string()
        }
    );
    assert_eq!(rig.store.trade_count(), 0);
    assert_eq!(rig.store.decision_count(), 1);
    assert!(rig.router.positions().is_empty());
}

#[tokio::test]
async fn concurrent_wakes_are_dropped_not_queued() {
    let rig = paper_router(50_000.0, 10_000.0, vec![], 0.001);
    let backend = Arc::new(
        ScriptedBackend::new(vec![
            r#"{"thought": "slow", "action": {"type": "WAIT"}}"#,
            r#"{"thought": "should never be needed", "action": {"type": "WAIT"}}"#,
        ])
        .with_delay_ms(200),
    );
    let coordinator = coordinator_for(&rig, backend.clone());

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_cycle(wake("BTCUSDT", 50_000.0)).await })
    };
    // Give the first cycle time to take the single-flight slot
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    let second = coordinator.run_cycle(wake("ETHUSDT", 3_000.0)).await;

    assert_eq!(second, CycleOutcome::Dropped);
    assert_eq!(
        first.await.unwrap(),
        CycleOutcome::Completed {
            action: "WAIT".to_string()
        }
    );
    // Exactly one reasoning call was spent
    assert_eq!(backend.call_count(), 1);
    assert_eq!(rig.store.decision_count(), 1);
}

// --- Trigger engine scenario ---------------------------------------------

#[tokio::test]
async fn only_the_matching_trigger_fires_on_a_tick() {
    let store = Arc::new(MemStore::new());
    for (op, value) in [(TriggerOp::GTE, 60_000.0), (TriggerOp::LTE, 40_000.0)] {
        store
            .add_trigger(&NewTrigger {
                description: format!("{:?} {}", op, value),
                symbol: "BTCUSDT".to_string(),
                operator: op,
                target_value: value,
                kind: TriggerKind::PriceLevel,
            })
            .await
            .unwrap();
    }

    let engine = TriggerEngine::new(store as Arc<dyn Store>);
    engine.set_enabled(true);
    engine.reload().await;

    let fired = engine.evaluate("BTCUSDT", 60_000.0).unwrap();
    assert_eq!(fired.trigger.operator, TriggerOp::GTE);
    assert_eq!(fired.trigger.target_value, 60_000.0);
}

// --- Service-level manual flow -------------------------------------------

#[tokio::test(start_paused = true)]
async fn manual_trigger_is_serviced_within_one_poll_interval() {
    let store = Arc::new(MemStore::new());
    let gateway = Arc::new(FakeGateway::new(50_000.0));
    let backend = Arc::new(ScriptedBackend::new(vec![
        r#"{"thought": "manual check done", "action": {"type": "WAIT"}}"#,
    ]));

    let service = TradingService::build(
        Settings::default(),
        store.clone() as Arc<dyn Store>,
        gateway as Arc<dyn MarketGateway>,
        backend,
    )
    .await
    .unwrap();

    // Price-driven wakes are disabled; the manual path must still work
    assert!(!service.is_running());

    service
        .trigger_manual_cycle("user asked for analysis", Some("BTCUSDT"))
        .await
        .unwrap();

    let poll = tokio::spawn(service.clone().manual_poll_loop());

    // One poll interval (2s) plus slack, under the paused clock
    tokio::time::sleep(tokio::time::Duration::from_millis(2_500)).await;

    assert_eq!(store.decision_count(), 1);
    // Consumed: no longer listed as active
    assert!(store.list_active_triggers().await.unwrap().is_empty());

    poll.abort();
}
