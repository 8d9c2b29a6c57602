use crate::db::Store;
use crate::models::{Trigger, WakeKind};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Early-warning band around a target: |price - target| / target
pub const PROXIMITY_THRESHOLD: f64 = 0.005;

/// Minimum seconds between price-driven wakes for one symbol
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Interval of the manual-trigger poll loop
pub const MANUAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A trigger condition that just fired
#[derive(Debug, Clone)]
pub struct Wake {
    pub trigger: Trigger,
    pub kind: WakeKind,
    pub reason: String,
}

/// Converts the tick stream and manual polls into discrete wake events.
///
/// Holds an immutable snapshot of ACTIVE triggers, replaced wholesale on
/// `reload`, so readers always see a whole old or whole new list. A fired
/// trigger id is remembered locally so re-evaluating the same snapshot
/// cannot double-fire before the store catches up.
pub struct TriggerEngine {
    store: Arc<dyn Store>,
    snapshot: RwLock<Arc<Vec<Trigger>>>,
    consumed: Mutex<HashSet<i64>>,
    last_wake: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
    enabled: AtomicBool,
}

impl TriggerEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_cooldown(store, Duration::from_secs(DEFAULT_COOLDOWN_SECS))
    }

    pub fn with_cooldown(store: Arc<dyn Store>, cooldown: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            consumed: Mutex::new(HashSet::new()),
            last_wake: Mutex::new(HashMap::new()),
            cooldown,
            enabled: AtomicBool::new(false),
        }
    }

    /// Gate for price-driven wakes. Manual triggers bypass this.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(
            "Trigger engine {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current snapshot (for context building and the caller surface)
    pub fn active_triggers(&self) -> Vec<Trigger> {
        self.snapshot.read().unwrap().as_ref().clone()
    }

    /// Replace the snapshot from the store. A read failure keeps the last
    /// good snapshot (stale-but-known beats no triggers at all). Returns
    /// the number of triggers now armed.
    pub async fn reload(&self) -> usize {
        match self.store.list_active_triggers().await {
            Ok(triggers) => {
                let count = triggers.len();
                *self.snapshot.write().unwrap() = Arc::new(triggers);
                self.consumed.lock().unwrap().clear();
                tracing::debug!("Trigger snapshot reloaded: {} active", count);
                count
            }
            Err(e) => {
                tracing::error!("Trigger reload failed, keeping last snapshot: {}", e);
                self.snapshot.read().unwrap().len()
            }
        }
    }

    /// Evaluate one tick against the armed price triggers.
    ///
    /// First match in insertion order wins. Fires on a hard GTE/LTE hit or
    /// when the price drifts within the proximity band of a target (same
    /// dispatch). Disabled engine and per-symbol cool-down drop the tick
    /// with no state change.
    pub fn evaluate(&self, symbol: &str, price: f64) -> Option<Wake> {
        if !self.is_enabled() {
            return None;
        }

        {
            let last_wake = self.last_wake.lock().unwrap();
            if let Some(last) = last_wake.get(symbol) {
                if last.elapsed() < self.cooldown {
                    return None;
                }
            }
        }

        let snapshot = self.snapshot.read().unwrap().clone();
        let mut consumed = self.consumed.lock().unwrap();

        for trigger in snapshot.iter() {
            if trigger.is_manual() || trigger.symbol != symbol || consumed.contains(&trigger.id) {
                continue;
            }

            let target = trigger.target_value;
            let wake = if target > 0.0 && ((price - target).abs() / target) < PROXIMITY_THRESHOLD
            {
                Some((
                    WakeKind::ProximityAlert,
                    format!(
                        "Proximity alert: {} price {} is near target {}",
                        symbol, price, target
                    ),
                ))
            } else if trigger.operator == crate::models::TriggerOp::GTE && price >= target {
                Some((
                    WakeKind::TriggerHit,
                    format!("Trigger hit: {} price {} >= {}", symbol, price, target),
                ))
            } else if trigger.operator == crate::models::TriggerOp::LTE && price <= target {
                Some((
                    WakeKind::TriggerHit,
                    format!("Trigger hit: {} price {} <= {}", symbol, price, target),
                ))
            } else {
                None
            };

            if let Some((kind, reason)) = wake {
                consumed.insert(trigger.id);
                self.last_wake
                    .lock()
                    .unwrap()
                    .insert(symbol.to_string(), Instant::now());
                return Some(Wake {
                    trigger: trigger.clone(),
                    kind,
                    reason,
                });
            }
        }

        None
    }

    /// First armed MANUAL/IMMEDIATE trigger, locally consumed. Bypasses the
    /// enabled gate and all cool-downs so a user request is serviced on the
    /// next poll.
    pub fn next_manual(&self) -> Option<Wake> {
        let snapshot = self.snapshot.read().unwrap().clone();
        let mut consumed = self.consumed.lock().unwrap();

        let trigger = snapshot
            .iter()
            .find(|t| t.is_manual() && !consumed.contains(&t.id))?;
        consumed.insert(trigger.id);

        Some(Wake {
            trigger: trigger.clone(),
            kind: WakeKind::ManualIntervention,
            reason: format!("User trigger: {}", trigger.description),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use crate::models::{NewTrigger, TriggerKind, TriggerOp};

    async fn engine_with_triggers(triggers: Vec<NewTrigger>) -> (Arc<MemStore>, TriggerEngine) {
        let store = Arc::new(MemStore::new());
        for t in &triggers {
            store.add_trigger(t).await.unwrap();
        }
        let engine = TriggerEngine::new(store.clone() as Arc<dyn Store>);
        engine.set_enabled(true);
        engine.reload().await;
        (store, engine)
    }

    fn price_trigger(symbol: &str, op: TriggerOp, target: f64) -> NewTrigger {
        NewTrigger {
            description: format!("{} {:?} {}", symbol, op, target),
            symbol: symbol.to_string(),
            operator: op,
            target_value: target,
            kind: TriggerKind::PriceLevel,
        }
    }

    #[tokio::test]
    async fn test_gte_fires_and_lte_does_not() {
        let (_store, engine) = engine_with_triggers(vec![
            price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0),
            price_trigger("BTCUSDT", TriggerOp::LTE, 40000.0),
        ])
        .await;

        let wake = engine.evaluate("BTCUSDT", 60000.0).unwrap();
        assert_eq!(wake.kind, WakeKind::TriggerHit);
        assert!(wake.reason.contains(">= 60000"));
        assert_eq!(wake.trigger.operator, TriggerOp::GTE);
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent_without_reload() {
        let (_store, engine) =
            engine_with_triggers(vec![price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0)]).await;

        assert!(engine.evaluate("BTCUSDT", 61000.0).is_some());
        // Same price, same snapshot: the consumed set blocks a second fire
        // even though no cool-down separates the symbols
        assert!(engine.evaluate("BTCUSDT", 61000.0).is_none());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_other_triggers_on_symbol() {
        let (_store, engine) = engine_with_triggers(vec![
            price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0),
            price_trigger("BTCUSDT", TriggerOp::LTE, 58000.0),
        ])
        .await;

        assert!(engine.evaluate("BTCUSDT", 61000.0).is_some());
        // Different trigger would match, but the symbol is cooling down
        assert!(engine.evaluate("BTCUSDT", 50000.0).is_none());
    }

    #[tokio::test]
    async fn test_cooldown_is_per_symbol() {
        let (_store, engine) = engine_with_triggers(vec![
            price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0),
            price_trigger("ETHUSDT", TriggerOp::GTE, 3000.0),
        ])
        .await;

        assert!(engine.evaluate("BTCUSDT", 61000.0).is_some());
        assert!(engine.evaluate("ETHUSDT", 3100.0).is_some());
    }

    #[tokio::test]
    async fn test_disabled_engine_drops_ticks() {
        let (_store, engine) =
            engine_with_triggers(vec![price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0)]).await;
        engine.set_enabled(false);

        assert!(engine.evaluate("BTCUSDT", 61000.0).is_none());

        // Re-enabling lets the same condition fire: the drop left no state
        engine.set_enabled(true);
        assert!(engine.evaluate("BTCUSDT", 61000.0).is_some());
    }

    #[tokio::test]
    async fn test_proximity_fires_below_target() {
        let (_store, engine) =
            engine_with_triggers(vec![price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0)]).await;

        // 59,800 is 0.33% below the target: early warning, same dispatch
        let wake = engine.evaluate("BTCUSDT", 59800.0).unwrap();
        assert_eq!(wake.kind, WakeKind::ProximityAlert);
    }

    #[tokio::test]
    async fn test_first_match_wins_in_insertion_order() {
        let (_store, engine) = engine_with_triggers(vec![
            price_trigger("BTCUSDT", TriggerOp::GTE, 50000.0),
            price_trigger("BTCUSDT", TriggerOp::GTE, 49000.0),
        ])
        .await;

        let wake = engine.evaluate("BTCUSDT", 55000.0).unwrap();
        assert_eq!(wake.trigger.target_value, 50000.0);
    }

    #[tokio::test]
    async fn test_manual_bypasses_enabled_gate_and_cooldown() {
        let (store, engine) =
            engine_with_triggers(vec![price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0)]).await;
        engine.set_enabled(false);

        store
            .add_trigger(&NewTrigger {
                description: "analyze now".to_string(),
                symbol: "BTCUSDT".to_string(),
                operator: TriggerOp::IMMEDIATE,
                target_value: 0.0,
                kind: TriggerKind::Manual,
            })
            .await
            .unwrap();
        engine.reload().await;

        let wake = engine.next_manual().unwrap();
        assert_eq!(wake.kind, WakeKind::ManualIntervention);
        assert!(wake.reason.contains("analyze now"));

        // Consumed: not returned twice from the same snapshot
        assert!(engine.next_manual().is_none());
    }

    #[tokio::test]
    async fn test_manual_triggers_ignored_by_evaluate() {
        let (_store, engine) = engine_with_triggers(vec![NewTrigger {
            description: "manual only".to_string(),
            symbol: "BTCUSDT".to_string(),
            operator: TriggerOp::GTE,
            target_value: 1.0,
            kind: TriggerKind::Manual,
        }])
        .await;

        assert!(engine.evaluate("BTCUSDT", 100.0).is_none());
    }

    /// Store whose trigger reads can be switched to fail mid-test
    struct FlakyStore {
        inner: MemStore,
        fail_reads: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Store for FlakyStore {
        async fn get_config(&self, key: &str) -> crate::Result<Option<String>> {
            self.inner.get_config(key).await
        }
        async fn set_config(&self, key: &str, value: &str) -> crate::Result<()> {
            self.inner.set_config(key, value).await
        }
        async fn upsert_position(&self, p: &crate::models::Position) -> crate::Result<()> {
            self.inner.upsert_position(p).await
        }
        async fn load_positions(&self) -> crate::Result<Vec<crate::models::Position>> {
            self.inner.load_positions().await
        }
        async fn append_trade(&self, t: &crate::models::TradeRecord) -> crate::Result<()> {
            self.inner.append_trade(t).await
        }
        async fn recent_trades(
            &self,
            limit: i64,
        ) -> crate::Result<Vec<crate::models::TradeRecord>> {
            self.inner.recent_trades(limit).await
        }
        async fn count_trades_since(
            &self,
            since: chrono::DateTime<chrono::Utc>,
        ) -> crate::Result<u32> {
            self.inner.count_trades_since(since).await
        }
        async fn append_decision(&self, d: &crate::models::DecisionRecord) -> crate::Result<()> {
            self.inner.append_decision(d).await
        }
        async fn recent_decisions(
            &self,
            limit: i64,
        ) -> crate::Result<Vec<crate::models::DecisionRecord>> {
            self.inner.recent_decisions(limit).await
        }
        async fn add_trigger(&self, t: &NewTrigger) -> crate::Result<i64> {
            self.inner.add_trigger(t).await
        }
        async fn list_active_triggers(&self) -> crate::Result<Vec<Trigger>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err("store unavailable".into());
            }
            self.inner.list_active_triggers().await
        }
        async fn set_trigger_status(
            &self,
            id: i64,
            status: crate::models::TriggerStatus,
        ) -> crate::Result<()> {
            self.inner.set_trigger_status(id, status).await
        }
        async fn add_note(&self, content: &str) -> crate::Result<()> {
            self.inner.add_note(content).await
        }
        async fn recent_notes(&self, limit: i64) -> crate::Result<Vec<String>> {
            self.inner.recent_notes(limit).await
        }
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_last_snapshot() {
        let store = Arc::new(FlakyStore {
            inner: MemStore::new(),
            fail_reads: std::sync::atomic::AtomicBool::new(false),
        });
        store
            .add_trigger(&price_trigger("BTCUSDT", TriggerOp::GTE, 60000.0))
            .await
            .unwrap();

        let engine = TriggerEngine::new(store.clone() as Arc<dyn Store>);
        engine.set_enabled(true);
        assert_eq!(engine.reload().await, 1);

        // Store goes away: the reload logs and keeps the armed trigger
        store.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(engine.reload().await, 1);
        assert!(engine.evaluate("BTCUSDT", 61000.0).is_some());
    }
}
