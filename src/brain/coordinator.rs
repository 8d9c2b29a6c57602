use super::parser::{extract_json, ActionType, LlmDecision};
use crate::api::MarketGateway;
use crate::db::Store;
use crate::events::{CycleEvent, EventBus};
use crate::execution::ExecutionRouter;
use crate::llm::ReasoningBackend;
use crate::models::{DecisionRecord, WakeEvent};
use crate::triggers::TriggerEngine;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fixed instruction set sent with every cycle. The context goes in the
/// user message; this never changes at runtime.
pub const SYSTEM_INSTRUCTIONS: &str = r#"You are the coordinator of an automated crypto trading system.

Your goals, in order:
1. Capital preservation comes first. Never risk the principal.
2. Capture market opportunities within the configured risk limits.

Your capabilities:
1. Perceive: the context you receive contains market prices, open positions, technical indicators and recent notes.
2. Decide: you are the only decision maker. Execute at most one action per wake-up.
3. Plan: you can set triggers so the system wakes you again at a specific price.

Workflow: you are woken by a trigger event -> analyze the context -> decide one action -> optionally arm new triggers for the next wake-up.

Output format: respond with a single JSON object and nothing else.
{
  "thought_process": "Price alert for BTC. Currently 65000. Uptrend intact, risk budget allows an entry. Buying a small position.",
  "consultations": [
    {"consultant": "technical", "query": "Where is the next support for BTCUSDT on the 1h chart?"}
  ],
  "action": {
    "type": "TRADE",
    "params": {"symbol": "BTCUSDT", "side": "BUY", "quantity": 0.01}
  },
  "next_triggers": [
    {"type": "PRICE_LEVEL", "condition": {"symbol": "BTCUSDT", "operator": "LTE", "value": 64000}, "description": "stop loss alert"}
  ]
}

Action types: "TRADE", "SET_TRIGGER", "WAIT", "NOTIFY".
Use "WAIT" when no action is warranted. Keep quantities small and within limits."#;

/// Outcome of one coordinator cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Full round trip, action dispatched
    Completed { action: String },
    /// Reasoning output had no parseable JSON object
    ParseError,
    /// Reasoning backend call failed; no retry, next wake tries again
    BackendError,
    /// Another cycle was in flight; this wake was dropped, not queued
    Dropped,
}

/// Runs exactly one request/response cycle with the reasoning backend per
/// wake and translates its output into side effects.
///
/// Single-flight: concurrent wakes (other symbols, or the manual poll) all
/// funnel through `run_cycle` and are dropped while a cycle is in flight,
/// bounding reasoning-backend call volume.
pub struct DecisionCoordinator {
    backend: Arc<dyn ReasoningBackend>,
    gateway: Arc<dyn MarketGateway>,
    store: Arc<dyn Store>,
    router: Arc<ExecutionRouter>,
    engine: Arc<TriggerEngine>,
    bus: EventBus,
    temperature: f32,
    busy: Mutex<()>,
}

impl DecisionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        gateway: Arc<dyn MarketGateway>,
        store: Arc<dyn Store>,
        router: Arc<ExecutionRouter>,
        engine: Arc<TriggerEngine>,
        bus: EventBus,
        temperature: f32,
    ) -> Self {
        Self {
            backend,
            gateway,
            store,
            router,
            engine,
            bus,
            temperature,
            busy: Mutex::new(()),
        }
    }

    pub async fn run_cycle(&self, event: WakeEvent) -> CycleOutcome {
        // Single-flight: drop, don't queue. The next tick or poll re-detects
        // the condition if it still holds.
        let _guard = match self.busy.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(
                    "Cycle already in flight, dropping wake for {} ({})",
                    event.symbol,
                    event.reason
                );
                return CycleOutcome::Dropped;
            }
        };

        tracing::info!("Decision cycle for {}: {}", event.symbol, event.reason);
        self.bus.publish(CycleEvent::ThinkingStarted {
            symbol: event.symbol.clone(),
            trigger: event.kind.as_str().to_string(),
            reason: event.reason.clone(),
        });

        // 1. Immutable context snapshot
        let context = self.build_context(&event).await;
        let context_text = serde_json::to_string_pretty(&context)
            .unwrap_or_else(|_| context.to_string());

        self.bus.publish(CycleEvent::ContextLoaded {
            symbol: event.symbol.clone(),
            price: event.current_price,
        });

        // 2. One reasoning round trip, no retry
        let raw = match self
            .backend
            .complete(SYSTEM_INSTRUCTIONS, &context_text, self.temperature)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Reasoning backend call failed: {}", e);
                self.bus.publish(CycleEvent::CycleError {
                    message: e.to_string(),
                });
                self.persist_decision(
                    "ERROR",
                    context,
                    json!({"error": e.to_string()}),
                    Some(e.to_string()),
                )
                .await;
                return CycleOutcome::BackendError;
            }
        };

        // 3. Best-effort extraction; raw text is preserved for audit
        let decision = match extract_json(&raw) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Unparseable reasoning output: {}", e);
                tracing::error!("Raw response: {}", raw);
                self.bus.publish(CycleEvent::CycleError {
                    message: format!("parse error: {}", e),
                });
                self.persist_decision(
                    "PARSE_ERROR",
                    context,
                    json!({"error": e.clone(), "raw_response": raw}),
                    Some(e),
                )
                .await;
                return CycleOutcome::ParseError;
            }
        };

        self.bus.publish(CycleEvent::ThoughtProduced {
            thought: decision.thought.clone(),
        });
        for consultation in &decision.consultations {
            self.bus.publish(CycleEvent::Consultation {
                consultant: consultation.consultant.clone(),
                query: consultation.query.clone(),
            });
        }

        // 4. Dispatch exactly one action
        let (action_name, outcome_msg) = self.dispatch_action(&decision).await;
        self.bus.publish(CycleEvent::ActionDispatched {
            action: action_name.clone(),
            outcome: outcome_msg,
        });

        // Arm follow-up triggers regardless of the action type
        self.install_next_triggers(&decision).await;

        // 5. Unconditional audit record
        let output = serde_json::to_value(&decision).unwrap_or(serde_json::Value::Null);
        self.persist_decision(&action_name, context, output, None)
            .await;

        CycleOutcome::Completed {
            action: action_name,
        }
    }

    async fn build_context(&self, event: &WakeEvent) -> serde_json::Value {
        // Prefer a fresh price; fall back to the tick that woke us
        let market_price = match self.gateway.get_ticker(&event.symbol).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Price fetch failed during context build: {}", e);
                event.current_price
            }
        };

        let positions = self.router.positions();
        let account = self.router.account_summary();

        let active_triggers: Vec<String> = self
            .engine
            .active_triggers()
            .iter()
            .map(|t| {
                format!(
                    "{} ({} {} {})",
                    t.description,
                    t.symbol,
                    t.operator.as_str(),
                    t.target_value
                )
            })
            .collect();

        let recent_notes = match self.store.recent_notes(5).await {
            Ok(notes) => notes,
            Err(e) => {
                tracing::warn!("Note fetch failed during context build: {}", e);
                Vec::new()
            }
        };

        let mut market_snapshot = serde_json::Map::new();
        market_snapshot.insert(event.symbol.clone(), json!(market_price));

        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "trigger_event": event,
            "market_snapshot": market_snapshot,
            "account": account,
            "positions": positions,
            "active_triggers": active_triggers,
            "recent_notes": recent_notes,
        })
    }

    async fn dispatch_action(&self, decision: &LlmDecision) -> (String, String) {
        let action = match &decision.action {
            Some(a) => a,
            None => return ("WAIT".to_string(), "no action returned".to_string()),
        };

        match action.action_type() {
            Some(ActionType::Trade) => {
                let params = action.trade_params();
                let result = self.router.execute(&params).await;
                if result.is_filled() {
                    tracing::info!("Trade executed: {}", result.message);
                } else {
                    tracing::warn!("Trade not executed ({:?}): {}", result.status, result.message);
                }
                ("TRADE".to_string(), result.message)
            }
            Some(ActionType::SetTrigger) => (
                "SET_TRIGGER".to_string(),
                format!("{} trigger(s) requested", decision.next_triggers.len()),
            ),
            Some(ActionType::Notify) => {
                // Notifications become durable notes the next context can see
                if let Err(e) = self.store.add_note(&decision.thought).await {
                    tracing::warn!("Failed to save notification note: {}", e);
                }
                ("NOTIFY".to_string(), "noted".to_string())
            }
            Some(ActionType::Wait) => ("WAIT".to_string(), "holding".to_string()),
            None => {
                let kind = action.kind.clone().unwrap_or_default();
                tracing::warn!("Unknown action type {:?}, treating as WAIT", kind);
                (format!("UNKNOWN:{}", kind), "ignored".to_string())
            }
        }
    }

    async fn install_next_triggers(&self, decision: &LlmDecision) {
        if decision.next_triggers.is_empty() {
            return;
        }

        let mut inserted = 0usize;
        for spec in &decision.next_triggers {
            let trigger = spec.to_new_trigger();
            match self.store.add_trigger(&trigger).await {
                Ok(id) => {
                    tracing::info!("Armed trigger {}: {}", id, trigger.description);
                    inserted += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to arm trigger {:?}: {}", trigger.description, e);
                }
            }
        }

        if inserted > 0 {
            self.engine.reload().await;
        }
    }

    async fn persist_decision(
        &self,
        decision_type: &str,
        input_data: serde_json::Value,
        output: serde_json::Value,
        error: Option<String>,
    ) {
        let record = DecisionRecord {
            decision_type: decision_type.to_string(),
            input_data,
            output,
            error,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_decision(&record).await {
            tracing::error!("Failed to persist decision record: {}", e);
        }
    }
}
