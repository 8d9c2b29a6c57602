use super::Store;
use crate::models::{
    DecisionRecord, NewTrigger, Position, TradeRecord, Trigger, TriggerStatus,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory store. Used when no database is configured (state lost on
/// restart) and as the harness for offline tests.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    config: HashMap<String, String>,
    positions: HashMap<String, Position>,
    trades: Vec<TradeRecord>,
    decisions: Vec<DecisionRecord>,
    triggers: Vec<Trigger>,
    notes: Vec<String>,
    next_trigger_id: i64,
    /// When set, every mutating call fails; lets tests exercise the
    /// no-partial-apply rule
    fail_writes: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent writes fail (test hook)
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    pub fn trade_count(&self) -> usize {
        self.inner.lock().unwrap().trades.len()
    }

    pub fn decision_count(&self) -> usize {
        self.inner.lock().unwrap().decisions.len()
    }

    pub fn last_trade(&self) -> Option<TradeRecord> {
        self.inner.lock().unwrap().trades.last().cloned()
    }

    fn check_writable(inner: &Inner) -> Result<()> {
        if inner.fail_writes {
            return Err("store unavailable".into());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().config.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner
            .positions
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        let mut positions: Vec<Position> = inner.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner.trades.push(trade.clone());
        Ok(())
    }

    async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trades
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u32> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.trades.iter().filter(|t| t.timestamp >= since).count() as u32)
    }

    async fn append_decision(&self, decision: &DecisionRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner.decisions.push(decision.clone());
        Ok(())
    }

    async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .decisions
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn add_trigger(&self, trigger: &NewTrigger) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner.next_trigger_id += 1;
        let id = inner.next_trigger_id;
        inner.triggers.push(Trigger {
            id,
            description: trigger.description.clone(),
            symbol: trigger.symbol.clone(),
            operator: trigger.operator,
            target_value: trigger.target_value,
            kind: trigger.kind,
            status: TriggerStatus::Active,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_active_triggers(&self) -> Result<Vec<Trigger>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .triggers
            .iter()
            .filter(|t| t.status == TriggerStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_trigger_status(&self, id: i64, status: TriggerStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        if let Some(t) = inner.triggers.iter_mut().find(|t| t.id == id) {
            t.status = status;
        }
        Ok(())
    }

    async fn add_note(&self, content: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;
        inner.notes.push(content.to_string());
        Ok(())
    }

    async fn recent_notes(&self, limit: i64) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .notes
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TriggerKind, TriggerOp};

    #[tokio::test]
    async fn test_trigger_ids_are_sequential() {
        let store = MemStore::new();
        let t = NewTrigger {
            description: "t".to_string(),
            symbol: "BTCUSDT".to_string(),
            operator: TriggerOp::GTE,
            target_value: 1.0,
            kind: TriggerKind::PriceLevel,
        };
        let a = store.add_trigger(&t).await.unwrap();
        let b = store.add_trigger(&t).await.unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn test_fail_writes_blocks_mutation() {
        let store = MemStore::new();
        store.set_fail_writes(true);
        assert!(store.set_config("k", "v").await.is_err());
        // Reads still work
        assert!(store.get_config("k").await.unwrap().is_none());
    }
}
