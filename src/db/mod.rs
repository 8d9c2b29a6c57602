// Persistence store interface and its implementations
pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use crate::models::{DecisionRecord, NewTrigger, Position, TradeRecord, Trigger, TriggerStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable state the control loop depends on. All mutation of positions,
/// trades and decisions funnels through here via the ExecutionRouter and
/// DecisionCoordinator.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<String>>;
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    async fn upsert_position(&self, position: &Position) -> Result<()>;
    async fn load_positions(&self) -> Result<Vec<Position>>;

    async fn append_trade(&self, trade: &TradeRecord) -> Result<()>;
    async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>>;
    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u32>;

    async fn append_decision(&self, decision: &DecisionRecord) -> Result<()>;
    async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>>;

    /// Returns the new trigger's id
    async fn add_trigger(&self, trigger: &NewTrigger) -> Result<i64>;
    /// ACTIVE triggers in insertion order; malformed rows are dropped
    /// individually, never aborting the whole read
    async fn list_active_triggers(&self) -> Result<Vec<Trigger>>;
    async fn set_trigger_status(&self, id: i64, status: TriggerStatus) -> Result<()>;

    async fn add_note(&self, content: &str) -> Result<()>;
    async fn recent_notes(&self, limit: i64) -> Result<Vec<String>>;
}
