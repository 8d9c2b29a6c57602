use super::Store;
use crate::models::{
    DecisionRecord, NewTrigger, OrderStatus, Position, Side, TradeRecord, Trigger, TriggerKind,
    TriggerOp, TriggerStatus,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

/// Postgres-backed persistence store
pub struct PgStore {
    pool: PgPool,
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn from_decimal(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

impl PgStore {
    /// Connect and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    fn trigger_from_row(row: &sqlx::postgres::PgRow) -> Option<Trigger> {
        let id: i64 = row.get("id");
        let operator_str: String = row.get("operator");
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");

        let operator = TriggerOp::parse(&operator_str)?;
        let kind = TriggerKind::parse(&kind_str)?;
        let status = TriggerStatus::parse(&status_str)?;
        let target_value: Decimal = row.get("target_value");

        Some(Trigger {
            id,
            description: row.get("description"),
            symbol: row.get("symbol"),
            operator,
            target_value: from_decimal(target_value),
            kind,
            status,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT config_value FROM config WHERE config_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("config_value")))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (config_key, config_value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (config_key) DO UPDATE SET
                config_value = EXCLUDED.config_value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, amount, avg_entry_price, last_mark_price, unrealized_pnl)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (symbol) DO UPDATE SET
                amount = EXCLUDED.amount,
                avg_entry_price = EXCLUDED.avg_entry_price,
                last_mark_price = EXCLUDED.last_mark_price,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                updated_at = NOW()
            "#,
        )
        .bind(&position.symbol)
        .bind(to_decimal(position.amount))
        .bind(to_decimal(position.avg_entry_price))
        .bind(to_decimal(position.last_mark_price))
        .bind(to_decimal(position.unrealized_pnl))
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved position for {}", position.symbol);
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, amount, avg_entry_price, last_mark_price, unrealized_pnl
            FROM positions
            ORDER BY symbol ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let amount: Decimal = row.get("amount");
            let avg_entry_price: Decimal = row.get("avg_entry_price");
            let last_mark_price: Decimal = row.get("last_mark_price");
            let unrealized_pnl: Decimal = row.get("unrealized_pnl");

            positions.push(Position {
                symbol: row.get("symbol"),
                amount: from_decimal(amount),
                avg_entry_price: from_decimal(avg_entry_price),
                last_mark_price: from_decimal(last_mark_price),
                unrealized_pnl: from_decimal(unrealized_pnl),
            });
        }

        tracing::info!("Loaded {} positions from Postgres", positions.len());
        Ok(positions)
    }

    async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (symbol, side, price, quantity, fee, order_id, status, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(to_decimal(trade.price))
        .bind(to_decimal(trade.quantity))
        .bind(to_decimal(trade.fee))
        .bind(&trade.order_id)
        .bind(trade.status.as_str())
        .bind(trade.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Recorded trade: {} {} {} @ {}",
            trade.symbol,
            trade.side.as_str(),
            trade.quantity,
            trade.price
        );
        Ok(())
    }

    async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, side, price, quantity, fee, order_id, status, ts
            FROM trades
            ORDER BY ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let side_str: String = row.get("side");
            let status_str: String = row.get("status");
            let side = match Side::parse(&side_str) {
                Some(s) => s,
                None => {
                    tracing::warn!("Dropping trade row with invalid side {:?}", side_str);
                    continue;
                }
            };
            let status = OrderStatus::parse(&status_str).unwrap_or(OrderStatus::Filled);
            let price: Decimal = row.get("price");
            let quantity: Decimal = row.get("quantity");
            let fee: Decimal = row.get("fee");

            trades.push(TradeRecord {
                symbol: row.get("symbol"),
                side,
                price: from_decimal(price),
                quantity: from_decimal(quantity),
                fee: from_decimal(fee),
                order_id: row.get("order_id"),
                status,
                timestamp: row.get("ts"),
            });
        }
        Ok(trades)
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE ts >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let n: i64 = row.get("n");
        Ok(n as u32)
    }

    async fn append_decision(&self, decision: &DecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (decision_type, input_data, output, error, ts)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&decision.decision_type)
        .bind(&decision.input_data)
        .bind(&decision.output)
        .bind(&decision.error)
        .bind(decision.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::info!("Logged decision: {}", decision.decision_type);
        Ok(())
    }

    async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT decision_type, input_data, output, error, ts
            FROM decisions
            ORDER BY ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DecisionRecord {
                decision_type: row.get("decision_type"),
                input_data: row
                    .get::<Option<serde_json::Value>, _>("input_data")
                    .unwrap_or(serde_json::Value::Null),
                output: row
                    .get::<Option<serde_json::Value>, _>("output")
                    .unwrap_or(serde_json::Value::Null),
                error: row.get("error"),
                timestamp: row.get("ts"),
            })
            .collect())
    }

    async fn add_trigger(&self, trigger: &NewTrigger) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO triggers (description, symbol, operator, target_value, kind, status)
            VALUES ($1, $2, $3, $4, $5, 'ACTIVE')
            RETURNING id
            "#,
        )
        .bind(&trigger.description)
        .bind(&trigger.symbol)
        .bind(trigger.operator.as_str())
        .bind(to_decimal(trigger.target_value))
        .bind(trigger.kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        tracing::info!("Added trigger {}: {}", id, trigger.description);
        Ok(id)
    }

    async fn list_active_triggers(&self) -> Result<Vec<Trigger>> {
        let rows = sqlx::query(
            r#"
            SELECT id, description, symbol, operator, target_value, kind, status, created_at
            FROM triggers
            WHERE status = 'ACTIVE'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut triggers = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::trigger_from_row(&row) {
                Some(t) => triggers.push(t),
                None => {
                    let id: i64 = row.get("id");
                    tracing::warn!("Dropping malformed trigger row {}", id);
                }
            }
        }
        Ok(triggers)
    }

    async fn set_trigger_status(&self, id: i64, status: TriggerStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE triggers
            SET status = $2,
                triggered_at = CASE WHEN $2 = 'TRIGGERED' THEN NOW() ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_note(&self, content: &str) -> Result<()> {
        sqlx::query("INSERT INTO notes (content) VALUES ($1)")
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_notes(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT content FROM notes ORDER BY ts DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.get("content")).collect())
    }
}
