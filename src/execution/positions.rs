use crate::models::{Position, Side};
use std::collections::HashMap;

/// In-memory authoritative holdings, one entry per symbol.
///
/// All mutation happens through the ExecutionRouter after a fill; the
/// weighted-average rule lives in `after_fill` as a pure computation so the
/// router can persist the new state before committing it here.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted rows at startup
    pub fn from_positions(positions: Vec<Position>) -> Self {
        let map = positions
            .into_iter()
            .filter(|p| p.amount > 0.0)
            .map(|p| (p.symbol.clone(), p))
            .collect();
        Self { positions: map }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn amount(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.amount).unwrap_or(0.0)
    }

    /// Open holdings only
    pub fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.amount > 0.0)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        open
    }

    /// Mark-to-market value of all holdings
    pub fn market_value(&self) -> f64 {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    /// Compute the post-fill position without mutating the book.
    ///
    /// BUY: amount grows, avg entry becomes the weighted average of old and
    /// new notional. SELL: amount shrinks (floored at zero), avg entry is
    /// untouched unless the position closes, which resets it to zero.
    pub fn after_fill(&self, symbol: &str, side: Side, quantity: f64, price: f64) -> Position {
        let current = self
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol));

        let (new_amount, new_avg) = match side {
            Side::Buy => {
                let total_cost = current.amount * current.avg_entry_price + quantity * price;
                let amount = current.amount + quantity;
                let avg = if amount > 0.0 { total_cost / amount } else { 0.0 };
                (amount, avg)
            }
            Side::Sell => {
                let amount = (current.amount - quantity).max(0.0);
                let avg = if amount == 0.0 {
                    0.0
                } else {
                    current.avg_entry_price
                };
                (amount, avg)
            }
        };

        Position {
            symbol: symbol.to_string(),
            amount: new_amount,
            avg_entry_price: new_avg,
            last_mark_price: price,
            unrealized_pnl: (price - new_avg) * new_amount,
        }
    }

    /// Install a position computed by `after_fill` once its persistence
    /// succeeded
    pub fn commit(&mut self, position: Position) {
        tracing::info!(
            "Position update: {} amount {:.8} avg {:.2}",
            position.symbol,
            position.amount,
            position.avg_entry_price
        );
        self.positions.insert(position.symbol.clone(), position);
    }

    /// after_fill + commit in one step
    pub fn apply_fill(&mut self, symbol: &str, side: Side, quantity: f64, price: f64) -> Position {
        let position = self.after_fill(symbol, side, quantity, price);
        self.commit(position.clone());
        position
    }
}
