// Order execution pipeline: safety gates, dual-mode routing, accounting
pub mod ledger;
pub mod positions;
pub mod router;
pub mod safety;

pub use ledger::{AccountLedger, BalanceReject};
pub use positions::PositionBook;
pub use router::{AccountSummary, ExecutionResult, ExecutionRouter, ExecutionStatus, CASH_BALANCE_KEY};
pub use safety::{SafetyGuard, SafetyLimits, SafetyReject};
