use crate::config::TradingMode;
use crate::models::Side;
use std::fmt;

/// Why a balance validation failed. Reported as a distinct "rejected"
/// reason so observers can tell it apart from safety-policy blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceReject {
    InsufficientCash { needed: f64, available: f64 },
    InsufficientHoldings { needed: f64, held: f64 },
}

impl fmt::Display for BalanceReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientCash { needed, available } => write!(
                f,
                "insufficient funds: need ${:.2}, have ${:.2}",
                needed, available
            ),
            Self::InsufficientHoldings { needed, held } => write!(
                f,
                "insufficient holdings: need {:.8}, hold {:.8}",
                needed, held
            ),
        }
    }
}

/// Cash side of the account. BUY debits the filled notional; SELL credits
/// the filled notional net of fee.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    cash_balance: f64,
    mode: TradingMode,
}

impl AccountLedger {
    pub fn new(initial_cash: f64, mode: TradingMode) -> Self {
        tracing::info!(
            "AccountLedger opened in {} mode with ${:.2}",
            mode.as_str(),
            initial_cash
        );
        Self {
            cash_balance: initial_cash,
            mode,
        }
    }

    pub fn cash_balance(&self) -> f64 {
        self.cash_balance
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Ledger-level affordability check, distinct from the SafetyGuard's
    /// equity caps: BUY needs cash to cover the notional, SELL needs the
    /// holding to cover the quantity.
    pub fn validate_balance(
        &self,
        side: Side,
        notional: f64,
        quantity: f64,
        held_amount: f64,
    ) -> Result<(), BalanceReject> {
        match side {
            Side::Buy => {
                if self.cash_balance < notional {
                    return Err(BalanceReject::InsufficientCash {
                        needed: notional,
                        available: self.cash_balance,
                    });
                }
            }
            Side::Sell => {
                if held_amount < quantity {
                    return Err(BalanceReject::InsufficientHoldings {
                        needed: quantity,
                        held: held_amount,
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply a completed fill to the cash balance
    pub fn apply_fill(&mut self, side: Side, notional: f64, fee: f64) {
        match side {
            Side::Buy => self.cash_balance -= notional,
            Side::Sell => self.cash_balance += notional - fee,
        }
        tracing::info!(
            "Ledger {}: {} ${:.2} (fee ${:.4}) -> cash ${:.2}",
            self.mode.as_str(),
            side.as_str(),
            notional,
            fee,
            self.cash_balance
        );
    }

    /// Restore a persisted balance at startup
    pub fn set_cash_balance(&mut self, cash: f64) {
        self.cash_balance = cash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_debits_notional() {
        let mut ledger = AccountLedger::new(10_000.0, TradingMode::Paper);
        ledger.apply_fill(Side::Buy, 500.0, 0.5);
        assert_eq!(ledger.cash_balance(), 9_500.0);
    }

    #[test]
    fn test_sell_credits_net_of_fee() {
        let mut ledger = AccountLedger::new(10_000.0, TradingMode::Paper);
        ledger.apply_fill(Side::Sell, 6_000.0, 6.0);
        assert_eq!(ledger.cash_balance(), 15_994.0);
    }

    #[test]
    fn test_validate_buy_insufficient_cash() {
        let ledger = AccountLedger::new(100.0, TradingMode::Paper);
        let result = ledger.validate_balance(Side::Buy, 500.0, 0.01, 0.0);
        assert!(matches!(result, Err(BalanceReject::InsufficientCash { .. })));
    }

    #[test]
    fn test_validate_sell_insufficient_holdings() {
        let ledger = AccountLedger::new(100.0, TradingMode::Paper);
        let result = ledger.validate_balance(Side::Sell, 500.0, 0.5, 0.1);
        assert!(matches!(
            result,
            Err(BalanceReject::InsufficientHoldings { .. })
        ));
    }

    #[test]
    fn test_validate_passes_at_exact_amounts() {
        let ledger = AccountLedger::new(500.0, TradingMode::Paper);
        assert!(ledger.validate_balance(Side::Buy, 500.0, 0.01, 0.0).is_ok());
        assert!(ledger.validate_balance(Side::Sell, 500.0, 0.1, 0.1).is_ok());
    }
}
