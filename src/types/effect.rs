//! Outcome of validating a change request against prior account state

use super::account::{AccountLedger, LedgerDelta};
use rust_decimal::Decimal;
use std::fmt;

/// Why the business rules declined a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Neither the balance branch nor the pincoin fallback admitted it
    FailBalance,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::FailBalance => "fail_balance",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State an admissibility decision depended on
///
/// The storage engine checks the precondition inside the same atomic step
/// as the increment, so a decision made on a stale read can never be
/// applied. A failed check is reported as a write conflict and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// Plain increment, valid against any prior state
    #[default]
    None,

    /// The account must not exist yet (creation path)
    Absent,

    /// Balance and pincoin balance must still equal the evaluated values
    Matches {
        balance: Decimal,
        pincoin_balance: Decimal,
    },
}

impl Precondition {
    /// Snapshot the fields the rules compared against
    pub fn matching(ledger: &AccountLedger) -> Self {
        Precondition::Matches {
            balance: ledger.balance,
            pincoin_balance: ledger.pincoin_balance,
        }
    }

    /// Check the precondition against the current row (`None` = absent)
    pub fn holds(&self, current: Option<&AccountLedger>) -> bool {
        match (self, current) {
            (Precondition::None, _) => true,
            (Precondition::Absent, current) => current.is_none(),
            (Precondition::Matches { .. }, None) => false,
            (
                Precondition::Matches {
                    balance,
                    pincoin_balance,
                },
                Some(ledger),
            ) => ledger.balance == *balance && ledger.pincoin_balance == *pincoin_balance,
        }
    }
}

/// Result of running the business rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEffect {
    /// The request is admissible; apply `delta` under `precondition`
    Success {
        delta: LedgerDelta,
        precondition: Precondition,
    },

    /// The request is declined; no ledger field changes
    Fail { reason: FailReason },
}

impl TransactionEffect {
    pub fn fail_balance() -> Self {
        TransactionEffect::Fail {
            reason: FailReason::FailBalance,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransactionEffect::Success { .. })
    }

    /// Delta of a successful effect
    pub fn delta(&self) -> Option<&LedgerDelta> {
        match self {
            TransactionEffect::Success { delta, .. } => Some(delta),
            TransactionEffect::Fail { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_none_always_holds() {
        assert!(Precondition::None.holds(None));
        assert!(Precondition::None.holds(Some(&AccountLedger::new(1))));
    }

    #[test]
    fn test_precondition_absent() {
        assert!(Precondition::Absent.holds(None));
        assert!(!Precondition::Absent.holds(Some(&AccountLedger::new(1))));
    }

    #[test]
    fn test_precondition_matches() {
        let mut ledger = AccountLedger::new(1);
        ledger.balance = Decimal::new(10000, 2);
        let precondition = Precondition::matching(&ledger);

        assert!(precondition.holds(Some(&ledger)));
        assert!(!precondition.holds(None));

        ledger.balance = Decimal::new(9999, 2);
        assert!(!precondition.holds(Some(&ledger)));
    }

    #[test]
    fn test_fail_reason_display() {
        assert_eq!(FailReason::FailBalance.to_string(), "fail_balance");
        assert!(TransactionEffect::fail_balance().delta().is_none());
    }
}
