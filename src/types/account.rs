//! Account-related types for the ledger
//!
//! This module defines the per-account ledger row and the numeric delta
//! that a single accepted mutation applies to it.

use rust_decimal::Decimal;

/// Account identifier
///
/// Supports account IDs from 0 to 18,446,744,073,709,551,615
pub type AccountId = u64;

/// Current-state projection of one account
///
/// One row per account in the balance collection. The cumulative counters
/// (`deposit_all_sum`, `deposit_count`, `pincoins_all_sum`) never decrease;
/// `balance` and `pincoin_balance` move in either direction, but only
/// through accepted effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLedger {
    /// The account ID (unique key of the balance collection)
    pub account_id: AccountId,

    /// Primary monetary balance, two decimal places
    pub balance: Decimal,

    /// Secondary, non-monetary balance unit
    pub pincoin_balance: Decimal,

    /// Sum of all positive deposits ever accepted
    pub deposit_all_sum: Decimal,

    /// Number of accepted deposits
    pub deposit_count: u64,

    /// Sum of the non-negative part of every accepted pincoin change
    pub pincoins_all_sum: Decimal,
}

impl AccountLedger {
    /// Create a zero-valued ledger row for `account_id`
    pub fn new(account_id: AccountId) -> Self {
        AccountLedger {
            account_id,
            balance: Decimal::ZERO,
            pincoin_balance: Decimal::ZERO,
            deposit_all_sum: Decimal::ZERO,
            deposit_count: 0,
            pincoins_all_sum: Decimal::ZERO,
        }
    }

    /// Create a ledger row whose initial values are the given delta
    ///
    /// This is the "create" half of increment-or-create.
    pub fn from_delta(account_id: AccountId, delta: &LedgerDelta) -> Self {
        let mut ledger = AccountLedger::new(account_id);
        delta.apply_to(&mut ledger);
        ledger
    }
}

/// Numeric increments applied by one upsert
///
/// Every field is added to the matching [`AccountLedger`] field. A zero
/// delta is valid and still creates the account when it does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerDelta {
    pub balance: Decimal,
    pub pincoin_balance: Decimal,
    pub deposit_all_sum: Decimal,
    pub deposit_count: u64,
    pub pincoins_all_sum: Decimal,
}

impl LedgerDelta {
    /// A delta touching only the primary balance
    pub fn balance(amount: Decimal) -> Self {
        LedgerDelta {
            balance: amount,
            ..LedgerDelta::default()
        }
    }

    /// A delta for one accepted deposit of `amount`
    pub fn deposit(amount: Decimal) -> Self {
        LedgerDelta {
            balance: amount,
            deposit_all_sum: amount,
            deposit_count: 1,
            ..LedgerDelta::default()
        }
    }

    /// Add this delta to a ledger row in place
    pub fn apply_to(&self, ledger: &mut AccountLedger) {
        ledger.balance += self.balance;
        ledger.pincoin_balance += self.pincoin_balance;
        ledger.deposit_all_sum += self.deposit_all_sum;
        ledger.deposit_count += self.deposit_count;
        ledger.pincoins_all_sum += self.pincoins_all_sum;
    }
}
