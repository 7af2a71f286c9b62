//! Synthetic change-request generator
//!
//! Amount ranges per operation kind:
//!
//! | Operation | Type | Change |
//! |---|---|---|
//! | deposit | Deposit | 10.00 to 1000.00 |
//! | withdraw | Withdraw | -500.00 to -10.00 |
//! | transfer | Deposit or Withdraw by sign | -100.00 to 100.00 |
//! | small | Deposit | 1.00 to 10.00 |
//! | zero | Deposit | 0, with a pincoin change of 1 to 10 |
//! | squash | Bet | -50.00 to 0.00, staking its own amount |
//! | raw | raw delta | +100.00 deposit, +100 pincoins |
//! | insert | journal only | 10.00 to 1000.00 deposit delta |
//!
//! The `all` mix draws deposit 40%, withdraw 30%, transfer 15%, small 10%,
//! squash 5%.

use crate::types::{
    AccountId, ChangeRequest, CurrencyId, LedgerDelta, LedgerError, TransactionType,
};
use rand::Rng;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Kind of synthetic load to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    /// Weighted mix of deposit, withdraw, transfer, small and squash
    #[default]
    All,
    Deposit,
    Withdraw,
    Transfer,
    Small,
    Zero,
    Squash,
    /// Fixed deltas applied without the business rules
    Raw,
    /// Journal appends only, no ledger write
    Insert,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::All => "all",
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::Transfer => "transfer",
            Operation::Small => "small",
            Operation::Zero => "zero",
            Operation::Squash => "squash",
            Operation::Raw => "raw",
            Operation::Insert => "insert",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Operation::All),
            "deposit" | "debit" => Ok(Operation::Deposit),
            "withdraw" | "credit" => Ok(Operation::Withdraw),
            "transfer" => Ok(Operation::Transfer),
            "small" => Ok(Operation::Small),
            "zero" => Ok(Operation::Zero),
            "squash" => Ok(Operation::Squash),
            "raw" | "tx" => Ok(Operation::Raw),
            "insert" | "journal" => Ok(Operation::Insert),
            _ => Err(LedgerError::invalid_request(format!(
                "unknown operation '{}'",
                s
            ))),
        }
    }
}

/// One unit of generated load
#[derive(Debug, Clone, PartialEq)]
pub enum LoadItem {
    /// Evaluate through the business rules
    Request(ChangeRequest),

    /// Apply the delta directly, journaled under the request identity
    Raw(ChangeRequest, LedgerDelta),

    /// Journal the delta under the request identity without a ledger write
    Insert(ChangeRequest, LedgerDelta),
}

/// Random generator of change requests
#[derive(Debug, Clone)]
pub struct RequestGenerator {
    operation: Operation,
    max_accounts: u64,
    project: String,
    currency: CurrencyId,
}

impl RequestGenerator {
    pub fn new(operation: Operation, max_accounts: u64, project: impl Into<String>) -> Self {
        RequestGenerator {
            operation,
            max_accounts: max_accounts.max(1),
            project: project.into(),
            currency: 0,
        }
    }

    pub fn with_currency(mut self, currency: CurrencyId) -> Self {
        self.currency = currency;
        self
    }

    /// Draw the next request
    ///
    /// The account is uniform in `0..max_accounts`; the transaction ID is a
    /// random non-negative `i64` so that separate runs do not collide.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> LoadItem {
        let account_id: AccountId = rng.gen_range(0..self.max_accounts);
        let transaction_id = rng.gen_range(0..i64::MAX as u64);
        let operation = match self.operation {
            Operation::All => draw_mixed(rng),
            other => other,
        };

        let request = |tx_type: TransactionType, change: Decimal| {
            ChangeRequest::new(account_id, transaction_id, tx_type, change)
                .with_currency(self.currency)
                .with_project(self.project.clone())
        };

        match operation {
            Operation::Deposit | Operation::All => {
                LoadItem::Request(request(TransactionType::Deposit, cents(rng, 1_000, 100_000)))
            }
            Operation::Withdraw => {
                LoadItem::Request(request(TransactionType::Withdraw, -cents(rng, 1_000, 50_000)))
            }
            Operation::Transfer => {
                let change = cents(rng, -10_000, 10_000);
                let tx_type = if change > Decimal::ZERO {
                    TransactionType::Deposit
                } else {
                    TransactionType::Withdraw
                };
                LoadItem::Request(request(tx_type, change))
            }
            Operation::Small => {
                LoadItem::Request(request(TransactionType::Deposit, cents(rng, 100, 1_000)))
            }
            Operation::Zero => {
                let pincoins = Decimal::from(rng.gen_range(1..=10_i64));
                LoadItem::Request(
                    request(TransactionType::Deposit, Decimal::ZERO).with_pincoin_change(pincoins),
                )
            }
            Operation::Squash => {
                let stake = cents(rng, 0, 5_000);
                LoadItem::Request(request(TransactionType::Bet, -stake).with_bet_amount(stake))
            }
            Operation::Raw => {
                let amount = Decimal::ONE_HUNDRED;
                let delta = LedgerDelta {
                    balance: amount,
                    pincoin_balance: amount,
                    deposit_all_sum: amount,
                    deposit_count: 1,
                    pincoins_all_sum: Decimal::ONE,
                };
                LoadItem::Raw(request(TransactionType::Deposit, amount), delta)
            }
            Operation::Insert => {
                let amount = cents(rng, 1_000, 100_000);
                LoadItem::Insert(
                    request(TransactionType::Deposit, amount),
                    LedgerDelta::deposit(amount),
                )
            }
        }
    }
}

fn draw_mixed<R: Rng + ?Sized>(rng: &mut R) -> Operation {
    match rng.gen_range(0..100) {
        0..=39 => Operation::Deposit,
        40..=69 => Operation::Withdraw,
        70..=84 => Operation::Transfer,
        85..=94 => Operation::Small,
        _ => Operation::Squash,
    }
}

/// Uniform amount in `[low, high]` cents
fn cents<R: Rng + ?Sized>(rng: &mut R, low: i64, high: i64) -> Decimal {
    Decimal::new(rng.gen_range(low..=high), 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;
    use std::collections::HashMap;

    fn draw(operation: Operation, count: usize) -> Vec<LoadItem> {
        let generator = RequestGenerator::new(operation, 50, "casino");
        let mut rng = StdRng::seed_from_u64(7);
        (0..count).map(|_| generator.next(&mut rng)).collect()
    }

    fn requests(operation: Operation, count: usize) -> Vec<ChangeRequest> {
        draw(operation, count)
            .into_iter()
            .map(|item| match item {
                LoadItem::Request(request) => request,
                other => panic!("expected a rules request, got {:?}", other),
            })
            .collect()
    }

    #[rstest]
    #[case("all", Operation::All)]
    #[case("debit", Operation::Deposit)]
    #[case("Credit", Operation::Withdraw)]
    #[case("squash", Operation::Squash)]
    #[case("tx", Operation::Raw)]
    #[case("insert", Operation::Insert)]
    fn test_operation_parsing(#[case] input: &str, #[case] expected: Operation) {
        assert_eq!(input.parse::<Operation>().unwrap(), expected);
    }

    #[test]
    fn test_operation_parsing_rejects_unknown() {
        assert!("update".parse::<Operation>().is_err());
    }

    #[rstest]
    #[case::deposit(Operation::Deposit, TransactionType::Deposit, "10.00", "1000.00")]
    #[case::withdraw(Operation::Withdraw, TransactionType::Withdraw, "-500.00", "-10.00")]
    #[case::small(Operation::Small, TransactionType::Deposit, "1.00", "10.00")]
    #[case::squash(Operation::Squash, TransactionType::Bet, "-50.00", "0.00")]
    fn test_amount_ranges(
        #[case] operation: Operation,
        #[case] tx_type: TransactionType,
        #[case] low: &str,
        #[case] high: &str,
    ) {
        let low = Decimal::from_str(low).unwrap();
        let high = Decimal::from_str(high).unwrap();

        for request in requests(operation, 500) {
            assert_eq!(request.transaction_type, tx_type);
            assert!(request.change >= low && request.change <= high);
            assert!(request.account_id < 50);
            assert_eq!(request.project, "casino");
        }
    }

    #[test]
    fn test_transfer_type_follows_sign() {
        for request in requests(Operation::Transfer, 500) {
            if request.change > Decimal::ZERO {
                assert_eq!(request.transaction_type, TransactionType::Deposit);
            } else {
                assert_eq!(request.transaction_type, TransactionType::Withdraw);
            }
        }
    }

    #[test]
    fn test_squash_stakes_its_amount() {
        for request in requests(Operation::Squash, 100) {
            assert_eq!(request.bet_amount, -request.change);
        }
    }

    #[test]
    fn test_raw_items_carry_delta() {
        for item in draw(Operation::Raw, 10) {
            let LoadItem::Raw(request, delta) = item else {
                panic!("expected raw item");
            };
            assert_eq!(delta.balance, request.change);
            assert_eq!(delta.deposit_count, 1);
        }
    }

    #[test]
    fn test_insert_items_carry_deposit_delta() {
        for item in draw(Operation::Insert, 100) {
            let LoadItem::Insert(request, delta) = item else {
                panic!("expected insert item");
            };
            assert_eq!(request.transaction_type, TransactionType::Deposit);
            assert_eq!(delta, LedgerDelta::deposit(request.change));
            assert!(request.change >= Decimal::TEN);
        }
    }

    #[test]
    fn test_mix_proportions() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<Operation, usize> = HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(draw_mixed(&mut rng)).or_default() += 1;
        }

        let share = |op| counts.get(&op).copied().unwrap_or_default() as f64 / 10_000.0;
        assert!((share(Operation::Deposit) - 0.40).abs() < 0.03);
        assert!((share(Operation::Withdraw) - 0.30).abs() < 0.03);
        assert!((share(Operation::Transfer) - 0.15).abs() < 0.03);
        assert!((share(Operation::Small) - 0.10).abs() < 0.03);
        assert!((share(Operation::Squash) - 0.05).abs() < 0.03);
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        assert_eq!(draw(Operation::All, 20), draw(Operation::All, 20));
    }
}
