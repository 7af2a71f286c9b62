//! Change-request types for the ledger
//!
//! A change request is the caller-supplied instruction describing a proposed
//! mutation of one account, before the business rules have looked at it.

use super::account::AccountId;
use super::error::LedgerError;
use super::journal::IdempotencyKey;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// External correlation identifier supplied by the caller
pub type TransactionId = u64;

/// Numeric currency code
pub type CurrencyId = u64;

/// Project tag used when a request does not name one
pub const DEFAULT_PROJECT: &str = "default";

/// Transaction types supported by the ledger
///
/// The wire names (`as_str`) are the ones the upstream betting service
/// writes into the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    /// Money paid in by the account holder
    Deposit,

    /// A wager; `bet_amount` must be covered by the current balance
    Bet,

    /// Money paid out to the account holder
    Withdraw,

    /// Lottery winnings credited to the account
    LotteryWin,

    /// Winnings from a free bet, credited unconditionally
    FreebetWin,
}

impl TransactionType {
    /// All variants, in declaration order
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Deposit,
        TransactionType::Bet,
        TransactionType::Withdraw,
        TransactionType::LotteryWin,
        TransactionType::FreebetWin,
    ];

    /// Wire name stored in the journal
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "Add Deposit",
            TransactionType::Bet => "Write bet",
            TransactionType::Withdraw => "Withdraw",
            TransactionType::LotteryWin => "LotteryWin",
            TransactionType::FreebetWin => "FreebetWin",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    /// Accepts the wire names as well as short, case-insensitive aliases
    /// (`deposit`, `bet`, `withdraw`, `lottery_win`, `freebet_win`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(tx_type) = TransactionType::ALL
            .iter()
            .find(|t| t.as_str() == trimmed)
        {
            return Ok(*tx_type);
        }

        match trimmed.to_lowercase().replace(['-', ' '], "_").as_str() {
            "deposit" | "add_deposit" => Ok(TransactionType::Deposit),
            "bet" | "write_bet" => Ok(TransactionType::Bet),
            "withdraw" | "withdrawal" => Ok(TransactionType::Withdraw),
            "lotterywin" | "lottery_win" => Ok(TransactionType::LotteryWin),
            "freebetwin" | "freebet_win" => Ok(TransactionType::FreebetWin),
            _ => Err(LedgerError::invalid_transaction_type(s)),
        }
    }
}

/// A proposed mutation of one account
///
/// Immutable once built. Never persisted as-is: the coordinator turns an
/// accepted request into a [`JournalEntry`](super::JournalEntry).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    /// Target account (every request targets exactly one account)
    pub account_id: AccountId,

    /// External correlation id; together with `account_id` it is the
    /// request identity used for idempotency
    pub transaction_id: TransactionId,

    pub transaction_type: TransactionType,

    /// Signed monetary delta, rounded to two decimals by the rules
    pub change: Decimal,

    /// Signed pincoin delta
    pub pincoin_change: Decimal,

    /// Stake checked against the balance by Bet and Withdraw
    pub bet_amount: Decimal,

    pub currency: CurrencyId,

    /// Logical partition / tenant tag; also selects the rule profile
    pub project: String,
}

impl ChangeRequest {
    /// Create a request with zero pincoin change, zero bet amount, currency 0
    /// and the default project
    pub fn new(
        account_id: AccountId,
        transaction_id: TransactionId,
        transaction_type: TransactionType,
        change: Decimal,
    ) -> Self {
        ChangeRequest {
            account_id,
            transaction_id,
            transaction_type,
            change,
            pincoin_change: Decimal::ZERO,
            bet_amount: Decimal::ZERO,
            currency: 0,
            project: DEFAULT_PROJECT.to_string(),
        }
    }

    pub fn with_pincoin_change(mut self, pincoin_change: Decimal) -> Self {
        self.pincoin_change = pincoin_change;
        self
    }

    pub fn with_bet_amount(mut self, bet_amount: Decimal) -> Self {
        self.bet_amount = bet_amount;
        self
    }

    pub fn with_currency(mut self, currency: CurrencyId) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Idempotency key derived from the request identity
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(self.account_id, self.transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::deposit_wire("Add Deposit", TransactionType::Deposit)]
    #[case::deposit_alias("deposit", TransactionType::Deposit)]
    #[case::bet_wire("Write bet", TransactionType::Bet)]
    #[case::bet_alias("BET", TransactionType::Bet)]
    #[case::withdraw("Withdraw", TransactionType::Withdraw)]
    #[case::withdrawal_alias("withdrawal", TransactionType::Withdraw)]
    #[case::lottery("LotteryWin", TransactionType::LotteryWin)]
    #[case::lottery_alias("lottery-win", TransactionType::LotteryWin)]
    #[case::freebet("FreebetWin", TransactionType::FreebetWin)]
    #[case::freebet_alias("freebet_win", TransactionType::FreebetWin)]
    fn test_transaction_type_parsing(#[case] input: &str, #[case] expected: TransactionType) {
        assert_eq!(input.parse::<TransactionType>().unwrap(), expected);
    }

    #[test]
    fn test_transaction_type_parsing_rejects_unknown() {
        let result = "chargeback".parse::<TransactionType>();
        assert!(matches!(result, Err(LedgerError::InvalidRequest { .. })));
    }

    #[test]
    fn test_wire_names_round_trip() {
        for tx_type in TransactionType::ALL {
            assert_eq!(tx_type.to_string().parse::<TransactionType>().unwrap(), tx_type);
        }
    }

    #[test]
    fn test_builder_defaults() {
        let request = ChangeRequest::new(1, 2, TransactionType::Deposit, Decimal::ONE);

        assert_eq!(request.pincoin_change, Decimal::ZERO);
        assert_eq!(request.bet_amount, Decimal::ZERO);
        assert_eq!(request.project, DEFAULT_PROJECT);

        let request = request
            .with_bet_amount(Decimal::TEN)
            .with_pincoin_change(Decimal::TWO)
            .with_currency(840)
            .with_project("sport");
        assert_eq!(request.bet_amount, Decimal::TEN);
        assert_eq!(request.pincoin_change, Decimal::TWO);
        assert_eq!(request.currency, 840);
        assert_eq!(request.project, "sport");
    }

    #[test]
    fn test_idempotency_key_ignores_amounts() {
        let a = ChangeRequest::new(1, 99, TransactionType::Deposit, Decimal::ONE);
        let b = ChangeRequest::new(1, 99, TransactionType::Withdraw, Decimal::NEGATIVE_ONE);

        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }
}
