//! Journal types: the append-only audit record of applied effects

use super::account::{AccountId, AccountLedger, LedgerDelta};
use super::request::{ChangeRequest, CurrencyId, TransactionId, TransactionType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Uniqueness key of a journal entry
///
/// Lowercase hex SHA-256 of `"{account_id}:{transaction_id}"`. Only request
/// identity goes into the hash, so re-submitting the same logical
/// transaction always yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(account_id: AccountId, transaction_id: TransactionId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", account_id, transaction_id).as_bytes());
        IdempotencyKey(hex::encode(hasher.finalize()))
    }

    /// Wrap a key read back from storage
    pub fn from_stored(key: impl Into<String>) -> Self {
        IdempotencyKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable audit record of one coordinated request
///
/// Written once at commit time, never mutated or deleted. `ledger` is the
/// account state right after `delta` was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub idempotency_key: IdempotencyKey,
    pub transaction_id: TransactionId,
    pub transaction_type: TransactionType,
    pub project: String,
    pub currency: CurrencyId,
    pub date: DateTime<Utc>,

    /// Monetary change as requested (before rounding)
    pub change: Decimal,

    /// Pincoin change as requested
    pub pincoin_change: Decimal,

    /// Increments actually applied to the ledger
    pub delta: LedgerDelta,

    /// Post-mutation account state
    pub ledger: AccountLedger,
}

impl JournalEntry {
    /// Build the entry for an accepted request from the upsert result
    pub fn record(request: &ChangeRequest, delta: LedgerDelta, ledger: AccountLedger) -> Self {
        JournalEntry {
            id: Uuid::new_v4(),
            account_id: request.account_id,
            idempotency_key: request.idempotency_key(),
            transaction_id: request.transaction_id,
            transaction_type: request.transaction_type,
            project: request.project.clone(),
            currency: request.currency,
            date: Utc::now(),
            change: request.change,
            pincoin_change: request.pincoin_change,
            delta,
            ledger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_stable() {
        let first = IdempotencyKey::derive(42, 1001);
        let second = IdempotencyKey::derive(42, 1001);

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_idempotency_key_separates_accounts_and_transactions() {
        assert_ne!(IdempotencyKey::derive(1, 2), IdempotencyKey::derive(2, 1));
        assert_ne!(IdempotencyKey::derive(1, 2), IdempotencyKey::derive(1, 3));
        // "1:23" vs "12:3" must not collide
        assert_ne!(IdempotencyKey::derive(1, 23), IdempotencyKey::derive(12, 3));
    }

    #[test]
    fn test_record_copies_request_identity() {
        let request = ChangeRequest::new(5, 77, TransactionType::Deposit, Decimal::new(1005, 2))
            .with_currency(978)
            .with_project("casino");
        let delta = LedgerDelta::deposit(Decimal::new(1005, 2));
        let ledger = AccountLedger::from_delta(5, &delta);

        let entry = JournalEntry::record(&request, delta, ledger.clone());

        assert_eq!(entry.account_id, 5);
        assert_eq!(entry.transaction_id, 77);
        assert_eq!(entry.idempotency_key, request.idempotency_key());
        assert_eq!(entry.currency, 978);
        assert_eq!(entry.project, "casino");
        assert_eq!(entry.ledger, ledger);
    }
}
