//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: ledger rows and deltas
//! - `request`: change requests and transaction types
//! - `effect`: business-rule outcomes and storage preconditions
//! - `journal`: audit records and idempotency keys
//! - `error`: storage and coordinator errors

pub mod account;
pub mod effect;
pub mod error;
pub mod journal;
pub mod request;

pub use account::{AccountId, AccountLedger, LedgerDelta};
pub use effect::{FailReason, Precondition, TransactionEffect};
pub use error::{LedgerError, StorageError};
pub use journal::{IdempotencyKey, JournalEntry};
pub use request::{ChangeRequest, CurrencyId, TransactionId, TransactionType, DEFAULT_PROJECT};
