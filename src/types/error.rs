//! Error types for the ledger
//!
//! This module defines the storage-level and coordinator-level errors.
//! Business-rule rejections are *not* errors: they are a normal
//! [`TransactionOutcome`](crate::core::TransactionOutcome).
//!
//! # Error Categories
//!
//! - **Transient storage errors**: network blips, write conflicts; retried
//! - **Idempotency conflicts**: duplicate journal key; treated as success
//! - **Fatal storage errors**: connectivity or protocol failures; surfaced
//! - **Input errors**: malformed CSV, unknown transaction types

use super::account::AccountId;
use thiserror::Error;

/// Error raised by a storage backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// Retryable failure (transient transaction error, network blip)
    #[error("Transient storage error: {message}")]
    Transient {
        /// Backend description of the failure
        message: String,
    },

    /// The atomic precondition of an upsert no longer held, or a concurrent
    /// session holds a conflicting write
    #[error("Write conflict on account {account_id}")]
    WriteConflict {
        /// Account whose row was contended
        account_id: AccountId,
    },

    /// The journal already holds an entry with this idempotency key
    #[error("Duplicate journal key {key}")]
    DuplicateKey {
        /// The colliding idempotency key
        key: String,
    },

    /// The backend cannot be reached
    #[error("Storage unavailable: {message}")]
    Unavailable {
        /// Backend description of the failure
        message: String,
    },

    /// Any other backend failure
    #[error("Storage backend error: {message}")]
    Backend {
        /// Backend description of the failure
        message: String,
    },

    /// A stored document could not be decoded
    #[error("Failed to decode stored document: {message}")]
    Decode {
        /// What was wrong with the document
        message: String,
    },
}

impl StorageError {
    /// Whether retrying the whole transaction may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Transient { .. } | StorageError::WriteConflict { .. }
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        StorageError::Transient {
            message: message.into(),
        }
    }

    pub fn write_conflict(account_id: AccountId) -> Self {
        StorageError::WriteConflict { account_id }
    }

    pub fn duplicate_key(key: impl Into<String>) -> Self {
        StorageError::DuplicateKey { key: key.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        StorageError::Decode {
            message: message.into(),
        }
    }
}

/// Main error type of the coordinator and the load driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Non-retryable storage failure, propagated to the caller
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A transient failure persisted past the retry budget
    #[error("Retries exhausted for account {account_id}: {last_error}")]
    RetriesExhausted {
        /// Account the request targeted
        account_id: AccountId,
        /// The transient error of the final attempt
        last_error: StorageError,
    },

    /// The request itself is malformed
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem
        message: String,
    },

    /// I/O error while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },
}

// Conversion from io::Error to LedgerError
impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::IoError {
            message: error.to_string(),
        }
    }
}

// Conversion from csv::Error to LedgerError
impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Create a RetriesExhausted error
    pub fn retries_exhausted(account_id: AccountId, last_error: StorageError) -> Self {
        LedgerError::RetriesExhausted {
            account_id,
            last_error,
        }
    }

    /// Create an InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        LedgerError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error for an unknown transaction type
    pub fn invalid_transaction_type(tx_type: &str) -> Self {
        LedgerError::InvalidRequest {
            message: format!("unknown transaction type '{}'", tx_type),
        }
    }

    /// Whether the failure came from storage (as opposed to bad input)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_) | LedgerError::RetriesExhausted { .. }
        )
    }
}
