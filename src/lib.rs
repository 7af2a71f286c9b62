//! Ledger Bench Library
//! # Overview
//!
//! This library drives a financial ledger with concurrent balance changes
//! and checks that it stays consistent under load: no lost updates,
//! idempotent replays and a journal entry for every applied change.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (ledger rows, change requests, journal entries, errors)
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::rules`] - Admissibility rules for each transaction type and project
//!   - [`core::traits`] - Session-scoped ledger and journal storage interfaces
//!   - [`core::coordinator`] - Idempotent, retried ledger/journal writes
//! - [`store`] - Storage backends (in-memory, MongoDB behind the `mongodb` feature)
//! - [`worker`] - Fixed-size worker pool with error policy and throughput reporting
//! - [`load`] - Synthetic request generation and load runs
//! - [`io`] - CSV replay input and CSV exports
//!
//! # Transaction Types
//!
//! - **Add Deposit**: Credit the balance and the deposit counters
//! - **Bet**: Debit a stake; must be covered by the balance outside the sport project
//! - **Withdraw**: Debit the balance; must never overdraw
//! - **Lottery Win**: Credit the balance
//! - **Freebet Win**: Credit the balance
//!
//! # Ledger Rows
//!
//! Each account maintains:
//! - `balance`: Spendable funds, two decimals
//! - `pincoin_balance`: Loyalty points
//! - `deposit_all_sum` / `deposit_count`: Lifetime deposits
//! - `pincoins_all_sum`: Lifetime pincoins earned

// Module declarations
pub mod cli;
pub mod core;
pub mod io;
pub mod load;
pub mod store;
pub mod types;
pub mod worker;

pub use crate::core::{Hooks, Storage, TransactionCoordinator, TransactionOutcome};
pub use io::{write_journal_csv, write_ledgers_csv, write_report_csv};
pub use load::{LoadConfig, LoadReport, LoadRunner, Operation};
pub use store::MemoryStore;
pub use types::{
    AccountId, AccountLedger, ChangeRequest, JournalEntry, LedgerDelta, LedgerError,
    StorageError, TransactionId, TransactionType,
};
pub use worker::{ErrorPolicy, WorkerPool};
