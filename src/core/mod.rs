//! Core business logic module
//!
//! This module contains the transaction processing components:
//! - `rules` - Pure business rules (request + prior state -> effect)
//! - `traits` - Storage abstractions for interchangeable backends
//! - `coordinator` - Idempotent, retried ledger/journal writes

pub mod coordinator;
pub mod rules;
pub mod traits;

pub use coordinator::{Hooks, RetryPolicy, TransactionCoordinator, TransactionOutcome};
pub use rules::{evaluate, round_money, RuleProfile};
pub use traits::{JournalStore, LedgerStore, Storage, Transactional};
