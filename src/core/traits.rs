//! Core traits for ledger and journal storage
//!
//! These abstractions let the coordinator run against any backend that can
//! group a ledger upsert and a journal append into one atomic unit. The
//! in-memory store and the MongoDB store both implement them.
//!
//! Every mutation takes the backend's session, and nothing written through
//! a session is visible to other readers until [`Transactional::commit`]
//! succeeds. [`Transactional::abort`] discards the session's writes.

use crate::types::{
    AccountId, AccountLedger, IdempotencyKey, JournalEntry, LedgerDelta, Precondition,
    StorageError,
};
use async_trait::async_trait;

/// A backend that can group writes into an atomic session
#[async_trait]
pub trait Transactional: Send + Sync {
    /// Backend-specific transaction handle
    type Session: Send;

    /// Open a new session with a started transaction
    async fn start_session(&self) -> Result<Self::Session, StorageError>;

    /// Make every write of the session visible at once
    ///
    /// A transient error means nothing was committed and the whole unit may
    /// be retried.
    async fn commit(&self, session: Self::Session) -> Result<(), StorageError>;

    /// Discard every write of the session
    async fn abort(&self, session: Self::Session) -> Result<(), StorageError>;
}

/// Current-state projection of every account
#[async_trait]
pub trait LedgerStore: Transactional {
    /// Read the committed state of an account (`None` if it does not exist)
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountLedger>, StorageError>;

    /// Atomically increment-or-create the account row
    ///
    /// Creates the row with `delta` as its initial values if it does not
    /// exist, otherwise adds `delta` to every field. `precondition` is
    /// checked in the same atomic step; a failed check returns
    /// [`StorageError::WriteConflict`]. Returns the post-mutation state.
    async fn upsert(
        &self,
        session: &mut Self::Session,
        account_id: AccountId,
        delta: &LedgerDelta,
        precondition: &Precondition,
    ) -> Result<AccountLedger, StorageError>;

    /// Snapshot of every committed account, ordered by account ID
    async fn all(&self) -> Result<Vec<AccountLedger>, StorageError>;
}

/// Append-only audit log with a unique idempotency key
#[async_trait]
pub trait JournalStore: Transactional {
    /// Append an entry inside the session
    ///
    /// Fails with [`StorageError::DuplicateKey`] when an entry with the same
    /// idempotency key is already committed.
    async fn append(
        &self,
        session: &mut Self::Session,
        entry: &JournalEntry,
    ) -> Result<(), StorageError>;

    /// Look up a committed entry by its idempotency key
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JournalEntry>, StorageError>;

    /// Every committed entry of one account, in commit order
    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<JournalEntry>, StorageError>;
}

/// A backend providing both collections over one session type
pub trait Storage: LedgerStore + JournalStore {}

impl<T: LedgerStore + JournalStore> Storage for T {}
