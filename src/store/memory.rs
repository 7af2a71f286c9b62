//! Thread-safe in-memory storage backend
//!
//! This module provides the `MemoryStore` struct, which implements both the
//! ledger and the journal on top of concurrent maps, with sessions that give
//! the same guarantees the coordinator relies on from a database:
//!
//! - Writes of a session stay invisible to readers until commit
//! - A row written by an uncommitted session cannot be written by another
//!   session; the second writer gets a [`StorageError::WriteConflict`]
//! - Abort discards every write of the session, including row creation
//!
//! # Design
//!
//! Each ledger row keeps its committed state and at most one pending state
//! owned by a session. `DashMap` entry locks make the precondition check and
//! the increment of one row a single atomic step, while different accounts
//! never block each other.
//!
//! # Fault Injection
//!
//! [`MemoryStore::fail_next_commits`] makes the next `n` commits fail with a
//! transient error after discarding the session, which is how tests and
//! benchmarks exercise the retry path without a real database.

use crate::core::traits::{JournalStore, LedgerStore, Transactional};
use crate::types::{
    AccountId, AccountLedger, IdempotencyKey, JournalEntry, LedgerDelta, Precondition,
    StorageError,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Identifier of an open session
type SessionId = u64;

/// One account row with its optional uncommitted successor
#[derive(Debug)]
struct LedgerRow {
    committed: Option<AccountLedger>,
    pending: Option<(SessionId, AccountLedger)>,
}

/// One journal slot; `owner` is set while the append is uncommitted
#[derive(Debug)]
struct JournalSlot {
    entry: JournalEntry,
    owner: Option<SessionId>,
}

/// Handle of an open in-memory transaction
///
/// Must be passed to [`Transactional::commit`] or [`Transactional::abort`];
/// a dropped session keeps its rows write-locked.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    accounts: Vec<AccountId>,
    appended: Vec<(AccountId, IdempotencyKey)>,
}

/// In-memory ledger and journal
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Account rows by account ID
    ledgers: DashMap<AccountId, LedgerRow>,

    /// Journal entries by idempotency key
    journal: DashMap<IdempotencyKey, JournalSlot>,

    /// Committed journal keys per account, in commit order
    by_account: DashMap<AccountId, Vec<IdempotencyKey>>,

    next_session: AtomicU64,

    /// Remaining commits that must fail with a transient error
    injected_faults: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a transient error
    ///
    /// The failing session is aborted first, so the retried attempt starts
    /// from clean state.
    pub fn fail_next_commits(&self, count: u64) {
        self.injected_faults.store(count, Ordering::SeqCst);
    }

    /// Number of committed accounts
    pub fn account_count(&self) -> usize {
        self.ledgers
            .iter()
            .filter(|row| row.committed.is_some())
            .count()
    }

    /// Number of committed journal entries
    pub fn journal_len(&self) -> usize {
        self.journal
            .iter()
            .filter(|slot| slot.owner.is_none())
            .count()
    }

    fn take_fault(&self) -> bool {
        self.injected_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn discard(&self, session: &MemorySession) {
        for account_id in &session.accounts {
            if let Some(mut row) = self.ledgers.get_mut(account_id) {
                if matches!(row.pending, Some((owner, _)) if owner == session.id) {
                    row.pending = None;
                }
            }
            self.ledgers
                .remove_if(account_id, |_, row| row.committed.is_none() && row.pending.is_none());
        }
        for (_, key) in &session.appended {
            self.journal
                .remove_if(key, |_, slot| slot.owner == Some(session.id));
        }
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    type Session = MemorySession;

    async fn start_session(&self) -> Result<MemorySession, StorageError> {
        Ok(MemorySession {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            accounts: Vec::new(),
            appended: Vec::new(),
        })
    }

    async fn commit(&self, session: MemorySession) -> Result<(), StorageError> {
        if self.take_fault() {
            self.discard(&session);
            debug!(session = session.id, "Injected commit failure");
            return Err(StorageError::transient("injected commit failure"));
        }

        // Rows first: a visible journal entry implies its ledger state is visible
        for account_id in &session.accounts {
            if let Some(mut row) = self.ledgers.get_mut(account_id) {
                if let Some((owner, ledger)) = row.pending.take() {
                    if owner == session.id {
                        row.committed = Some(ledger);
                    } else {
                        row.pending = Some((owner, ledger));
                    }
                }
            }
        }

        for (account_id, key) in &session.appended {
            if let Some(mut slot) = self.journal.get_mut(key) {
                if slot.owner == Some(session.id) {
                    slot.owner = None;
                    self.by_account
                        .entry(*account_id)
                        .or_default()
                        .push(key.clone());
                }
            }
        }

        Ok(())
    }

    async fn abort(&self, session: MemorySession) -> Result<(), StorageError> {
        self.discard(&session);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountLedger>, StorageError> {
        Ok(self
            .ledgers
            .get(&account_id)
            .and_then(|row| row.committed.clone()))
    }

    async fn upsert(
        &self,
        session: &mut MemorySession,
        account_id: AccountId,
        delta: &LedgerDelta,
        precondition: &Precondition,
    ) -> Result<AccountLedger, StorageError> {
        let mut row = self.ledgers.entry(account_id).or_insert_with(|| LedgerRow {
            committed: None,
            pending: None,
        });

        let base = match &row.pending {
            Some((owner, _)) if *owner != session.id => {
                return Err(StorageError::write_conflict(account_id));
            }
            Some((_, pending)) => Some(pending.clone()),
            None => row.committed.clone(),
        };

        if !precondition.holds(base.as_ref()) {
            let abandoned = row.committed.is_none() && row.pending.is_none();
            drop(row);
            if abandoned {
                self.ledgers.remove_if(&account_id, |_, row| {
                    row.committed.is_none() && row.pending.is_none()
                });
            }
            return Err(StorageError::write_conflict(account_id));
        }

        let next = match base {
            Some(mut ledger) => {
                delta.apply_to(&mut ledger);
                ledger
            }
            None => AccountLedger::from_delta(account_id, delta),
        };
        row.pending = Some((session.id, next.clone()));
        if !session.accounts.contains(&account_id) {
            session.accounts.push(account_id);
        }

        Ok(next)
    }

    async fn all(&self) -> Result<Vec<AccountLedger>, StorageError> {
        let mut ledgers: Vec<AccountLedger> = self
            .ledgers
            .iter()
            .filter_map(|row| row.committed.clone())
            .collect();
        ledgers.sort_by_key(|ledger| ledger.account_id);
        Ok(ledgers)
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn append(
        &self,
        session: &mut MemorySession,
        entry: &JournalEntry,
    ) -> Result<(), StorageError> {
        match self.journal.entry(entry.idempotency_key.clone()) {
            Entry::Occupied(slot) => match slot.get().owner {
                Some(owner) if owner != session.id => {
                    Err(StorageError::write_conflict(entry.account_id))
                }
                _ => Err(StorageError::duplicate_key(entry.idempotency_key.as_str())),
            },
            Entry::Vacant(slot) => {
                slot.insert(JournalSlot {
                    entry: entry.clone(),
                    owner: Some(session.id),
                });
                session
                    .appended
                    .push((entry.account_id, entry.idempotency_key.clone()));
                Ok(())
            }
        }
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JournalEntry>, StorageError> {
        Ok(self
            .journal
            .get(key)
            .filter(|slot| slot.owner.is_none())
            .map(|slot| slot.entry.clone()))
    }

    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<JournalEntry>, StorageError> {
        let keys = match self.by_account.get(&account_id) {
            Some(keys) => keys.clone(),
            None => return Ok(Vec::new()),
        };

        Ok(keys
            .iter()
            .filter_map(|key| self.journal.get(key).map(|slot| slot.entry.clone()))
            .collect())
    }
}
