//! Transaction coordination
//!
//! The [`TransactionCoordinator`] drives one change request through
//! idempotency check, rule evaluation and the atomic ledger-plus-journal
//! write:
//!
//! 1. Await the `before_lock` hook, if any
//! 2. Return the journaled entry if the idempotency key was already written
//! 3. Read the account (advisory) and evaluate the rules; a failure is a
//!    [`TransactionOutcome::Rejected`] and touches nothing
//! 4. In one session: upsert the delta under its precondition, append the
//!    journal entry built from the post-mutation state, commit
//! 5. Retry steps 2-4 on transient errors with exponential backoff
//! 6. Await the `after_complete` hook, if any, whatever the result
//!
//! [`TransactionCoordinator::append_journal`] runs the same pipeline with
//! step 3 and the upsert skipped, for journal-only throughput runs.
//!
//! The advisory read never decides correctness: when a decision depends on
//! the prior state, the storage engine re-checks that state in the same
//! atomic step as the increment, and a mismatch comes back as a retried
//! write conflict.

use super::rules;
use super::traits::Storage;
use crate::types::{
    AccountId, AccountLedger, ChangeRequest, FailReason, IdempotencyKey, JournalEntry,
    LedgerDelta, LedgerError, Precondition, StorageError, TransactionEffect,
};
use backon::{ExponentialBuilder, Retryable};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Final result of a coordinated request
///
/// Rule rejections and idempotent replays are normal outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// The effect was applied and journaled by this call
    Applied(JournalEntry),

    /// The request was already journaled; nothing was applied again
    Replayed(JournalEntry),

    /// The business rules declined the request
    Rejected {
        account_id: AccountId,
        reason: FailReason,
    },
}

impl TransactionOutcome {
    pub fn account_id(&self) -> AccountId {
        match self {
            TransactionOutcome::Applied(entry) | TransactionOutcome::Replayed(entry) => {
                entry.account_id
            }
            TransactionOutcome::Rejected { account_id, .. } => *account_id,
        }
    }

    /// Journal entry of an applied or replayed request
    pub fn entry(&self) -> Option<&JournalEntry> {
        match self {
            TransactionOutcome::Applied(entry) | TransactionOutcome::Replayed(entry) => Some(entry),
            TransactionOutcome::Rejected { .. } => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransactionOutcome::Applied(_))
    }
}

/// Per-call injection points
///
/// Each hook is a future awaited at a fixed point of [`process`]; tests use
/// them to force interleavings of concurrent calls.
///
/// [`process`]: TransactionCoordinator::process
#[derive(Default)]
pub struct Hooks {
    before_lock: Option<BoxFuture<'static, ()>>,
    after_complete: Option<BoxFuture<'static, ()>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaited before the idempotency check and the advisory read
    pub fn before_lock(mut self, hook: BoxFuture<'static, ()>) -> Self {
        self.before_lock = Some(hook);
        self
    }

    /// Awaited after the call finished, on success and on error
    pub fn after_complete(mut self, hook: BoxFuture<'static, ()>) -> Self {
        self.after_complete = Some(hook);
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_lock", &self.before_lock.is_some())
            .field("after_complete", &self.after_complete.is_some())
            .finish()
    }
}

/// Backoff applied to transient storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 16,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// How the delta of an attempt is obtained
#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    /// Evaluate the business rules against the current account
    Rules,

    /// Apply the given delta unconditionally
    Raw(&'a LedgerDelta),

    /// Journal the given delta without writing the ledger
    JournalOnly(&'a LedgerDelta),
}

/// Coordinates rule evaluation and the atomic ledger/journal write
///
/// Cheap to clone; clones share the storage backend.
pub struct TransactionCoordinator<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        TransactionCoordinator {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S: Storage> TransactionCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        TransactionCoordinator {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and apply one change request
    ///
    /// # Returns
    ///
    /// * `Ok(Applied)` - The effect was committed together with its journal entry
    /// * `Ok(Replayed)` - The idempotency key was already journaled
    /// * `Ok(Rejected)` - The business rules declined the request
    /// * `Err(RetriesExhausted)` - A transient storage error outlived the retry budget
    /// * `Err(Storage)` - A non-retryable storage failure
    pub async fn process(
        &self,
        request: &ChangeRequest,
        hooks: Hooks,
    ) -> Result<TransactionOutcome, LedgerError> {
        self.run(request, Mutation::Rules, hooks).await
    }

    /// Apply a raw delta, bypassing the business rules
    ///
    /// The write is still journaled under the request's idempotency key,
    /// so replaying the same request does not apply the delta twice.
    pub async fn apply_delta(
        &self,
        request: &ChangeRequest,
        delta: &LedgerDelta,
    ) -> Result<TransactionOutcome, LedgerError> {
        self.run(request, Mutation::Raw(delta), Hooks::default()).await
    }

    /// Append a journal entry for `delta` without touching the ledger
    ///
    /// The entry is written in its own committed session under the
    /// request's idempotency key, with a zero-valued resulting ledger.
    /// Replaying the same request returns `Replayed`.
    pub async fn append_journal(
        &self,
        request: &ChangeRequest,
        delta: &LedgerDelta,
    ) -> Result<TransactionOutcome, LedgerError> {
        self.run(request, Mutation::JournalOnly(delta), Hooks::default()).await
    }

    /// Committed state of one account
    pub async fn ledger(
        &self,
        account_id: AccountId,
    ) -> Result<Option<AccountLedger>, LedgerError> {
        Ok(self.store.get(account_id).await?)
    }

    /// Committed state of every account
    pub async fn ledgers(&self) -> Result<Vec<AccountLedger>, LedgerError> {
        Ok(self.store.all().await?)
    }

    /// Journal of one account, in commit order
    pub async fn journal(&self, account_id: AccountId) -> Result<Vec<JournalEntry>, LedgerError> {
        Ok(self.store.find_by_account(account_id).await?)
    }

    async fn run(
        &self,
        request: &ChangeRequest,
        mutation: Mutation<'_>,
        mut hooks: Hooks,
    ) -> Result<TransactionOutcome, LedgerError> {
        if let Some(hook) = hooks.before_lock.take() {
            hook.await;
        }

        let key = request.idempotency_key();
        let result = (|| async { self.attempt(request, &key, mutation).await })
            .retry(self.retry.backoff())
            .when(|e: &StorageError| e.is_transient())
            .notify(|e: &StorageError, delay: Duration| {
                debug!(
                    account = request.account_id,
                    tx = request.transaction_id,
                    error = %e,
                    delay = ?delay,
                    "Transient storage error, retrying"
                );
            })
            .await;

        let result = match result {
            Ok(outcome) => {
                log_outcome(request, &outcome);
                Ok(outcome)
            }
            Err(e) if e.is_transient() => {
                warn!(
                    account = request.account_id,
                    tx = request.transaction_id,
                    error = %e,
                    "Retries exhausted"
                );
                Err(LedgerError::retries_exhausted(request.account_id, e))
            }
            Err(e) => {
                warn!(
                    account = request.account_id,
                    tx = request.transaction_id,
                    error = %e,
                    "Storage failure"
                );
                Err(LedgerError::Storage(e))
            }
        };

        if let Some(hook) = hooks.after_complete.take() {
            hook.await;
        }

        result
    }

    async fn attempt(
        &self,
        request: &ChangeRequest,
        key: &IdempotencyKey,
        mutation: Mutation<'_>,
    ) -> Result<TransactionOutcome, StorageError> {
        if let Some(existing) = self.store.find_by_key(key).await? {
            return Ok(TransactionOutcome::Replayed(existing));
        }

        let (delta, precondition) = match mutation {
            Mutation::Rules => {
                let previous = self.store.get(request.account_id).await?;
                match rules::evaluate(previous.as_ref(), request) {
                    TransactionEffect::Success {
                        delta,
                        precondition,
                    } => (delta, precondition),
                    TransactionEffect::Fail { reason } => {
                        return Ok(TransactionOutcome::Rejected {
                            account_id: request.account_id,
                            reason,
                        });
                    }
                }
            }
            Mutation::Raw(delta) | Mutation::JournalOnly(delta) => (*delta, Precondition::None),
        };
        let touches_ledger = !matches!(mutation, Mutation::JournalOnly(_));

        let mut session = self.store.start_session().await?;
        match self
            .write(&mut session, request, delta, &precondition, touches_ledger)
            .await
        {
            Ok(entry) => {
                self.store.commit(session).await?;
                Ok(TransactionOutcome::Applied(entry))
            }
            Err(StorageError::DuplicateKey { .. }) => {
                self.abort(session).await;
                match self.store.find_by_key(key).await? {
                    Some(existing) => Ok(TransactionOutcome::Replayed(existing)),
                    // The competing writer is not visible yet; try again
                    None => Err(StorageError::write_conflict(request.account_id)),
                }
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn write(
        &self,
        session: &mut S::Session,
        request: &ChangeRequest,
        delta: LedgerDelta,
        precondition: &Precondition,
        touches_ledger: bool,
    ) -> Result<JournalEntry, StorageError> {
        let ledger = if touches_ledger {
            self.store
                .upsert(session, request.account_id, &delta, precondition)
                .await?
        } else {
            AccountLedger::new(request.account_id)
        };
        let entry = JournalEntry::record(request, delta, ledger);
        self.store.append(session, &entry).await?;
        Ok(entry)
    }

    async fn abort(&self, session: S::Session) {
        if let Err(e) = self.store.abort(session).await {
            warn!(error = %e, "Failed to abort session");
        }
    }
}

fn log_outcome(request: &ChangeRequest, outcome: &TransactionOutcome) {
    match outcome {
        TransactionOutcome::Applied(entry) => debug!(
            account = request.account_id,
            tx = request.transaction_id,
            balance = %entry.ledger.balance,
            "Applied"
        ),
        TransactionOutcome::Replayed(_) => debug!(
            account = request.account_id,
            tx = request.transaction_id,
            "Replayed"
        ),
        TransactionOutcome::Rejected { reason, .. } => debug!(
            account = request.account_id,
            tx = request.transaction_id,
            reason = %reason,
            "Rejected"
        ),
    }
}
