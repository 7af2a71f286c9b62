//! Load runner
//!
//! Wires a request source to the [`WorkerPool`] through the
//! [`TransactionCoordinator`]:
//!
//! ```text
//! RequestGenerator ─┐
//!                   ├─→ unit of work → TransactionCoordinator → Storage
//! replay channel ───┘          ↓
//!                            Tally (succeeded / rejected / replayed / errored)
//! ```
//!
//! A synthetic run ends when its duration elapses; a replay run ends when
//! the replay file is exhausted. Both also end when the caller's
//! cancellation token fires.

use super::config::LoadConfig;
use super::generator::{LoadItem, RequestGenerator};
use crate::core::{Hooks, Storage, TransactionCoordinator, TransactionOutcome};
use crate::types::{ChangeRequest, LedgerError, TransactionType};
use crate::worker::{Flow, PoolSummary, WorkerPool};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transaction ID of the opening deposit written by [`LoadRunner::precreate`]
pub const PRECREATE_TRANSACTION_ID: u64 = 0;

/// Final counts of a load run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Requests applied by this run
    pub succeeded: u64,
    /// Requests declined by the business rules
    pub rejected: u64,
    /// Requests whose idempotency key was already journaled
    pub replayed: u64,
    /// Requests that ended in a storage error
    pub errored: u64,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn total(&self) -> u64 {
        self.succeeded + self.rejected + self.replayed + self.errored
    }

    /// Requests per second over the whole run
    pub fn tps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Outcome counters shared by every worker
#[derive(Debug, Default)]
struct Tally {
    succeeded: AtomicU64,
    rejected: AtomicU64,
    replayed: AtomicU64,
    errored: AtomicU64,
}

impl Tally {
    /// Count one result; storage errors are handed back to the pool
    fn record(&self, result: Result<TransactionOutcome, LedgerError>) -> Result<Flow, LedgerError> {
        match result {
            Ok(TransactionOutcome::Applied(_)) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(TransactionOutcome::Replayed(_)) => {
                self.replayed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(TransactionOutcome::Rejected { .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.errored.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        }
        Ok(Flow::Continue)
    }

    fn report(&self, elapsed: Duration) -> LoadReport {
        LoadReport {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Drives a storage backend with concurrent change requests
pub struct LoadRunner<S> {
    coordinator: TransactionCoordinator<S>,
    config: LoadConfig,
}

impl<S: Storage + 'static> LoadRunner<S> {
    pub fn new(coordinator: TransactionCoordinator<S>, config: LoadConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<S> {
        &self.coordinator
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Open accounts `0..precreate` with the configured initial balance
    ///
    /// Each account gets one deposit under [`PRECREATE_TRANSACTION_ID`], so
    /// running this twice against the same store is a no-op the second
    /// time.
    ///
    /// Every deposit already started runs to completion even when one fails,
    /// so no session is left open; the first error is returned afterwards.
    ///
    /// # Returns
    ///
    /// The number of deposits applied by this call
    pub async fn precreate(&self) -> Result<u64, LedgerError> {
        if self.config.precreate == 0 {
            return Ok(0);
        }

        info!(
            accounts = self.config.precreate,
            initial_balance = %self.config.initial_balance,
            "Pre-creating accounts"
        );

        let concurrency = self.config.threads.max(1);
        let mut results = stream::iter(0..self.config.precreate)
            .map(|account_id| {
                let request = ChangeRequest::new(
                    account_id,
                    PRECREATE_TRANSACTION_ID,
                    TransactionType::Deposit,
                    self.config.initial_balance,
                )
                .with_project(self.config.project.clone());
                async move { self.coordinator.process(&request, Hooks::default()).await }
            })
            .buffer_unordered(concurrency);

        let mut applied = 0;
        let mut first_error = None;
        while let Some(outcome) = results.next().await {
            match outcome {
                Ok(outcome) if outcome.is_applied() => applied += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Pre-creating account failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        info!(applied, "Accounts pre-created");
        Ok(applied)
    }

    /// Generate synthetic requests until the configured duration elapses
    ///
    /// # Returns
    ///
    /// * `Ok(LoadReport)` - The run ended by deadline or cancellation
    /// * `Err(LedgerError)` - The first storage error, when the `Abort` policy stopped the run
    pub async fn run(&self, cancel: CancellationToken) -> Result<LoadReport, LedgerError> {
        let run_cancel = cancel.child_token();
        let deadline = tokio::spawn({
            let run_cancel = run_cancel.clone();
            let duration = self.config.duration;
            async move {
                tokio::select! {
                    _ = run_cancel.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        debug!(?duration, "Deadline reached");
                        run_cancel.cancel();
                    }
                }
            }
        });

        info!(
            operation = %self.config.operation,
            max_accounts = self.config.max_accounts,
            duration = ?self.config.duration,
            "Starting synthetic load"
        );

        let generator = Arc::new(
            RequestGenerator::new(
                self.config.operation,
                self.config.max_accounts,
                self.config.project.clone(),
            ),
        );
        let tally = Arc::new(Tally::default());
        let coordinator = self.coordinator.clone();

        let pool = WorkerPool::new(self.config.pool_config());
        let handle = pool.run(run_cancel.clone(), {
            let tally = Arc::clone(&tally);
            move || {
                let item = generator.next(&mut rand::thread_rng());
                let coordinator = coordinator.clone();
                let tally = Arc::clone(&tally);
                async move {
                    let result = match &item {
                        LoadItem::Request(request) => {
                            coordinator.process(request, Hooks::default()).await
                        }
                        LoadItem::Raw(request, delta) => {
                            coordinator.apply_delta(request, delta).await
                        }
                        LoadItem::Insert(request, delta) => {
                            coordinator.append_journal(request, delta).await
                        }
                    };
                    tally.record(result)
                }
            }
        });

        let summary = handle.wait().await;
        run_cancel.cancel();
        if let Err(e) = deadline.await {
            warn!(error = %e, "Deadline task failed");
        }

        finish(&tally, summary)
    }

    /// Apply every request received on `requests` until the channel closes
    ///
    /// The configured duration does not apply; the run ends when the
    /// source is exhausted or `cancel` fires.
    pub async fn replay(
        &self,
        requests: mpsc::Receiver<ChangeRequest>,
        cancel: CancellationToken,
    ) -> Result<LoadReport, LedgerError> {
        info!("Starting replay");

        let requests = Arc::new(Mutex::new(requests));
        let tally = Arc::new(Tally::default());
        let coordinator = self.coordinator.clone();
        let run_cancel = cancel.child_token();

        let pool = WorkerPool::new(self.config.pool_config());
        let handle = pool.run(run_cancel.clone(), {
            let tally = Arc::clone(&tally);
            let run_cancel = run_cancel.clone();
            move || {
                let requests = Arc::clone(&requests);
                let coordinator = coordinator.clone();
                let tally = Arc::clone(&tally);
                let run_cancel = run_cancel.clone();
                async move {
                    let next = {
                        let mut requests = requests.lock().await;
                        tokio::select! {
                            _ = run_cancel.cancelled() => None,
                            request = requests.recv() => request,
                        }
                    };
                    let Some(request) = next else {
                        return Ok(Flow::Stop);
                    };
                    tally.record(coordinator.process(&request, Hooks::default()).await)
                }
            }
        });

        let summary = handle.wait().await;
        finish(&tally, summary)
    }
}

fn finish(tally: &Tally, summary: PoolSummary) -> Result<LoadReport, LedgerError> {
    let report = tally.report(summary.elapsed);

    info!(
        total = report.total(),
        succeeded = report.succeeded,
        rejected = report.rejected,
        replayed = report.replayed,
        errored = report.errored,
        tps = report.tps().round() as u64,
        "Load run finished"
    );

    match summary.first_error {
        Some(error) if summary.aborted => Err(error),
        _ => Ok(report),
    }
}
