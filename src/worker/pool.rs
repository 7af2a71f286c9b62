//! Fixed-size pool of workers driving a unit of work until cancelled
//!
//! # Architecture
//!
//! ```text
//! WorkerPool::run
//!     ├── N worker tasks     (loop: check cancel, unit_of_work(), count)
//!     ├── supervisor task    (drains the error channel, applies ErrorPolicy)
//!     └── reporter task      (sums counters every interval, publishes samples)
//! ```
//!
//! Workers share nothing but the unit of work and the cancellation token.
//! Each owns one `AtomicU64` counter that only it writes; the reporter reads
//! them all without locking.

use crate::types::LedgerError;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a worker does after a unit of work failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Cancel the whole run
    Abort,

    /// Count the error and continue
    #[default]
    Skip,

    /// Sleep for `delay`, then continue
    Backoff { delay: Duration },
}

impl ErrorPolicy {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);
}

impl FromStr for ErrorPolicy {
    type Err = LedgerError;

    /// Parses `abort`, `skip`, `backoff` or `backoff:<millis>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.split_once(':') {
            None => match lowered.as_str() {
                "abort" => Ok(ErrorPolicy::Abort),
                "skip" => Ok(ErrorPolicy::Skip),
                "backoff" => Ok(ErrorPolicy::Backoff {
                    delay: ErrorPolicy::DEFAULT_BACKOFF,
                }),
                _ => Err(LedgerError::invalid_request(format!(
                    "unknown error policy '{}'",
                    s
                ))),
            },
            Some(("backoff", millis)) => millis
                .trim()
                .parse::<u64>()
                .map(|ms| ErrorPolicy::Backoff {
                    delay: Duration::from_millis(ms),
                })
                .map_err(|_| {
                    LedgerError::invalid_request(format!("invalid backoff delay '{}'", millis))
                }),
            Some(_) => Err(LedgerError::invalid_request(format!(
                "unknown error policy '{}'",
                s
            ))),
        }
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub threads: usize,
    pub error_policy: ErrorPolicy,
    /// Period of the throughput reporter
    pub report_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            error_policy: ErrorPolicy::default(),
            report_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Create a PoolConfig, replacing zero values with the defaults
    pub fn new(threads: usize, error_policy: ErrorPolicy, report_interval: Duration) -> Self {
        let default = Self::default();

        let threads = if threads == 0 {
            warn!(
                default = default.threads,
                "Invalid thread count (0), using default"
            );
            default.threads
        } else {
            threads
        };

        let report_interval = if report_interval.is_zero() {
            warn!(
                default = ?default.report_interval,
                "Invalid report interval (0), using default"
            );
            default.report_interval
        } else {
            report_interval
        };

        Self {
            threads,
            error_policy,
            report_interval,
        }
    }
}

/// Whether a worker should keep calling the unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// One unit completed; count it and go on
    Continue,

    /// The work source is exhausted; exit this worker without counting
    Stop,
}

/// Aggregate throughput at one reporter tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThroughputSample {
    /// Units completed since the run started
    pub total: u64,
    /// Units completed during the last interval
    pub delta: u64,
    /// `delta` scaled to one second
    pub per_second: f64,
    pub elapsed: Duration,
}

/// Final statistics of a run
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSummary {
    /// Units completed across all workers
    pub total: u64,
    /// Units completed by each worker, by worker index
    pub per_worker: Vec<u64>,
    pub elapsed: Duration,
    /// Units that returned an error
    pub errors: u64,
    /// First error seen by the supervisor
    pub first_error: Option<LedgerError>,
    /// Whether the run was cancelled by the `Abort` policy
    pub aborted: bool,
}

impl PoolSummary {
    /// Average completed units per second over the whole run
    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct WorkerError {
    worker: usize,
    error: LedgerError,
}

#[derive(Debug, Default)]
struct SupervisorReport {
    errors: u64,
    first_error: Option<LedgerError>,
    aborted: bool,
}

/// Pool of identical workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Start the workers, the supervisor and the reporter
    ///
    /// Every worker loops until `cancel` fires, the unit of work returns
    /// [`Flow::Stop`], or an error hits the `Abort` policy. Cancellation is
    /// checked once per iteration; a unit already running is never
    /// interrupted. Must be called within a tokio runtime.
    pub fn run<F, Fut>(&self, cancel: CancellationToken, unit_of_work: F) -> PoolHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow, LedgerError>> + Send + 'static,
    {
        let threads = self.config.threads.max(1);
        let unit_of_work = Arc::new(unit_of_work);
        let counters: Arc<[AtomicU64]> = (0..threads).map(|_| AtomicU64::new(0)).collect();
        let (error_tx, error_rx) = mpsc::channel(threads * 4);
        let started = Instant::now();

        info!(threads, policy = ?self.config.error_policy, "Starting worker pool");

        let workers = (0..threads)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&unit_of_work),
                    Arc::clone(&counters),
                    error_tx.clone(),
                    cancel.clone(),
                    self.config.error_policy,
                ))
            })
            .collect();
        drop(error_tx);

        let supervisor = tokio::spawn(supervise(
            error_rx,
            cancel.clone(),
            self.config.error_policy,
        ));

        let (sample_tx, sample_rx) = watch::channel(ThroughputSample::default());
        let reporter_stop = CancellationToken::new();
        let reporter = tokio::spawn(report(
            Arc::clone(&counters),
            sample_tx,
            self.config.report_interval,
            started,
            cancel,
            reporter_stop.clone(),
        ));

        PoolHandle {
            workers,
            supervisor,
            reporter,
            reporter_stop,
            counters,
            samples: sample_rx,
            started,
        }
    }
}

/// Handle of a running pool
#[derive(Debug)]
pub struct PoolHandle {
    workers: Vec<JoinHandle<()>>,
    supervisor: JoinHandle<SupervisorReport>,
    reporter: JoinHandle<()>,
    reporter_stop: CancellationToken,
    counters: Arc<[AtomicU64]>,
    samples: watch::Receiver<ThroughputSample>,
    started: Instant,
}

impl PoolHandle {
    /// Receiver of the reporter's throughput samples
    pub fn samples(&self) -> watch::Receiver<ThroughputSample> {
        self.samples.clone()
    }

    /// Wait for every worker to exit and collect the statistics
    pub async fn wait(self) -> PoolSummary {
        let mut panicked = 0;
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed");
                panicked += 1;
            }
        }
        let elapsed = self.started.elapsed();

        let report = match self.supervisor.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Supervisor task failed");
                SupervisorReport::default()
            }
        };

        self.reporter_stop.cancel();
        if let Err(e) = self.reporter.await {
            warn!(error = %e, "Reporter task failed");
        }

        let per_worker: Vec<u64> = self
            .counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect();

        PoolSummary {
            total: per_worker.iter().sum(),
            per_worker,
            elapsed,
            errors: report.errors + panicked,
            first_error: report.first_error,
            aborted: report.aborted,
        }
    }
}

fn sum(counters: &[AtomicU64]) -> u64 {
    counters
        .iter()
        .map(|counter| counter.load(Ordering::Relaxed))
        .sum()
}

async fn worker_loop<F, Fut>(
    index: usize,
    unit_of_work: Arc<F>,
    counters: Arc<[AtomicU64]>,
    errors: mpsc::Sender<WorkerError>,
    cancel: CancellationToken,
    policy: ErrorPolicy,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, LedgerError>> + Send + 'static,
{
    while !cancel.is_cancelled() {
        match unit_of_work().await {
            Ok(Flow::Continue) => {
                counters[index].fetch_add(1, Ordering::Relaxed);
            }
            Ok(Flow::Stop) => break,
            Err(error) => {
                if errors
                    .send(WorkerError {
                        worker: index,
                        error,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                match policy {
                    ErrorPolicy::Abort => break,
                    ErrorPolicy::Skip => {}
                    ErrorPolicy::Backoff { delay } => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
    debug!(worker = index, "Worker stopped");
}

async fn supervise(
    mut errors: mpsc::Receiver<WorkerError>,
    cancel: CancellationToken,
    policy: ErrorPolicy,
) -> SupervisorReport {
    let mut report = SupervisorReport::default();

    while let Some(WorkerError { worker, error }) = errors.recv().await {
        report.errors += 1;
        warn!(worker, error = %error, "Unit of work failed");

        if report.first_error.is_none() {
            report.first_error = Some(error);
        }
        if policy == ErrorPolicy::Abort && !report.aborted {
            report.aborted = true;
            cancel.cancel();
        }
    }

    report
}

async fn report(
    counters: Arc<[AtomicU64]>,
    samples: watch::Sender<ThroughputSample>,
    period: Duration,
    started: Instant,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut last_total = 0;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let total = sum(&counters);
        let now = Instant::now();
        let delta = total.saturating_sub(last_total);
        let window = now.duration_since(last_tick).as_secs_f64();
        let per_second = if window > 0.0 { delta as f64 / window } else { 0.0 };

        info!(total, per_second = per_second.round() as u64, "Throughput");
        samples.send_replace(ThroughputSample {
            total,
            delta,
            per_second,
            elapsed: started.elapsed(),
        });

        last_total = total;
        last_tick = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(threads: usize, error_policy: ErrorPolicy) -> PoolConfig {
        PoolConfig::new(threads, error_policy, Duration::from_millis(10))
    }

    /// A unit of work that completes `limit` units in total, then stops
    fn bounded(
        limit: u64,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Result<Flow, LedgerError>> {
        let issued = Arc::new(AtomicU64::new(0));
        move || {
            let issued = Arc::clone(&issued);
            Box::pin(async move {
                tokio::task::yield_now().await;
                if issued.fetch_add(1, Ordering::SeqCst) < limit {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Stop)
                }
            })
        }
    }

    #[rstest]
    #[case::abort("abort", ErrorPolicy::Abort)]
    #[case::skip("Skip", ErrorPolicy::Skip)]
    #[case::backoff("backoff", ErrorPolicy::Backoff { delay: ErrorPolicy::DEFAULT_BACKOFF })]
    #[case::backoff_millis("backoff:250", ErrorPolicy::Backoff { delay: Duration::from_millis(250) })]
    fn test_error_policy_parsing(#[case] input: &str, #[case] expected: ErrorPolicy) {
        assert_eq!(input.parse::<ErrorPolicy>().unwrap(), expected);
    }

    #[rstest]
    #[case::unknown("retry")]
    #[case::bad_delay("backoff:soon")]
    #[case::bad_prefix("skip:10")]
    fn test_error_policy_parsing_rejects(#[case] input: &str) {
        assert!(input.parse::<ErrorPolicy>().is_err());
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = PoolConfig::new(0, ErrorPolicy::Abort, Duration::ZERO);

        assert_eq!(config.threads, num_cpus::get());
        assert_eq!(config.report_interval, Duration::from_secs(1));
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_until_source_exhausted() {
        let pool = WorkerPool::new(config(4, ErrorPolicy::Skip));

        let summary = pool.run(CancellationToken::new(), bounded(1000)).wait().await;

        assert_eq!(summary.total, 1000);
        assert_eq!(summary.per_worker.len(), 4);
        assert_eq!(summary.per_worker.iter().sum::<u64>(), 1000);
        assert_eq!(summary.errors, 0);
        assert!(!summary.aborted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_stops_workers() {
        let pool = WorkerPool::new(config(3, ErrorPolicy::Skip));
        let cancel = CancellationToken::new();

        let handle = pool.run(cancel.clone(), || async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(Flow::Continue)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let summary = handle.wait().await;

        assert!(summary.total > 0);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_policy_cancels_run() {
        let pool = WorkerPool::new(config(2, ErrorPolicy::Abort));
        let calls = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let handle = pool.run(cancel.clone(), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if calls.fetch_add(1, Ordering::SeqCst) == 5 {
                        Err(LedgerError::invalid_request("boom"))
                    } else {
                        Ok(Flow::Continue)
                    }
                }
            }
        });
        let summary = handle.wait().await;

        assert!(summary.aborted);
        assert!(cancel.is_cancelled());
        assert_eq!(summary.errors, 1);
        assert_eq!(
            summary.first_error,
            Some(LedgerError::invalid_request("boom"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_skip_policy_counts_errors() {
        let pool = WorkerPool::new(config(2, ErrorPolicy::Skip));
        let calls = Arc::new(AtomicU64::new(0));

        let summary = pool
            .run(CancellationToken::new(), {
                let calls = Arc::clone(&calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        let call = calls.fetch_add(1, Ordering::SeqCst);
                        if call >= 20 {
                            Ok(Flow::Stop)
                        } else if call % 2 == 0 {
                            Err(LedgerError::invalid_request("odd one out"))
                        } else {
                            Ok(Flow::Continue)
                        }
                    }
                }
            })
            .wait()
            .await;

        assert_eq!(summary.errors, 10);
        assert_eq!(summary.total, 10);
        assert!(!summary.aborted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reporter_publishes_samples() {
        let pool = WorkerPool::new(config(2, ErrorPolicy::Skip));
        let cancel = CancellationToken::new();

        let handle = pool.run(cancel.clone(), || async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(Flow::Continue)
        });
        let mut samples = handle.samples();
        samples.changed().await.unwrap();
        samples.changed().await.unwrap();
        let sample = *samples.borrow();
        cancel.cancel();
        let summary = handle.wait().await;

        assert!(sample.total > 0);
        assert!(sample.total <= summary.total);
        assert!(sample.elapsed > Duration::ZERO);
    }
}
