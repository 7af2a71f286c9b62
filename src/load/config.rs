//! Load-run configuration

use super::generator::Operation;
use crate::types::DEFAULT_PROJECT;
use crate::worker::{ErrorPolicy, PoolConfig};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::warn;

/// Configuration of one load run
///
/// Zero values passed to [`LoadConfig::new`] fall back to the defaults with
/// a warning, like the pool configuration does.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    /// Concurrent workers (default: CPU cores)
    pub threads: usize,

    /// Wall-clock bound of a synthetic run (default: 10 s)
    pub duration: Duration,

    /// Accounts are drawn from `0..max_accounts` (default: 100 000)
    pub max_accounts: u64,

    pub operation: Operation,

    /// Opening deposit of each pre-created account
    pub initial_balance: Decimal,

    /// Number of accounts to open before the run, starting at 0
    pub precreate: u64,

    /// Project tag of generated requests
    pub project: String,

    pub error_policy: ErrorPolicy,

    pub report_interval: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            duration: Duration::from_secs(10),
            max_accounts: 100_000,
            operation: Operation::default(),
            initial_balance: Decimal::ZERO,
            precreate: 0,
            project: DEFAULT_PROJECT.to_string(),
            error_policy: ErrorPolicy::default(),
            report_interval: Duration::from_secs(1),
        }
    }
}

impl LoadConfig {
    /// Create a LoadConfig, replacing zero sizes with the defaults
    pub fn new(threads: usize, duration: Duration, max_accounts: u64) -> Self {
        let default = Self::default();

        let threads = if threads == 0 {
            warn!(default = default.threads, "Invalid threads (0), using default");
            default.threads
        } else {
            threads
        };

        let duration = if duration.is_zero() {
            warn!(default = ?default.duration, "Invalid duration (0), using default");
            default.duration
        } else {
            duration
        };

        let max_accounts = if max_accounts == 0 {
            warn!(
                default = default.max_accounts,
                "Invalid max accounts (0), using default"
            );
            default.max_accounts
        } else {
            max_accounts
        };

        Self {
            threads,
            duration,
            max_accounts,
            ..default
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_precreate(mut self, accounts: u64, initial_balance: Decimal) -> Self {
        self.precreate = accounts;
        self.initial_balance = initial_balance;
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn with_report_interval(mut self, report_interval: Duration) -> Self {
        self.report_interval = report_interval;
        self
    }

    /// Worker pool settings of this run
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.threads, self.error_policy, self.report_interval)
    }
}
