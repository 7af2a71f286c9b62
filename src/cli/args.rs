use crate::load::{LoadConfig, Operation};
use crate::worker::ErrorPolicy;
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Drive a financial ledger with concurrent balance changes
#[derive(Parser, Debug)]
#[command(name = "ledger-bench")]
#[command(about = "Load-test a financial ledger with concurrent balance changes", long_about = None)]
pub struct CliArgs {
    /// Number of concurrent workers
    #[arg(
        long = "threads",
        value_name = "COUNT",
        help = "Number of concurrent workers (default: CPU cores)"
    )]
    pub threads: Option<usize>,

    /// Wall-clock duration of a synthetic run, in seconds
    #[arg(
        long = "duration",
        value_name = "SECONDS",
        default_value_t = 10,
        help = "Duration of a synthetic run in seconds (ignored with --replay)"
    )]
    pub duration: u64,

    /// Upper bound (exclusive) of generated account IDs
    #[arg(long = "max-accounts", value_name = "COUNT", default_value_t = 100_000)]
    pub max_accounts: u64,

    /// Kind of synthetic load
    #[arg(
        long = "operation",
        value_name = "OPERATION",
        default_value = "all",
        help = "all, deposit, withdraw, transfer, small, zero, squash, raw or insert"
    )]
    pub operation: Operation,

    /// Opening balance of pre-created accounts
    #[arg(long = "initial-balance", value_name = "AMOUNT", default_value = "0")]
    pub initial_balance: Decimal,

    /// Number of accounts to open before the run
    #[arg(long = "precreate", value_name = "COUNT", default_value_t = 0)]
    pub precreate: u64,

    /// Project tag of generated requests
    #[arg(long = "project", value_name = "PROJECT", default_value = "default")]
    pub project: String,

    /// What a worker does after a storage error
    #[arg(
        long = "on-error",
        value_name = "POLICY",
        default_value = "skip",
        help = "abort, skip, backoff or backoff:<millis>"
    )]
    pub on_error: ErrorPolicy,

    /// Throughput report period, in milliseconds
    #[arg(long = "report-interval", value_name = "MILLIS")]
    pub report_interval: Option<u64>,

    /// Replay change requests from a CSV file instead of generating them
    #[arg(long = "replay", value_name = "CSV")]
    pub replay: Option<PathBuf>,

    /// Write the run report to this CSV file
    #[arg(long = "report-csv", value_name = "PATH")]
    pub report_csv: Option<PathBuf>,

    /// Write the final ledger rows to this CSV file
    #[arg(long = "ledger-csv", value_name = "PATH")]
    pub ledger_csv: Option<PathBuf>,

    /// Write the journal to this CSV file
    #[arg(long = "journal-csv", value_name = "PATH")]
    pub journal_csv: Option<PathBuf>,

    /// Storage backend
    #[arg(long = "backend", value_name = "BACKEND", default_value = "memory")]
    pub backend: BackendType,

    /// MongoDB connection string (mongo backend only)
    #[arg(
        long = "mongo-uri",
        value_name = "URI",
        default_value = "mongodb://localhost:27017/?replicaSet=rs0"
    )]
    pub mongo_uri: String,

    /// MongoDB database name (mongo backend only)
    #[arg(long = "mongo-db", value_name = "NAME", default_value = "ledger")]
    pub mongo_db: String,

    /// Collection of ledger rows (mongo backend only)
    #[arg(long = "ledger-collection", value_name = "NAME", default_value = "balance")]
    pub ledger_collection: String,

    /// Collection of journal entries (mongo backend only)
    #[arg(long = "journal-collection", value_name = "NAME", default_value = "journal")]
    pub journal_collection: String,
}

/// Available storage backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendType {
    /// In-process store, state is lost on exit
    Memory,
    /// MongoDB replica set (requires the `mongodb` feature)
    Mongo,
}

impl CliArgs {
    /// Create a LoadConfig from CLI arguments
    ///
    /// Zero values fall back to the defaults with a warning.
    pub fn to_load_config(&self) -> LoadConfig {
        let default = LoadConfig::default();
        let report_interval = self
            .report_interval
            .map(Duration::from_millis)
            .unwrap_or(default.report_interval);

        LoadConfig::new(
            self.threads.unwrap_or(default.threads),
            Duration::from_secs(self.duration),
            self.max_accounts,
        )
        .with_operation(self.operation)
        .with_precreate(self.precreate, self.initial_balance)
        .with_project(self.project.clone())
        .with_error_policy(self.on_error)
        .with_report_interval(report_interval)
    }

    #[cfg(feature = "mongodb")]
    pub fn to_mongo_config(&self) -> crate::store::MongoConfig {
        crate::store::MongoConfig {
            uri: self.mongo_uri.clone(),
            database: self.mongo_db.clone(),
            ledger_collection: self.ledger_collection.clone(),
            journal_collection: self.journal_collection.clone(),
        }
    }
}
