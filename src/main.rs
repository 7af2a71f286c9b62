//! Ledger Bench CLI
//!
//! Load-tests a ledger backend with concurrent balance changes.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --threads 16 --duration 30 --operation all
//! cargo run -- --precreate 1000 --initial-balance 500 --operation withdraw --max-accounts 1000
//! cargo run -- --replay requests.csv --ledger-csv ledger.csv --journal-csv journal.csv
//! cargo run --features mongodb -- --backend mongo --mongo-uri mongodb://localhost:27017/?replicaSet=rs0
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` level. Ctrl-C
//! stops the workers after their current request.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (backend unreachable, replay file not readable, aborted run, etc.)

use ledger_bench::cli::{self, BackendType, CliArgs};
use ledger_bench::core::{Storage, TransactionCoordinator};
use ledger_bench::io::{spawn_replay, write_journal_csv, write_ledgers_csv, write_report_csv};
use ledger_bench::load::{LoadConfig, LoadRunner};
use ledger_bench::store::MemoryStore;
use ledger_bench::types::LedgerError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Bound of the channel between the replay reader and the workers
const REPLAY_CHANNEL_CAPACITY: usize = 1024;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let config = args.to_load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(&args, config)) {
        error!(error = %e, "Load run failed");
        process::exit(1);
    }
}

async fn run(args: &CliArgs, config: LoadConfig) -> Result<(), LedgerError> {
    match args.backend {
        BackendType::Memory => drive(Arc::new(MemoryStore::new()), args, config).await,
        #[cfg(feature = "mongodb")]
        BackendType::Mongo => {
            let store = ledger_bench::store::MongoStore::connect(&args.to_mongo_config()).await?;
            drive(Arc::new(store), args, config).await
        }
        #[cfg(not(feature = "mongodb"))]
        BackendType::Mongo => Err(LedgerError::invalid_request(
            "the mongo backend requires building with the `mongodb` feature",
        )),
    }
}

async fn drive<S: Storage + 'static>(
    store: Arc<S>,
    args: &CliArgs,
    config: LoadConfig,
) -> Result<(), LedgerError> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping workers");
                cancel.cancel();
            }
        }
    });

    let runner = LoadRunner::new(TransactionCoordinator::new(store), config);
    runner.precreate().await?;

    let report = match &args.replay {
        Some(path) => {
            let requests = spawn_replay(path, REPLAY_CHANNEL_CAPACITY).await?;
            runner.replay(requests, cancel).await?
        }
        None => runner.run(cancel).await?,
    };

    if let Some(path) = &args.report_csv {
        write_file(path, |output| write_report_csv(&report, output))?;
    }

    if args.ledger_csv.is_none() && args.journal_csv.is_none() {
        return Ok(());
    }

    let coordinator = runner.coordinator();
    let mut ledgers = coordinator.ledgers().await?;
    ledgers.sort_by_key(|ledger| ledger.account_id);

    if let Some(path) = &args.ledger_csv {
        write_file(path, |output| write_ledgers_csv(&ledgers, output))?;
        info!(accounts = ledgers.len(), path = %path.display(), "Ledger exported");
    }

    if let Some(path) = &args.journal_csv {
        let mut entries = Vec::new();
        for ledger in &ledgers {
            entries.extend(coordinator.journal(ledger.account_id).await?);
        }
        write_file(path, |output| write_journal_csv(&entries, output))?;
        info!(entries = entries.len(), path = %path.display(), "Journal exported");
    }

    Ok(())
}

fn write_file(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> Result<(), LedgerError>,
) -> Result<(), LedgerError> {
    let file = File::create(path).map_err(|e| LedgerError::IoError {
        message: format!("Failed to create file '{}': {}", path.display(), e),
    })?;
    let mut output = BufWriter::new(file);
    write(&mut output)?;
    output.flush()?;
    Ok(())
}
