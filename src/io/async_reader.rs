//! Asynchronous CSV reader for replay files
//!
//! Streams change requests out of a CSV file with constant memory usage.
//!
//! # Architecture
//!
//! ```text
//! replay.csv → AsyncReader → batches of ChangeRequests → mpsc channel → workers
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{ChangeRequest, LedgerError};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, warn};

/// Asynchronous CSV reader
///
/// Provides a batch reading interface over change requests. Invalid rows
/// are logged and skipped.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self { csv_reader }
    }

    /// Read up to `batch_size` change requests
    ///
    /// Returns an empty vector at end of file.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<ChangeRequest> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(csv_record)) => match convert_csv_record(csv_record) {
                    Ok(request) => batch.push(request),
                    Err(e) => warn!(error = %e, "Skipping replay record"),
                },
                Some(Err(e)) => warn!(error = %e, "CSV parse error"),
                None => break,
            }
        }

        batch
    }

    /// Forward every request to `sender` until end of file
    ///
    /// Stops early without error if the receiving side is closed. Returns
    /// the number of requests sent.
    pub async fn forward(
        mut self,
        sender: mpsc::Sender<ChangeRequest>,
        batch_size: usize,
    ) -> u64 {
        let mut sent = 0;
        loop {
            let batch = self.read_batch(batch_size).await;
            if batch.is_empty() {
                break;
            }
            for request in batch {
                if sender.send(request).await.is_err() {
                    debug!(sent, "Replay receiver closed");
                    return sent;
                }
                sent += 1;
            }
        }
        sent
    }
}

/// Open a replay file and stream its requests into a bounded channel
///
/// The reader runs on its own task; the channel closes at end of file.
pub async fn spawn_replay(
    path: &Path,
    capacity: usize,
) -> Result<mpsc::Receiver<ChangeRequest>, LedgerError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| LedgerError::IoError {
        message: format!("Failed to open file '{}': {}", path.display(), e),
    })?;
    let reader = AsyncReader::new(file.compat());
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);

    tokio::spawn(async move {
        let sent = reader.forward(sender, capacity).await;
        debug!(sent, "Replay file exhausted");
    });

    Ok(receiver)
}
