use super::{SourceOffset, SourcePartition, SqliteOffsetStore};
use crate::stop::StopSignal;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Lower bound for the flush loop period; `interval` rejects zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Asynchronous offset committer.
///
/// Offsets are staged once the sink has accepted the matching record and
/// are written to the durable store in batches by [`run_flush_loop`]. Poll
/// tasks never wait on a flush; they rely on their own read-your-writes
/// cache until the value shows up in the store.
///
/// [`run_flush_loop`]: OffsetWriter::run_flush_loop
pub struct OffsetWriter {
    store: Arc<SqliteOffsetStore>,
    /// Latest staged offset per partition, not yet flushed
    staged: Mutex<HashMap<SourcePartition, SourceOffset>>,
    flush_timeout: Duration,
}

impl OffsetWriter {
    pub fn new(store: Arc<SqliteOffsetStore>, flush_timeout: Duration) -> Self {
        Self {
            store,
            staged: Mutex::new(HashMap::new()),
            flush_timeout,
        }
    }

    /// Stages an offset for the next flush. A later stage for the same
    /// partition replaces the earlier one.
    pub fn stage(&self, partition: SourcePartition, offset: SourceOffset) {
        self.staged.lock().unwrap().insert(partition, offset);
    }

    pub fn staged_len(&self) -> usize {
        self.staged.lock().unwrap().len()
    }

    /// Writes all staged offsets to the store.
    ///
    /// On failure or timeout the batch is staged again, except for
    /// partitions that received a newer offset in the meantime.
    ///
    /// # Returns
    /// Number of offsets written
    pub async fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.staged.lock().unwrap());
        if batch.is_empty() {
            return Ok(0);
        }

        let store = Arc::clone(&self.store);
        let to_write = batch.clone();
        let write = tokio::task::spawn_blocking(move || store.write_batch(&to_write));

        match tokio::time::timeout(self.flush_timeout, write).await {
            Ok(Ok(Ok(written))) => {
                debug!(written = written, "Flushed offsets");
                Ok(written)
            }
            Ok(Ok(Err(e))) => {
                self.restage(batch);
                Err(e.context("Failed to flush offsets"))
            }
            Ok(Err(join_err)) => {
                self.restage(batch);
                Err(anyhow!("Offset flush task failed: {}", join_err))
            }
            Err(_) => {
                self.restage(batch);
                Err(anyhow!(
                    "Offset flush timed out after {} ms",
                    self.flush_timeout.as_millis()
                ))
            }
        }
    }

    fn restage(&self, batch: HashMap<SourcePartition, SourceOffset>) {
        let mut staged = self.staged.lock().unwrap();
        for (partition, offset) in batch {
            staged.entry(partition).or_insert(offset);
        }
    }

    /// Flushes staged offsets every `flush_interval` until stopped, then
    /// performs one last flush.
    pub async fn run_flush_loop(self: Arc<Self>, flush_interval: Duration, mut stop: StopSignal) {
        info!(
            interval_ms = flush_interval.as_millis() as u64,
            timeout_ms = self.flush_timeout.as_millis() as u64,
            "Starting offset flush loop"
        );

        let mut timer = interval(flush_interval.max(MIN_FLUSH_INTERVAL));
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = stop.stopped() => break,
            }

            if let Err(e) = self.flush().await {
                error!(error = %e, "Offset flush failed, will retry");
            }
        }

        match self.flush().await {
            Ok(written) => info!(written = written, "Final offset flush complete"),
            Err(e) => error!(error = %e, "Final offset flush failed"),
        }
    }
}
