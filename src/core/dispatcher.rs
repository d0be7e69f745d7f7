use crate::core::writer::BatchWriter;
use crate::core::{Batch, BatchErrorKind, DestinationStore, RunSummary, WriteResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub max_workers: usize,
    pub worker_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

/// Runs one writer task per batch, at most `max_workers` at a time.
///
/// The dispatcher is the only owner of the [`RunSummary`]; workers hand back
/// their [`WriteResult`] through the join set and never touch it directly.
pub struct Dispatcher<D: DestinationStore + ?Sized + 'static> {
    writer: Arc<BatchWriter<D>>,
    options: DispatchOptions,
    permits: Arc<Semaphore>,
    workers: JoinSet<WriteResult>,
    in_flight: HashMap<Id, (usize, usize)>,
    next_batch_id: usize,
    summary: RunSummary,
}

impl<D: DestinationStore + ?Sized + 'static> Dispatcher<D> {
    pub fn new(writer: Arc<BatchWriter<D>>, options: DispatchOptions) -> Self {
        let max_workers = options.max_workers.max(1);
        Self {
            writer,
            options: DispatchOptions {
                max_workers,
                ..options
            },
            permits: Arc::new(Semaphore::new(max_workers)),
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
            next_batch_id: 1,
            summary: RunSummary::new(),
        }
    }

    /// Queues `batch` behind the pool bound and starts its worker. Returns the batch id.
    pub async fn dispatch(&mut self, batch: Batch) -> usize {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.summary.batch_count += 1;
        let items = batch.len();

        // The semaphore is never closed, so acquire only fails if it were.
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.summary.absorb(WriteResult::failed(
                    batch_id,
                    items,
                    BatchErrorKind::Aborted,
                    "worker pool closed".to_string(),
                ));
                return batch_id;
            }
        };

        let writer = self.writer.clone();
        let timeout = self.options.worker_timeout;
        let handle = self.workers.spawn(async move {
            let _permit = permit;
            match tokio::time::timeout(timeout, writer.write(batch_id, batch)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(batch_id, items, "⌛ Batch timed out after {:?}", timeout);
                    WriteResult {
                        duration_ms: timeout.as_millis() as u64,
                        ..WriteResult::failed(
                            batch_id,
                            items,
                            BatchErrorKind::Timeout,
                            format!("worker exceeded {:?}; items neither confirmed nor retried", timeout),
                        )
                    }
                }
            }
        });
        self.in_flight.insert(handle.id(), (batch_id, items));
        tracing::debug!(batch_id, items, in_flight = self.in_flight.len(), "🚀 Dispatched batch");

        self.harvest_completed();
        batch_id
    }

    pub fn record_page(&mut self) {
        self.summary.pages_read += 1;
    }

    pub fn record_scanned(&mut self, records: usize) {
        self.summary.records_scanned += records;
    }

    pub fn record_skipped(&mut self, records: usize) {
        self.summary.records_skipped += records;
    }

    pub fn mark_cancelled(&mut self) {
        self.summary.cancelled = true;
    }

    /// Waits for every outstanding worker, then closes and returns the summary.
    pub async fn finish(mut self) -> RunSummary {
        while let Some(joined) = self.workers.join_next_with_id().await {
            self.settle(joined);
        }
        debug_assert!(self.in_flight.is_empty());

        self.summary.close();
        self.summary
    }

    /// Dispatches every batch in order and waits for all of them.
    pub async fn run<I>(mut self, batches: I) -> RunSummary
    where
        I: IntoIterator<Item = Batch>,
    {
        for batch in batches {
            self.dispatch(batch).await;
        }
        self.finish().await
    }

    fn harvest_completed(&mut self) {
        while let Some(joined) = self.workers.try_join_next_with_id() {
            self.settle(joined);
        }
    }

    fn settle(&mut self, joined: Result<(Id, WriteResult), JoinError>) {
        match joined {
            Ok((id, result)) => {
                self.in_flight.remove(&id);
                self.summary.absorb(result);
            }
            Err(e) => {
                let (batch_id, items) = self.in_flight.remove(&e.id()).unwrap_or((0, 0));
                tracing::error!(batch_id, "💥 Worker aborted: {}", e);
                self.summary.absorb(WriteResult::failed(
                    batch_id,
                    items,
                    BatchErrorKind::Aborted,
                    e.to_string(),
                ));
            }
        }
    }
}
