use crate::config::PipelineConfig;
use crate::core::batcher::chunk;
use crate::core::dispatcher::{DispatchOptions, Dispatcher};
use crate::core::pagination::PaginationDriver;
use crate::core::writer::BatchWriter;
use crate::core::{ContinuationToken, DestinationStore, RunSummary, SourceStore, Transformer};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Scan → batch → transform → concurrent write, for one source/destination pair.
pub struct EtlEngine<S, D, T>
where
    S: SourceStore + ?Sized,
    D: DestinationStore + ?Sized + 'static,
    T: Transformer,
{
    source: Arc<S>,
    destination: Arc<D>,
    transformer: T,
    page_size: usize,
    batch_size: usize,
    dispatch: DispatchOptions,
    resume_token: Option<ContinuationToken>,
    cancel: CancellationToken,
    monitor: SystemMonitor,
}

impl<S, D, T> EtlEngine<S, D, T>
where
    S: SourceStore + ?Sized,
    D: DestinationStore + ?Sized + 'static,
    T: Transformer,
{
    pub fn new(source: Arc<S>, destination: Arc<D>, transformer: T, config: &PipelineConfig) -> Self {
        Self {
            source,
            destination,
            transformer,
            page_size: config.page_size,
            batch_size: config.batch_size,
            dispatch: config.dispatch_options(),
            resume_token: None,
            cancel: CancellationToken::new(),
            monitor: SystemMonitor::default(),
        }
    }

    pub fn new_with_monitoring(
        source: Arc<S>,
        destination: Arc<D>,
        transformer: T,
        config: &PipelineConfig,
        monitor_enabled: bool,
    ) -> Self {
        Self {
            monitor: SystemMonitor::new(monitor_enabled),
            ..Self::new(source, destination, transformer, config)
        }
    }

    pub fn resume_from(mut self, token: Option<ContinuationToken>) -> Self {
        self.resume_token = token;
        self
    }

    /// Checked between page reads and before each dispatch.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs to completion. Returns `Err` only when the source cannot be read;
    /// batch failures are reported in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        tracing::info!(
            page_size = self.page_size,
            batch_size = self.batch_size,
            max_workers = self.dispatch.max_workers,
            "Starting table copy"
        );
        self.monitor.log_stats("start");

        let writer = Arc::new(BatchWriter::new(
            self.destination.clone(),
            self.transformer.key_schema().clone(),
        ));
        let mut dispatcher = Dispatcher::new(writer, self.dispatch);
        let mut pages = PaginationDriver::new(self.source.as_ref(), self.page_size)
            .resume_from(self.resume_token.clone());

        let mut resume_token = None;
        loop {
            // Re-reads the page about to be fetched.
            let page_start = pages.resume_token().cloned();

            if self.cancel.is_cancelled() && !pages.is_exhausted() {
                tracing::warn!(pages_read = pages.pages_read(), "Run cancelled; no further pages");
                dispatcher.mark_cancelled();
                resume_token = page_start;
                break;
            }

            let page = match pages.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    // Let in-flight batches settle before giving up.
                    let partial = dispatcher.finish().await;
                    tracing::error!(
                        items_written = partial.items_written,
                        batches = partial.batch_count,
                        failures = partial.failures.len(),
                        "❌ Source read failed: {}",
                        e
                    );
                    return Err(e);
                }
            };

            dispatcher.record_page();
            dispatcher.record_scanned(page.records.len());
            tracing::info!(
                page = pages.pages_read(),
                records = page.records.len(),
                "🔍 Scanned page"
            );

            let mut stopped_mid_page = false;
            for raw_batch in chunk(page.records, self.batch_size) {
                if self.cancel.is_cancelled() {
                    tracing::warn!(
                        page = pages.pages_read(),
                        "Run cancelled; rest of this page was not dispatched"
                    );
                    dispatcher.mark_cancelled();
                    stopped_mid_page = true;
                    break;
                }

                let mut batch = Vec::with_capacity(raw_batch.len());
                for raw in &raw_batch {
                    match self.transformer.transform(raw) {
                        Ok(item) => batch.push(item),
                        Err(e) => {
                            tracing::warn!("Skipping record: {}", e);
                            dispatcher.record_skipped(1);
                        }
                    }
                }

                if !batch.is_empty() {
                    dispatcher.dispatch(batch).await;
                }
            }

            if stopped_mid_page {
                resume_token = page_start;
                break;
            }
            self.monitor.log_stats(&format!("page {}", pages.pages_read()));
        }

        let mut summary = dispatcher.finish().await;
        summary.resume_token = resume_token;
        self.monitor.log_final_stats();

        tracing::info!(
            outcome = ?summary.outcome(),
            records_scanned = summary.records_scanned,
            records_skipped = summary.records_skipped,
            items_written = summary.items_written,
            batches = summary.batch_count,
            failures = summary.failures.len(),
            elapsed_ms = summary.elapsed_ms,
            "🎉 Table copy finished"
        );
        for failure in &summary.failures {
            tracing::warn!(
                batch_id = failure.batch_id,
                kind = ?failure.kind,
                items = failure.items,
                "Batch failure: {}",
                failure.message
            );
        }

        Ok(summary)
    }
}
