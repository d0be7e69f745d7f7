use crate::core::{
    BatchError, BatchErrorKind, DestinationStore, Item, KeySchema, WriteResult,
};
use crate::utils::error::StoreErrorKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Writes one batch per call to the destination store. Never retries.
pub struct BatchWriter<D: DestinationStore + ?Sized> {
    destination: Arc<D>,
    key_schema: KeySchema,
}

impl<D: DestinationStore + ?Sized> BatchWriter<D> {
    pub fn new(destination: Arc<D>, key_schema: KeySchema) -> Self {
        Self {
            destination,
            key_schema,
        }
    }

    pub async fn write(&self, batch_id: usize, batch: Vec<Item>) -> WriteResult {
        let started = Instant::now();
        let items_submitted = batch.len();
        let (items, duplicates_collapsed) = collapse_duplicate_keys(batch);

        tracing::debug!(
            batch_id,
            items = items.len(),
            duplicates_collapsed,
            "⏳ Writing batch"
        );

        let outcome = self.destination.batch_write(&items, &self.key_schema).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (items_written, error) = match outcome {
            Ok(outcome) if outcome.failed.is_empty() => (items.len(), None),
            Ok(outcome) => {
                let kind = if outcome
                    .failed
                    .iter()
                    .any(|f| f.kind == StoreErrorKind::Permanent)
                {
                    BatchErrorKind::Permanent
                } else {
                    BatchErrorKind::Transient
                };
                let sample = &outcome.failed[0];
                let message = format!(
                    "{} of {} item(s) not written (first: {}: {})",
                    outcome.failed.len(),
                    items.len(),
                    sample.key,
                    sample.reason
                );
                (
                    items.len().saturating_sub(outcome.failed.len()),
                    Some(BatchError { kind, message }),
                )
            }
            Err(e) => (
                0,
                Some(BatchError {
                    kind: e.kind.into(),
                    message: e.message,
                }),
            ),
        };

        match &error {
            None => tracing::info!(batch_id, items_written, duration_ms, "✅ Batch written"),
            Some(e) => tracing::error!(
                batch_id,
                items_written,
                kind = ?e.kind,
                "❌ Batch failed: {}",
                e.message
            ),
        }

        WriteResult {
            batch_id,
            items_submitted,
            items_written,
            duplicates_collapsed,
            duration_ms,
            error,
        }
    }
}

/// Keeps the last item for each composite key, in first-seen key order.
///
/// Stores such as DynamoDB reject a batch that names the same key twice.
pub fn collapse_duplicate_keys(batch: Vec<Item>) -> (Vec<Item>, usize) {
    let total = batch.len();
    let mut slots: HashMap<(String, String), usize> = HashMap::with_capacity(total);
    let mut unique: Vec<Item> = Vec::with_capacity(total);

    for item in batch {
        match slots.get(item.key()) {
            Some(&slot) => unique[slot] = item,
            None => {
                slots.insert(item.key().clone(), unique.len());
                unique.push(item);
            }
        }
    }

    let collapsed = total - unique.len();
    (unique, collapsed)
}
