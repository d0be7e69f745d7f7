use crate::domain::model::{BatchWriteOutcome, ContinuationToken, Item, KeySchema, Page, Record};
use crate::utils::error::{StoreResult, TransformError};
use async_trait::async_trait;

/// Paginated scan over the source table.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn scan_page(
        &self,
        limit: usize,
        start_after: Option<ContinuationToken>,
    ) -> StoreResult<Page>;
}

/// Batched put into the destination table, overwriting on the composite key.
///
/// An `Err` means the whole call failed; per-item rejections come back in
/// [`BatchWriteOutcome::failed`].
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn batch_write(&self, items: &[Item], key: &KeySchema) -> StoreResult<BatchWriteOutcome>;
}

/// Maps one raw record to one destination item. `Err` skips the record.
///
/// Implementations must be pure: workers may call them concurrently.
pub trait Transformer: Send + Sync {
    fn transform(&self, raw: &Record) -> Result<Item, TransformError>;

    fn key_schema(&self) -> &KeySchema;
}
