use crate::core::{
    BatchWriteOutcome, ContinuationToken, DestinationStore, Item, KeySchema, Page, Record,
    SourceStore,
};
use crate::utils::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

pub type StoredItems = BTreeMap<(String, String), HashMap<String, Value>>;

/// In-process table: a fixed list of source records plus a keyed destination map.
///
/// Continuation tokens are plain offsets into the source list.
#[derive(Debug, Default)]
pub struct MemoryStore {
    source: Vec<Record>,
    written: RwLock<StoredItems>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: Vec<Record>) -> Self {
        Self {
            source,
            written: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn written_count(&self) -> usize {
        self.written.read().await.len()
    }

    pub async fn get(&self, partition: &str, sort: &str) -> Option<HashMap<String, Value>> {
        self.written
            .read()
            .await
            .get(&(partition.to_string(), sort.to_string()))
            .cloned()
    }

    pub async fn snapshot(&self) -> StoredItems {
        self.written.read().await.clone()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn scan_page(
        &self,
        limit: usize,
        start_after: Option<ContinuationToken>,
    ) -> StoreResult<Page> {
        let offset = match start_after {
            None => 0,
            Some(token) => offset_from_token(&token)?,
        };
        Ok(page_at(&self.source, offset, limit))
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn batch_write(&self, items: &[Item], _key: &KeySchema) -> StoreResult<BatchWriteOutcome> {
        let mut written = self.written.write().await;
        for item in items {
            written.insert(item.key().clone(), item.attributes().clone());
        }
        Ok(BatchWriteOutcome::default())
    }
}

pub(crate) fn offset_from_token(token: &ContinuationToken) -> StoreResult<usize> {
    token
        .as_u64()
        .map(|o| o as usize)
        .ok_or_else(|| StoreError::permanent(format!("invalid continuation token: {}", token)))
}

/// Slices `records` into one page; the token is omitted once the end is reached.
pub(crate) fn page_at(records: &[Record], offset: usize, limit: usize) -> Page {
    let start = offset.min(records.len());
    let end = start.saturating_add(limit).min(records.len());
    Page {
        records: records[start..end].to_vec(),
        next_token: (end < records.len()).then(|| Value::from(end as u64)),
    }
}
