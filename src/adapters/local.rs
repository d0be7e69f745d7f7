use crate::adapters::memory::{offset_from_token, page_at, StoredItems};
use crate::core::{
    BatchWriteOutcome, ContinuationToken, DestinationStore, Item, KeySchema, Page, Record,
    SourceStore,
};
use crate::utils::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, OnceCell};

/// A table kept as a JSON file under `base_path`, for offline runs.
///
/// As a source it reads `<table>.json` (array of objects) or `<table>.jsonl`
/// (one object per line). As a destination it rewrites `<table>.json` after
/// every batch, sorted by composite key.
#[derive(Debug)]
pub struct LocalTableStore {
    base_path: PathBuf,
    table: String,
    source: OnceCell<Vec<Record>>,
    written: Mutex<Option<StoredItems>>,
}

impl LocalTableStore {
    pub fn new(base_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            table: table.into(),
            source: OnceCell::new(),
            written: Mutex::new(None),
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.json", self.table))
    }

    fn lines_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", self.table))
    }

    async fn source_records(&self) -> StoreResult<&Vec<Record>> {
        self.source
            .get_or_try_init(|| async {
                let json_path = self.table_path();
                if tokio::fs::try_exists(&json_path).await.unwrap_or(false) {
                    let bytes = tokio::fs::read(&json_path).await.map_err(io_error(&json_path))?;
                    parse_array(&bytes, &json_path)
                } else {
                    let lines_path = self.lines_path();
                    let text = tokio::fs::read_to_string(&lines_path)
                        .await
                        .map_err(io_error(&lines_path))?;
                    parse_lines(&text, &lines_path)
                }
            })
            .await
    }

    async fn load_existing(&self, key: &KeySchema) -> StoreResult<StoredItems> {
        let path = self.table_path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(BTreeMap::new());
        }
        let bytes = tokio::fs::read(&path).await.map_err(io_error(&path))?;
        let items: Vec<HashMap<String, Value>> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::permanent(format!("{}: {}", path.display(), e)))?;

        let mut stored = BTreeMap::new();
        for attributes in items {
            stored.insert(stored_key(&attributes, key), attributes);
        }
        Ok(stored)
    }

    async fn flush(&self, stored: &StoredItems) -> StoreResult<()> {
        let path = self.table_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        let rows: Vec<&HashMap<String, Value>> = stored.values().collect();
        let body = serde_json::to_vec_pretty(&rows)
            .map_err(|e| StoreError::permanent(format!("serialize {}: {}", self.table, e)))?;

        // Write-then-rename so a crash never leaves a half-written table.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        Ok(())
    }
}

#[async_trait]
impl SourceStore for LocalTableStore {
    async fn scan_page(
        &self,
        limit: usize,
        start_after: Option<ContinuationToken>,
    ) -> StoreResult<Page> {
        let offset = match start_after {
            None => 0,
            Some(token) => offset_from_token(&token)?,
        };
        let records = self.source_records().await?;
        Ok(page_at(records, offset, limit))
    }
}

#[async_trait]
impl DestinationStore for LocalTableStore {
    async fn batch_write(&self, items: &[Item], key: &KeySchema) -> StoreResult<BatchWriteOutcome> {
        let mut guard = self.written.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_existing(key).await?);
        }
        let Some(stored) = guard.as_mut() else {
            return Err(StoreError::permanent("destination table not loaded"));
        };

        // Only a flushed table replaces the cached one.
        let mut next = stored.clone();
        for item in items {
            next.insert(item.key().clone(), item.attributes().clone());
        }
        self.flush(&next).await?;
        *stored = next;

        tracing::trace!(
            table = %self.table,
            partition_key = %key.partition_key,
            rows = stored.len(),
            "Flushed local table"
        );
        Ok(BatchWriteOutcome::default())
    }
}

fn parse_array(bytes: &[u8], path: &Path) -> StoreResult<Vec<Record>> {
    let rows: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::permanent(format!("{}: {}", path.display(), e)))?;
    Ok(rows.into_iter().map(Record::from).collect())
}

fn parse_lines(text: &str, path: &Path) -> StoreResult<Vec<Record>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<serde_json::Map<String, Value>>(line)
                .map(Record::from)
                .map_err(|e| {
                    StoreError::permanent(format!("{} line {}: {}", path.display(), n + 1, e))
                })
        })
        .collect()
}

// Same rendering as `Item::key` so earlier rows are overwritten, not duplicated.
fn stored_key(attributes: &HashMap<String, Value>, key: &KeySchema) -> (String, String) {
    let text = |name: &str| match attributes.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    (text(&key.partition_key), text(&key.sort_key))
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
            StoreError::transient(format!("{}: {}", path.display(), e))
        }
        _ => StoreError::permanent(format!("{}: {}", path.display(), e)),
    }
}
