use crate::utils::error::{StoreErrorKind, TransformError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Untyped attribute map as read from the source table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            data: map.into_iter().collect(),
        }
    }
}

/// Attribute names of the destination table's composite primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: String,
}

impl KeySchema {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new("ddw_key", "tab_name")
    }
}

/// A destination item whose partition and sort key are present and non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    attributes: HashMap<String, serde_json::Value>,
    key: (String, String),
}

impl Item {
    pub fn new(
        attributes: HashMap<String, serde_json::Value>,
        schema: &KeySchema,
    ) -> Result<Self, TransformError> {
        let partition = key_component(&attributes, &schema.partition_key)?;
        let sort = key_component(&attributes, &schema.sort_key)?;
        Ok(Self {
            attributes,
            key: (partition, sort),
        })
    }

    pub fn attributes(&self) -> &HashMap<String, serde_json::Value> {
        &self.attributes
    }

    /// Composite key rendered as `(partition, sort)` text; the overwrite identity.
    pub fn key(&self) -> &(String, String) {
        &self.key
    }

    pub fn key_label(&self) -> String {
        format!("{}#{}", self.key.0, self.key.1)
    }
}

fn key_component(
    attributes: &HashMap<String, serde_json::Value>,
    name: &str,
) -> Result<String, TransformError> {
    match attributes.get(name) {
        None | Some(serde_json::Value::Null) => Err(TransformError::MissingField(name.to_string())),
        Some(serde_json::Value::String(s)) if s.is_empty() => Err(TransformError::InvalidField {
            field: name.to_string(),
            reason: "key attribute is empty".to_string(),
        }),
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(TransformError::InvalidField {
            field: name.to_string(),
            reason: format!("key attribute must be a string or number, got {}", other),
        }),
    }
}

pub type Batch = Vec<Item>;

/// Opaque scan position; `None` on a page means the source is exhausted.
pub type ContinuationToken = serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_token: Option<ContinuationToken>,
}

/// Per-item rejection reported by a destination store inside one batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub key: String,
    pub kind: StoreErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutcome {
    pub failed: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorKind {
    Transient,
    Permanent,
    Timeout,
    Aborted,
}

impl From<StoreErrorKind> for BatchErrorKind {
    fn from(kind: StoreErrorKind) -> Self {
        match kind {
            StoreErrorKind::Transient => BatchErrorKind::Transient,
            StoreErrorKind::Permanent => BatchErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    pub kind: BatchErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteResult {
    pub batch_id: usize,
    pub items_submitted: usize,
    pub items_written: usize,
    pub duplicates_collapsed: usize,
    pub duration_ms: u64,
    pub error: Option<BatchError>,
}

impl WriteResult {
    pub fn failed(batch_id: usize, items_submitted: usize, kind: BatchErrorKind, message: String) -> Self {
        Self {
            batch_id,
            items_submitted,
            items_written: 0,
            duplicates_collapsed: 0,
            duration_ms: 0,
            error: Some(BatchError { kind, message }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_id: usize,
    pub kind: BatchErrorKind,
    pub items: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchLog {
    pub batch_id: usize,
    pub count: usize,
    pub duration_ms: u64,
    pub status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    CompletedWithFailures,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub records_scanned: usize,
    pub records_skipped: usize,
    pub items_written: usize,
    pub duplicates_collapsed: usize,
    pub pages_read: usize,
    pub batch_count: usize,
    pub failures: Vec<BatchFailure>,
    pub batches: Vec<BatchLog>,
    pub cancelled: bool,
    /// Where a cancelled run can pick up again; `None` means from the start.
    pub resume_token: Option<ContinuationToken>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            records_scanned: 0,
            records_skipped: 0,
            items_written: 0,
            duplicates_collapsed: 0,
            pages_read: 0,
            batch_count: 0,
            failures: Vec::new(),
            batches: Vec::new(),
            cancelled: false,
            resume_token: None,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn absorb(&mut self, result: WriteResult) {
        self.items_written += result.items_written;
        self.duplicates_collapsed += result.duplicates_collapsed;

        let status = match &result.error {
            None => "success",
            Some(e) => match e.kind {
                BatchErrorKind::Timeout => "timeout",
                BatchErrorKind::Aborted => "aborted",
                _ if result.items_written > 0 => "partial",
                _ => "failed",
            },
        };
        self.batches.push(BatchLog {
            batch_id: result.batch_id,
            count: result.items_submitted,
            duration_ms: result.duration_ms,
            status,
        });

        if let Some(error) = result.error {
            self.failures.push(BatchFailure {
                batch_id: result.batch_id,
                kind: error.kind,
                items: result.items_submitted,
                message: error.message,
            });
        }
    }

    pub(crate) fn close(&mut self) {
        self.failures.sort_by_key(|f| f.batch_id);
        self.batches.sort_by_key(|b| b.batch_id);
        let finished = Utc::now();
        self.elapsed_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if self.has_failures() {
            RunOutcome::CompletedWithFailures
        } else {
            RunOutcome::Completed
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
