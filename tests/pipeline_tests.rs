use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use table_etl::core::{
    BatchErrorKind, BatchWriteOutcome, DestinationStore, Item, ItemFailure, KeySchema, Record,
};
use table_etl::utils::error::{StoreErrorKind, StoreResult};
use table_etl::{
    DataEntryTransformer, EtlEngine, EtlError, LocalTableStore, MemoryStore, PipelineConfig,
    RunOutcome,
};
use tempfile::TempDir;

fn config(extra: &[(&str, &str)]) -> PipelineConfig {
    let mut params = HashMap::from([
        ("ENVIRONMENT".to_string(), "test".to_string()),
        ("SOURCE_TABLE_NAME".to_string(), "user_data".to_string()),
        ("DESTINATION_TABLE_NAME".to_string(), "user_data_entry".to_string()),
    ]);
    for (key, value) in extra {
        params.insert(key.to_string(), value.to_string());
    }
    PipelineConfig::from_params(&params).unwrap()
}

fn entry(i: usize) -> Value {
    json!({
        "ddw_key": format!("entry-{:04}", i),
        "recordTypeId": "rt-7",
        "version_number": 3.7,
        "is_deployed": i % 3 == 0,
        "pi_term": {"term": "2024-S1"},
    })
}

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(serde_json::from_value(entry(i)).unwrap()))
        .collect()
}

fn read_table(path: &Path) -> Vec<HashMap<String, Value>> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_copy_450_records_in_18_batches() {
    let source = Arc::new(MemoryStore::with_source(records(450)));
    let destination = Arc::new(MemoryStore::new());
    let config = config(&[]);

    let summary = EtlEngine::new(source, destination.clone(), config.transformer(), &config)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Completed);
    assert_eq!(summary.pages_read, 3);
    assert_eq!(summary.records_scanned, 450);
    assert_eq!(summary.batch_count, 18);
    assert_eq!(summary.items_written, 450);
    let ids: Vec<usize> = summary.batches.iter().map(|b| b.batch_id).collect();
    assert_eq!(ids, (1..=18).collect::<Vec<_>>());
    assert!(summary.batches.iter().all(|b| b.count == 25 && b.status == "success"));
    assert_eq!(destination.written_count().await, 450);
}

#[tokio::test]
async fn test_local_tables_end_to_end() {
    let dir = TempDir::new().unwrap();
    let lines: Vec<String> = (0..60).map(|i| entry(i).to_string()).collect();
    std::fs::write(dir.path().join("user_data.jsonl"), lines.join("\n")).unwrap();

    let config = config(&[("PAGE_SIZE", "20"), ("BATCH_SIZE", "7")]);
    let source = Arc::new(LocalTableStore::new(dir.path(), "user_data"));
    let destination = Arc::new(LocalTableStore::new(dir.path(), "user_data_entry"));

    let summary = EtlEngine::new(source, destination.clone(), config.transformer(), &config)
        .run()
        .await
        .unwrap();

    // 3 pages of 20, each split 7 + 7 + 6
    assert_eq!(summary.pages_read, 3);
    assert_eq!(summary.batch_count, 9);
    assert_eq!(summary.items_written, 60);

    let rows = read_table(&destination.table_path());
    assert_eq!(rows.len(), 60);
    assert_eq!(rows[0]["ddw_key"], json!("entry-0000"));
    assert_eq!(rows[59]["ddw_key"], json!("entry-0059"));
    assert!(rows.iter().all(|r| r["tab_name"] == json!("PI-SPI")));

    // entry-0000 is deployed, entry-0001 is not
    assert_eq!(rows[0]["pub_version"], json!("3.0"));
    assert_eq!(rows[1]["pub_version"], json!(3.7));
    assert_eq!(rows[1]["current_version"], json!(3.7));
    assert_eq!(rows[1]["pi_term"], json!({"term": "2024-S1"}));
}

#[tokio::test]
async fn test_rerun_overwrites_instead_of_duplicating() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<Value> = (0..40).map(entry).collect();
    std::fs::write(
        dir.path().join("user_data.json"),
        serde_json::to_vec(&rows).unwrap(),
    )
    .unwrap();
    let config = config(&[]);

    for _ in 0..2 {
        let source = Arc::new(LocalTableStore::new(dir.path(), "user_data"));
        let destination = Arc::new(LocalTableStore::new(dir.path(), "user_data_entry"));
        let summary = EtlEngine::new(source, destination, config.transformer(), &config)
            .run()
            .await
            .unwrap();
        assert_eq!(summary.items_written, 40);
    }

    let written = read_table(&dir.path().join("user_data_entry.json"));
    assert_eq!(written.len(), 40);
}

#[tokio::test]
async fn test_empty_source_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("user_data.json"), "[]").unwrap();
    let config = config(&[]);

    let source = Arc::new(LocalTableStore::new(dir.path(), "user_data"));
    let destination = Arc::new(LocalTableStore::new(dir.path(), "user_data_entry"));
    let summary = EtlEngine::new(source, destination.clone(), config.transformer(), &config)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Completed);
    assert_eq!(summary.pages_read, 1);
    assert_eq!(summary.batch_count, 0);
    assert_eq!(summary.items_written, 0);
    assert!(!destination.table_path().exists());
}

#[tokio::test]
async fn test_missing_source_table_is_a_source_read_error() {
    let dir = TempDir::new().unwrap();
    let config = config(&[]);

    let source = Arc::new(LocalTableStore::new(dir.path(), "user_data"));
    let destination = Arc::new(MemoryStore::new());
    let err = EtlEngine::new(source, destination, config.transformer(), &config)
        .run()
        .await
        .unwrap_err();

    match err {
        EtlError::SourceRead {
            pages_processed,
            resume_token,
            ..
        } => {
            assert_eq!(pages_processed, 0);
            assert_eq!(resume_token, None);
        }
        other => panic!("expected a source read error, got {other}"),
    }
}

/// Never answers for the batch holding `stuck_key`.
struct StuckDestination {
    inner: MemoryStore,
    stuck_key: &'static str,
}

#[async_trait]
impl DestinationStore for StuckDestination {
    async fn batch_write(&self, items: &[Item], key: &KeySchema) -> StoreResult<BatchWriteOutcome> {
        if items.iter().any(|item| item.key().0 == self.stuck_key) {
            std::future::pending::<()>().await;
        }
        self.inner.batch_write(items, key).await
    }
}

#[tokio::test]
async fn test_hung_worker_times_out_without_blocking_others() {
    let source = Arc::new(MemoryStore::with_source(records(100)));
    let destination = Arc::new(StuckDestination {
        inner: MemoryStore::new(),
        stuck_key: "entry-0030",
    });
    let config = config(&[("WORKER_TIMEOUT_SECS", "1"), ("MAX_WORKERS", "2")]);

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        EtlEngine::new(source, destination.clone(), config.transformer(), &config).run(),
    )
    .await
    .expect("run finished")
    .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::CompletedWithFailures);
    assert_eq!(summary.batch_count, 4);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].batch_id, 2);
    assert_eq!(summary.failures[0].kind, BatchErrorKind::Timeout);
    assert_eq!(summary.items_written, 75);
    assert_eq!(destination.inner.written_count().await, 75);
}

/// Reports every item whose key ends in `7` as unprocessed.
struct ThrottledDestination {
    inner: MemoryStore,
}

#[async_trait]
impl DestinationStore for ThrottledDestination {
    async fn batch_write(&self, items: &[Item], key: &KeySchema) -> StoreResult<BatchWriteOutcome> {
        let (rejected, accepted): (Vec<Item>, Vec<Item>) = items
            .iter()
            .cloned()
            .partition(|item| item.key().0.ends_with('7'));
        self.inner.batch_write(&accepted, key).await?;
        Ok(BatchWriteOutcome {
            failed: rejected
                .iter()
                .map(|item| ItemFailure {
                    key: item.key_label(),
                    kind: StoreErrorKind::Transient,
                    reason: "ProvisionedThroughputExceededException".to_string(),
                })
                .collect(),
        })
    }
}

#[tokio::test]
async fn test_unprocessed_items_are_partial_transient_failures() {
    let source = Arc::new(MemoryStore::with_source(records(50)));
    let destination = Arc::new(ThrottledDestination {
        inner: MemoryStore::new(),
    });
    let config = config(&[]);

    let summary = EtlEngine::new(source, destination.clone(), config.transformer(), &config)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.batch_count, 2);
    assert_eq!(summary.items_written, 45);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary
        .failures
        .iter()
        .all(|f| f.kind == BatchErrorKind::Transient));
    assert!(summary.batches.iter().all(|b| b.status == "partial"));
    assert!(destination.inner.get("entry-0007", "PI-SPI").await.is_none());
}

#[tokio::test]
async fn test_custom_key_schema_flows_to_destination() {
    let source = Arc::new(MemoryStore::with_source(records(5)));
    let destination = Arc::new(MemoryStore::new());
    let config = config(&[
        ("PARTITION_KEY", "pk"),
        ("SORT_KEY", "sk"),
        ("SORT_KEY_VALUE", "PI-SUMMARY"),
    ]);
    assert_eq!(config.key_schema, KeySchema::new("pk", "sk"));

    let summary = EtlEngine::new(
        source,
        destination.clone(),
        DataEntryTransformer::new(config.key_schema.clone(), config.sort_key_value.clone()),
        &config,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.items_written, 5);
    let item = destination.get("entry-0003", "PI-SUMMARY").await.unwrap();
    assert_eq!(item["pk"], json!("entry-0003"));
    assert_eq!(item["sk"], json!("PI-SUMMARY"));
    assert!(!item.contains_key("ddw_key"));
}
