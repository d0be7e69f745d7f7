#[cfg(feature = "dynamodb")]
use crate::core::{
    BatchWriteOutcome, ContinuationToken, DestinationStore, Item, ItemFailure, KeySchema, Page,
    Record, SourceStore,
};
#[cfg(feature = "dynamodb")]
use crate::utils::error::{StoreError, StoreErrorKind, StoreResult};
#[cfg(feature = "dynamodb")]
use async_trait::async_trait;
#[cfg(feature = "dynamodb")]
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
#[cfg(feature = "dynamodb")]
use aws_sdk_dynamodb::primitives::Blob;
#[cfg(feature = "dynamodb")]
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
#[cfg(feature = "dynamodb")]
use aws_sdk_dynamodb::Client as DynamoClient;
#[cfg(feature = "dynamodb")]
use serde_json::Value;
#[cfg(feature = "dynamodb")]
use std::collections::HashMap;

/// Single-key object tags for attribute types JSON has no shape for.
#[cfg(feature = "dynamodb")]
const STRING_SET: &str = "$ss";
#[cfg(feature = "dynamodb")]
const NUMBER_SET: &str = "$ns";
#[cfg(feature = "dynamodb")]
const BINARY: &str = "$b";
#[cfg(feature = "dynamodb")]
const BINARY_SET: &str = "$bs";

/// Error codes DynamoDB documents as safe to retry.
#[cfg(feature = "dynamodb")]
const TRANSIENT_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
    "TransactionConflictException",
];

#[cfg(feature = "dynamodb")]
#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: DynamoClient,
    table: String,
}

#[cfg(feature = "dynamodb")]
impl DynamoStore {
    pub fn new(client: DynamoClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

/// Loads the default AWS configuration, with an optional region override.
#[cfg(feature = "dynamodb")]
pub async fn connect(region: Option<&str>) -> DynamoClient {
    let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
    if let Some(region) = region {
        builder = builder.region(aws_sdk_dynamodb::config::Region::new(region.to_string()));
    }
    DynamoClient::from_conf(builder.build())
}

#[cfg(feature = "dynamodb")]
#[async_trait]
impl SourceStore for DynamoStore {
    async fn scan_page(
        &self,
        limit: usize,
        start_after: Option<ContinuationToken>,
    ) -> StoreResult<Page> {
        let start_key = match start_after {
            Some(Value::Object(map)) => Some(
                map.into_iter()
                    .map(|(k, v)| (k, json_to_attribute(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            Some(other) => {
                return Err(StoreError::permanent(format!(
                    "continuation token for {} must be an object, got {}",
                    self.table, other
                )))
            }
            None => None,
        };

        let output = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|e| store_error(&self.table, "Scan", e))?;

        let records = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|item| Record::new(item_to_json(item)))
            .collect();
        let next_token = output
            .last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(|key| Value::Object(item_to_json(key).into_iter().collect()));

        Ok(Page {
            records,
            next_token,
        })
    }
}

#[cfg(feature = "dynamodb")]
#[async_trait]
impl DestinationStore for DynamoStore {
    async fn batch_write(&self, items: &[Item], key: &KeySchema) -> StoreResult<BatchWriteOutcome> {
        if items.is_empty() {
            return Ok(BatchWriteOutcome::default());
        }

        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            let put = PutRequest::builder()
                .set_item(Some(json_to_item(item.attributes().clone())))
                .build()
                .map_err(|e| {
                    StoreError::permanent(format!("malformed item {}: {}", item.key_label(), e))
                })?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(&self.table, requests)
            .send()
            .await
            .map_err(|e| store_error(&self.table, "BatchWriteItem", e))?;

        let failed = output
            .unprocessed_items
            .unwrap_or_default()
            .into_values()
            .flatten()
            .filter_map(|request| request.put_request)
            .map(|put| ItemFailure {
                key: unprocessed_key(&put.item, key),
                kind: StoreErrorKind::Transient,
                reason: "returned in UnprocessedItems".to_string(),
            })
            .collect();

        Ok(BatchWriteOutcome { failed })
    }
}

#[cfg(feature = "dynamodb")]
fn unprocessed_key(item: &HashMap<String, AttributeValue>, key: &KeySchema) -> String {
    let text = |name: &str| match item.get(name) {
        Some(AttributeValue::S(s)) | Some(AttributeValue::N(s)) => s.clone(),
        _ => "?".to_string(),
    };
    format!("{}#{}", text(&key.partition_key), text(&key.sort_key))
}

#[cfg(feature = "dynamodb")]
fn store_error<E, R>(table: &str, operation: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = classify(&err);
    StoreError {
        kind,
        message: format!("{} on {}: {}", operation, table, DisplayErrorContext(&err)),
    }
}

#[cfg(feature = "dynamodb")]
fn classify<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> StoreErrorKind {
    match err {
        SdkError::ServiceError(service) => match service.err().code() {
            Some(code) if TRANSIENT_CODES.contains(&code) => StoreErrorKind::Transient,
            _ => StoreErrorKind::Permanent,
        },
        SdkError::ConstructionFailure(_) => StoreErrorKind::Permanent,
        // timeouts, dispatch failures and unparseable responses
        _ => StoreErrorKind::Transient,
    }
}

#[cfg(feature = "dynamodb")]
pub fn item_to_json(item: HashMap<String, AttributeValue>) -> HashMap<String, Value> {
    item.into_iter()
        .map(|(k, v)| (k, attribute_to_json(v)))
        .collect()
}

#[cfg(feature = "dynamodb")]
pub fn json_to_item(attributes: HashMap<String, Value>) -> HashMap<String, AttributeValue> {
    attributes
        .into_iter()
        .map(|(k, v)| (k, json_to_attribute(v)))
        .collect()
}

/// Numbers keep their exact text. Sets and binary become tagged objects such
/// as `{"$ss": ["a", "b"]}` or `{"$b": [1, 2]}` so they convert back unchanged.
#[cfg(feature = "dynamodb")]
pub fn attribute_to_json(value: AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::M(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, attribute_to_json(v)))
                .collect(),
        ),
        AttributeValue::L(list) => Value::Array(list.into_iter().map(attribute_to_json).collect()),
        AttributeValue::Ss(set) => tagged(STRING_SET, set.into_iter().map(Value::String).collect()),
        AttributeValue::Ns(set) => tagged(NUMBER_SET, set.into_iter().map(number_to_json).collect()),
        AttributeValue::B(blob) => tagged(BINARY, bytes_to_json(blob)),
        AttributeValue::Bs(set) => tagged(BINARY_SET, set.into_iter().map(bytes_to_json).collect()),
        other => {
            tracing::warn!("Unsupported attribute type {:?}, storing null", other);
            Value::Null
        }
    }
}

#[cfg(feature = "dynamodb")]
pub fn json_to_attribute(value: Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::S(s),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Null => AttributeValue::Null(true),
        Value::Array(list) => AttributeValue::L(list.into_iter().map(json_to_attribute).collect()),
        Value::Object(map) => match from_tagged(&map) {
            Some(attribute) => attribute,
            None => AttributeValue::M(
                map.into_iter()
                    .map(|(k, v)| (k, json_to_attribute(v)))
                    .collect(),
            ),
        },
    }
}

#[cfg(feature = "dynamodb")]
fn tagged(tag: &str, items: Vec<Value>) -> Value {
    Value::Object(serde_json::Map::from_iter([(tag.to_string(), Value::Array(items))]))
}

#[cfg(feature = "dynamodb")]
fn from_tagged(map: &serde_json::Map<String, Value>) -> Option<AttributeValue> {
    if map.len() != 1 {
        return None;
    }
    let (tag, Value::Array(items)) = map.iter().next()? else {
        return None;
    };

    match tag.as_str() {
        STRING_SET => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(AttributeValue::Ss),
        NUMBER_SET => items
            .iter()
            .map(|v| match v {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(AttributeValue::Ns),
        BINARY => json_to_bytes(items).map(|bytes| AttributeValue::B(Blob::new(bytes))),
        BINARY_SET => items
            .iter()
            .map(|v| v.as_array().and_then(|bytes| json_to_bytes(bytes)).map(Blob::new))
            .collect::<Option<Vec<_>>>()
            .map(AttributeValue::Bs),
        _ => None,
    }
}

// With arbitrary_precision the parsed number keeps the original text.
#[cfg(feature = "dynamodb")]
fn number_to_json(n: String) -> Value {
    serde_json::from_str::<serde_json::Number>(&n)
        .map(Value::Number)
        .unwrap_or(Value::String(n))
}

#[cfg(feature = "dynamodb")]
fn bytes_to_json(blob: Blob) -> Vec<Value> {
    blob.into_inner().into_iter().map(Value::from).collect()
}

#[cfg(feature = "dynamodb")]
fn json_to_bytes(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}
