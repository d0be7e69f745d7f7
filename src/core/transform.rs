use crate::core::{Item, KeySchema, Record, Transformer};
use crate::utils::error::TransformError;
use serde_json::Value;
use std::collections::HashMap;

pub const SOURCE_KEY_FIELD: &str = "ddw_key";
pub const RECORD_TYPE_FIELD: &str = "recordTypeId";
pub const VERSION_FIELD: &str = "version_number";
pub const DEPLOYED_FIELD: &str = "is_deployed";
pub const TERM_FIELD: &str = "pi_term";

pub const DEFAULT_SORT_KEY_VALUE: &str = "PI-SPI";

/// Copies user data entries into the per-tab entry table, deriving the
/// published major version.
///
/// | destination          | source                                              |
/// |----------------------|-----------------------------------------------------|
/// | `<partition_key>`    | `ddw_key` (required)                                |
/// | `<sort_key>`         | configured constant, `PI-SPI` by default            |
/// | `recordTypeId`       | `recordTypeId` (required)                           |
/// | `current_version`    | `version_number`                                    |
/// | `pub_version`        | `"<floor>.0"` when deployed, else `version_number`  |
/// | `pi_term`            | `pi_term`, or `{}`                                  |
#[derive(Debug, Clone)]
pub struct DataEntryTransformer {
    key_schema: KeySchema,
    sort_key_value: String,
}

impl DataEntryTransformer {
    pub fn new(key_schema: KeySchema, sort_key_value: impl Into<String>) -> Self {
        Self {
            key_schema,
            sort_key_value: sort_key_value.into(),
        }
    }
}

impl Default for DataEntryTransformer {
    fn default() -> Self {
        Self::new(KeySchema::default(), DEFAULT_SORT_KEY_VALUE)
    }
}

impl Transformer for DataEntryTransformer {
    fn transform(&self, raw: &Record) -> Result<Item, TransformError> {
        let key = required(raw, SOURCE_KEY_FIELD)?;
        let record_type = required(raw, RECORD_TYPE_FIELD)?;
        let version = raw.get(VERSION_FIELD).filter(|v| !v.is_null());

        let pub_version = if is_deployed(raw) {
            let version = version.ok_or_else(|| TransformError::MissingField(VERSION_FIELD.to_string()))?;
            Some(major_version(version)?)
        } else {
            version.cloned()
        };

        let mut attributes = HashMap::with_capacity(6);
        attributes.insert(self.key_schema.partition_key.clone(), key.clone());
        attributes.insert(
            self.key_schema.sort_key.clone(),
            Value::String(self.sort_key_value.clone()),
        );
        attributes.insert(RECORD_TYPE_FIELD.to_string(), record_type.clone());
        if let Some(version) = version {
            attributes.insert("current_version".to_string(), version.clone());
        }
        if let Some(pub_version) = pub_version {
            attributes.insert("pub_version".to_string(), pub_version);
        }
        attributes.insert(
            TERM_FIELD.to_string(),
            raw.get(TERM_FIELD)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
        );

        Item::new(attributes, &self.key_schema)
    }

    fn key_schema(&self) -> &KeySchema {
        &self.key_schema
    }
}

fn required<'a>(raw: &'a Record, field: &str) -> Result<&'a Value, TransformError> {
    match raw.get(field) {
        None | Some(Value::Null) => Err(TransformError::MissingField(field.to_string())),
        Some(value) => Ok(value),
    }
}

// Only a real boolean counts; "true" strings are left as not deployed.
fn is_deployed(raw: &Record) -> bool {
    matches!(raw.get(DEPLOYED_FIELD), Some(Value::Bool(true)))
}

/// `3.7` / `"3.7"` -> `"3.0"`.
pub fn major_version(version: &Value) -> Result<Value, TransformError> {
    let numeric = match version {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .ok_or_else(|| TransformError::InvalidField {
        field: VERSION_FIELD.to_string(),
        reason: format!("expected a numeric version, got {}", version),
    })?;

    let major = numeric.floor();
    // i64::MAX as f64 rounds up to 2^63, one past the range.
    if major < i64::MIN as f64 || major >= i64::MAX as f64 {
        return Err(TransformError::InvalidField {
            field: VERSION_FIELD.to_string(),
            reason: format!("version {} is out of range", version),
        });
    }

    Ok(Value::String(format!("{}.0", major as i64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value::<HashMap<String, Value>>(value)
            .map(Record::new)
            .unwrap()
    }

    #[test]
    fn deployed_record_gets_major_version() {
        let transformer = DataEntryTransformer::default();
        let raw = record(json!({
            "ddw_key": "entry-1",
            "recordTypeId": "rt-9",
            "version_number": "3.0",
            "is_deployed": true,
            "pi_term": {"term": "2024"},
        }));

        let item = transformer.transform(&raw).unwrap();
        let attrs = item.attributes();

        assert_eq!(attrs["pub_version"], json!("3.0"));
        assert_eq!(attrs["current_version"], json!("3.0"));
        assert_eq!(attrs["tab_name"], json!("PI-SPI"));
        assert_eq!(attrs["ddw_key"], json!("entry-1"));
        assert_eq!(attrs["pi_term"], json!({"term": "2024"}));
    }

    #[test]
    fn deployed_fractional_version_is_floored() {
        let transformer = DataEntryTransformer::default();
        let from_number = record(json!({
            "ddw_key": "a", "recordTypeId": "r", "version_number": 4.75, "is_deployed": true
        }));
        let from_string = record(json!({
            "ddw_key": "b", "recordTypeId": "r", "version_number": " 2.5 ", "is_deployed": true
        }));

        assert_eq!(
            transformer.transform(&from_number).unwrap().attributes()["pub_version"],
            json!("4.0")
        );
        assert_eq!(
            transformer.transform(&from_string).unwrap().attributes()["pub_version"],
            json!("2.0")
        );
    }

    #[test]
    fn undeployed_record_keeps_raw_version() {
        let transformer = DataEntryTransformer::default();
        let raw = record(json!({
            "ddw_key": "entry-2",
            "recordTypeId": "rt-1",
            "version_number": "3.5",
            "is_deployed": false,
        }));

        let item = transformer.transform(&raw).unwrap();
        assert_eq!(item.attributes()["pub_version"], json!("3.5"));
        assert_eq!(item.attributes()["pi_term"], json!({}));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let transformer = DataEntryTransformer::default();
        let raw = record(json!({"ddw_key": "entry-3", "recordTypeId": "rt-1"}));

        let item = transformer.transform(&raw).unwrap();
        assert!(!item.attributes().contains_key("current_version"));
        assert!(!item.attributes().contains_key("pub_version"));
        assert_eq!(item.attributes()["pi_term"], json!({}));
    }

    #[test]
    fn missing_required_fields_skip() {
        let transformer = DataEntryTransformer::default();

        let no_key = record(json!({"recordTypeId": "rt-1"}));
        assert_eq!(
            transformer.transform(&no_key),
            Err(TransformError::MissingField("ddw_key".into()))
        );

        let no_type = record(json!({"ddw_key": "k", "recordTypeId": null}));
        assert_eq!(
            transformer.transform(&no_type),
            Err(TransformError::MissingField("recordTypeId".into()))
        );

        let empty_key = record(json!({"ddw_key": "", "recordTypeId": "rt"}));
        assert!(matches!(
            transformer.transform(&empty_key),
            Err(TransformError::InvalidField { .. })
        ));
    }

    #[test]
    fn deployed_without_usable_version_skips() {
        let transformer = DataEntryTransformer::default();

        let missing = record(json!({"ddw_key": "k", "recordTypeId": "r", "is_deployed": true}));
        assert_eq!(
            transformer.transform(&missing),
            Err(TransformError::MissingField("version_number".into()))
        );

        let garbage = record(json!({
            "ddw_key": "k", "recordTypeId": "r", "is_deployed": true, "version_number": "v3"
        }));
        assert!(matches!(
            transformer.transform(&garbage),
            Err(TransformError::InvalidField { .. })
        ));
    }

    #[test]
    fn out_of_range_major_version_skips() {
        for version in [json!(1e20), json!("-1e19"), json!(9_223_372_036_854_775_807u64)] {
            assert!(
                matches!(major_version(&version), Err(TransformError::InvalidField { .. })),
                "{} should be rejected",
                version
            );
        }

        assert_eq!(major_version(&json!(9.2e18)).unwrap(), json!("9200000000000000000.0"));
        assert_eq!(major_version(&json!("-7.5")).unwrap(), json!("-8.0"));
    }

    #[test]
    fn custom_key_schema_is_honoured() {
        let transformer = DataEntryTransformer::new(KeySchema::new("pk", "sk"), "PI-SUMMARY");
        let raw = record(json!({"ddw_key": "k", "recordTypeId": "r"}));

        let item = transformer.transform(&raw).unwrap();
        assert_eq!(item.key(), &("k".to_string(), "PI-SUMMARY".to_string()));
        assert!(!item.attributes().contains_key("ddw_key"));
    }

    #[test]
    fn transform_is_deterministic_across_threads() {
        let transformer = std::sync::Arc::new(DataEntryTransformer::default());
        let raw = record(json!({
            "ddw_key": "k", "recordTypeId": "r", "version_number": 7.2, "is_deployed": true
        }));
        let expected = transformer.transform(&raw).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let transformer = transformer.clone();
                let raw = raw.clone();
                std::thread::spawn(move || transformer.transform(&raw).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
