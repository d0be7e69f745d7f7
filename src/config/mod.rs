#[cfg(feature = "cli")]
pub mod cli;
pub mod lambda;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

use crate::core::dispatcher::DispatchOptions;
use crate::core::transform::{DataEntryTransformer, DEFAULT_SORT_KEY_VALUE};
use crate::core::KeySchema;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

pub const ENVIRONMENT: &str = "ENVIRONMENT";
pub const SOURCE_TABLE_NAME: &str = "SOURCE_TABLE_NAME";
pub const DESTINATION_TABLE_NAME: &str = "DESTINATION_TABLE_NAME";
pub const PAGE_SIZE: &str = "PAGE_SIZE";
pub const BATCH_SIZE: &str = "BATCH_SIZE";
pub const MAX_WORKERS: &str = "MAX_WORKERS";
pub const WORKER_TIMEOUT_SECS: &str = "WORKER_TIMEOUT_SECS";
pub const PARTITION_KEY: &str = "PARTITION_KEY";
pub const SORT_KEY: &str = "SORT_KEY";
pub const SORT_KEY_VALUE: &str = "SORT_KEY_VALUE";
pub const AWS_REGION: &str = "AWS_REGION";

/// Every parameter name the pipeline reads.
pub const PARAMETER_KEYS: &[&str] = &[
    ENVIRONMENT,
    SOURCE_TABLE_NAME,
    DESTINATION_TABLE_NAME,
    PAGE_SIZE,
    BATCH_SIZE,
    MAX_WORKERS,
    WORKER_TIMEOUT_SECS,
    PARTITION_KEY,
    SORT_KEY,
    SORT_KEY_VALUE,
    AWS_REGION,
];

pub const DEFAULT_PAGE_SIZE: usize = 200;
/// DynamoDB's BatchWriteItem limit.
pub const MAX_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_WORKERS: usize = crate::core::dispatcher::DEFAULT_MAX_WORKERS;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 30;

/// Validated run parameters, built from a flat string map.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub environment: String,
    pub source_table: String,
    pub destination_table: String,
    pub page_size: usize,
    pub batch_size: usize,
    pub max_workers: usize,
    pub worker_timeout: Duration,
    pub key_schema: KeySchema,
    pub sort_key_value: String,
    pub region: Option<String>,
}

impl PipelineConfig {
    /// Reads and validates `params`. Nothing touches a store before this succeeds.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let text = |key: &str| params.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            text(key).ok_or_else(|| EtlError::MissingConfigError {
                field: key.to_string(),
            })
        };

        let config = Self {
            environment: required(ENVIRONMENT)?,
            source_table: required(SOURCE_TABLE_NAME)?,
            destination_table: required(DESTINATION_TABLE_NAME)?,
            page_size: optional_number(params, PAGE_SIZE)?.unwrap_or(DEFAULT_PAGE_SIZE),
            batch_size: optional_number(params, BATCH_SIZE)?.unwrap_or(MAX_BATCH_SIZE),
            max_workers: optional_number(params, MAX_WORKERS)?.unwrap_or(DEFAULT_MAX_WORKERS),
            worker_timeout: Duration::from_secs(
                optional_number(params, WORKER_TIMEOUT_SECS)?.unwrap_or(DEFAULT_WORKER_TIMEOUT_SECS),
            ),
            key_schema: KeySchema::new(
                text(PARTITION_KEY).unwrap_or_else(|| KeySchema::default().partition_key),
                text(SORT_KEY).unwrap_or_else(|| KeySchema::default().sort_key),
            ),
            sort_key_value: text(SORT_KEY_VALUE).unwrap_or_else(|| DEFAULT_SORT_KEY_VALUE.to_string()),
            region: text(AWS_REGION),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            max_workers: self.max_workers,
            worker_timeout: self.worker_timeout,
        }
    }

    pub fn transformer(&self) -> DataEntryTransformer {
        DataEntryTransformer::new(self.key_schema.clone(), self.sort_key_value.clone())
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> Result<()> {
        use crate::utils::validation::*;

        validate_non_empty_string("environment", &self.environment)?;
        validate_table_name(SOURCE_TABLE_NAME, &self.source_table)?;
        validate_table_name(DESTINATION_TABLE_NAME, &self.destination_table)?;
        if self.source_table == self.destination_table {
            return Err(EtlError::ConfigValidationError {
                field: DESTINATION_TABLE_NAME.to_string(),
                message: "destination must differ from the source table".to_string(),
            });
        }

        validate_range(PAGE_SIZE, self.page_size, 1, 1000)?;
        validate_range(BATCH_SIZE, self.batch_size, 1, MAX_BATCH_SIZE)?;
        validate_range(MAX_WORKERS, self.max_workers, 1, 256)?;
        validate_range(WORKER_TIMEOUT_SECS, self.worker_timeout.as_secs(), 1, 900)?;

        validate_non_empty_string(PARTITION_KEY, &self.key_schema.partition_key)?;
        validate_non_empty_string(SORT_KEY, &self.key_schema.sort_key)?;
        if self.key_schema.partition_key == self.key_schema.sort_key {
            return Err(EtlError::ConfigValidationError {
                field: SORT_KEY.to_string(),
                message: "sort key must differ from the partition key".to_string(),
            });
        }
        validate_non_empty_string(SORT_KEY_VALUE, &self.sort_key_value)?;

        Ok(())
    }
}

fn optional_number<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => validation::parse_number(key, raw).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENVIRONMENT, "dev"),
            (SOURCE_TABLE_NAME, "user_data"),
            (DESTINATION_TABLE_NAME, "user_data_entry"),
        ]
    }

    #[test]
    fn defaults_apply() {
        let config = PipelineConfig::from_params(&params(&base())).unwrap();

        assert_eq!(config.page_size, 200);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_workers, 16);
        assert_eq!(config.worker_timeout, Duration::from_secs(30));
        assert_eq!(config.key_schema, KeySchema::new("ddw_key", "tab_name"));
        assert_eq!(config.sort_key_value, "PI-SPI");
        assert_eq!(config.region, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = base();
        pairs.extend([
            (PAGE_SIZE, "50"),
            (BATCH_SIZE, "10"),
            (MAX_WORKERS, "4"),
            (WORKER_TIMEOUT_SECS, "5"),
            (SORT_KEY_VALUE, "PI-SUMMARY"),
        ]);
        let config = PipelineConfig::from_params(&params(&pairs)).unwrap();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.dispatch_options().max_workers, 4);
        assert_eq!(config.dispatch_options().worker_timeout, Duration::from_secs(5));
        assert_eq!(config.sort_key_value, "PI-SUMMARY");
    }

    #[test]
    fn missing_required_parameter_is_reported_by_name() {
        let pairs: Vec<_> = base().into_iter().filter(|(k, _)| *k != SOURCE_TABLE_NAME).collect();
        match PipelineConfig::from_params(&params(&pairs)) {
            Err(EtlError::MissingConfigError { field }) => assert_eq!(field, SOURCE_TABLE_NAME),
            other => panic!("expected missing config, got {:?}", other),
        }

        let mut blank = base();
        blank[0] = (ENVIRONMENT, "   ");
        assert!(matches!(
            PipelineConfig::from_params(&params(&blank)),
            Err(EtlError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (key, value) in [
            (BATCH_SIZE, "26"),
            (BATCH_SIZE, "0"),
            (PAGE_SIZE, "abc"),
            (MAX_WORKERS, "0"),
            (WORKER_TIMEOUT_SECS, "0"),
        ] {
            let mut pairs = base();
            pairs.push((key, value));
            assert!(
                matches!(
                    PipelineConfig::from_params(&params(&pairs)),
                    Err(EtlError::InvalidConfigValueError { .. })
                ),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn copying_a_table_onto_itself_is_rejected() {
        let pairs = vec![
            (ENVIRONMENT, "dev"),
            (SOURCE_TABLE_NAME, "user_data"),
            (DESTINATION_TABLE_NAME, "user_data"),
        ];
        assert!(matches!(
            PipelineConfig::from_params(&params(&pairs)),
            Err(EtlError::ConfigValidationError { .. })
        ));
    }
}
