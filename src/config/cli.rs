use crate::config::toml_config::JobFile;
use crate::config::{
    PipelineConfig, AWS_REGION, BATCH_SIZE, DESTINATION_TABLE_NAME, ENVIRONMENT, MAX_WORKERS,
    PAGE_SIZE, PARTITION_KEY, SORT_KEY, SORT_KEY_VALUE, SOURCE_TABLE_NAME, WORKER_TIMEOUT_SECS,
};
use crate::core::ContinuationToken;
use crate::utils::error::{EtlError, Result};
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// JSON files under --data-dir
    Local,
    /// DynamoDB (requires the `dynamodb` feature)
    Dynamodb,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "table-etl")]
#[command(about = "Copy and transform records from one key-value table to another")]
pub struct CliConfig {
    #[arg(long, help = "TOML job file; flags override its values")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub environment: Option<String>,

    #[arg(long)]
    pub source_table: Option<String>,

    #[arg(long)]
    pub destination_table: Option<String>,

    #[arg(long)]
    pub page_size: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub worker_timeout_secs: Option<u64>,

    #[arg(long)]
    pub partition_key: Option<String>,

    #[arg(long)]
    pub sort_key: Option<String>,

    #[arg(long)]
    pub sort_key_value: Option<String>,

    #[arg(long)]
    pub region: Option<String>,

    #[arg(long, value_enum, default_value = "local")]
    pub backend: Backend,

    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, help = "Continuation token (JSON) from a failed run")]
    pub resume_token: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage per page")]
    pub monitor: bool,
}

impl CliConfig {
    /// Job file parameters overlaid with explicit flags.
    pub fn params(&self) -> Result<HashMap<String, String>> {
        let mut params = match &self.config {
            Some(path) => JobFile::from_file(path)?.into_params(),
            None => HashMap::new(),
        };

        let flags: [(&str, Option<String>); 11] = [
            (ENVIRONMENT, self.environment.clone()),
            (SOURCE_TABLE_NAME, self.source_table.clone()),
            (DESTINATION_TABLE_NAME, self.destination_table.clone()),
            (PAGE_SIZE, self.page_size.map(|v| v.to_string())),
            (BATCH_SIZE, self.batch_size.map(|v| v.to_string())),
            (MAX_WORKERS, self.max_workers.map(|v| v.to_string())),
            (WORKER_TIMEOUT_SECS, self.worker_timeout_secs.map(|v| v.to_string())),
            (PARTITION_KEY, self.partition_key.clone()),
            (SORT_KEY, self.sort_key.clone()),
            (SORT_KEY_VALUE, self.sort_key_value.clone()),
            (AWS_REGION, self.region.clone()),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                params.insert(key.to_string(), value);
            }
        }

        Ok(params)
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_params(&self.params()?)
    }

    pub fn resume_token(&self) -> Result<Option<ContinuationToken>> {
        self.resume_token
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| EtlError::InvalidConfigValueError {
                    field: "resume_token".to_string(),
                    value: raw.to_string(),
                    reason: format!("not valid JSON: {}", e),
                })
            })
            .transpose()
    }
}
