use crate::config::{
    BATCH_SIZE, DESTINATION_TABLE_NAME, ENVIRONMENT, MAX_WORKERS, PAGE_SIZE, PARTITION_KEY,
    SORT_KEY, SORT_KEY_VALUE, SOURCE_TABLE_NAME, WORKER_TIMEOUT_SECS,
};
use crate::utils::error::{EtlError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern is valid")
});

/// A copy job described in TOML.
///
/// ```toml
/// [job]
/// environment = "${STAGE}"
///
/// [source]
/// table = "user_data"
/// page_size = 200
///
/// [destination]
/// table = "user_data_entry"
/// batch_size = 25
///
/// [workers]
/// max_workers = 16
/// timeout_seconds = 30
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub job: JobSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub workers: WorkersSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSection {
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    pub table: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSection {
    pub table: Option<String>,
    pub batch_size: Option<usize>,
    pub partition_key: Option<String>,
    pub sort_key: Option<String>,
    pub sort_key_value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersSection {
    pub max_workers: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

impl JobFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Flattens the file into the same parameter map the environment provides.
    pub fn into_params(self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                params.insert(key.to_string(), value);
            }
        };

        put(ENVIRONMENT, self.job.environment);
        put(SOURCE_TABLE_NAME, self.source.table);
        put(PAGE_SIZE, self.source.page_size.map(|v| v.to_string()));
        put(DESTINATION_TABLE_NAME, self.destination.table);
        put(BATCH_SIZE, self.destination.batch_size.map(|v| v.to_string()));
        put(PARTITION_KEY, self.destination.partition_key);
        put(SORT_KEY, self.destination.sort_key);
        put(SORT_KEY_VALUE, self.destination.sort_key_value);
        put(MAX_WORKERS, self.workers.max_workers.map(|v| v.to_string()));
        put(WORKER_TIMEOUT_SECS, self.workers.timeout_seconds.map(|v| v.to_string()));

        params
    }
}

/// Replaces `${VAR}` with the environment value; an unset variable is an error.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_REFERENCE.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(EtlError::ConfigValidationError {
            field: "environment_substitution".to_string(),
            message: format!("unset variable(s): {}", missing.join(", ")),
        });
    }
    Ok(result.into_owned())
}
