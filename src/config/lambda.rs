use crate::config::{PipelineConfig, AWS_REGION, PARAMETER_KEYS, WORKER_TIMEOUT_SECS};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::Validate;
use std::collections::HashMap;
use std::time::Duration;

/// Parameters for a Lambda invocation: the function's environment with the
/// event's own `parameters` laid over it.
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub pipeline: PipelineConfig,
}

impl LambdaConfig {
    pub fn from_env(overrides: &HashMap<String, String>) -> Result<Self> {
        let environment: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(&environment, overrides)
    }

    pub fn from_sources(
        environment: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut params = HashMap::new();
        for key in PARAMETER_KEYS {
            if let Some(value) = overrides.get(*key).or_else(|| environment.get(*key)) {
                params.insert(key.to_string(), value.clone());
            }
        }

        if let Some(unknown) = overrides.keys().find(|k| !PARAMETER_KEYS.contains(&k.as_str())) {
            tracing::warn!("Ignoring unknown invocation parameter '{}'", unknown);
        }

        let config = Self {
            pipeline: PipelineConfig::from_params(&params)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// How long the run may keep dispatching, given the time `remaining`
    /// before the invocation deadline. The last worker timeout is held back
    /// so dispatched batches can settle.
    pub fn dispatch_window(&self, remaining: Duration) -> Result<Duration> {
        let worker_timeout = self.pipeline.worker_timeout;
        if remaining <= worker_timeout {
            return Err(EtlError::ConfigValidationError {
                field: WORKER_TIMEOUT_SECS.to_string(),
                message: format!(
                    "worker timeout of {}s does not fit in the {:.1}s left before the invocation deadline; \
                     lower {} or raise the function timeout",
                    worker_timeout.as_secs(),
                    remaining.as_secs_f64(),
                    WORKER_TIMEOUT_SECS
                ),
            });
        }
        Ok(remaining - worker_timeout)
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        if let Some(region) = &self.pipeline.region {
            validate_aws_region(AWS_REGION, region)?;
        }

        tracing::info!(
            environment = %self.pipeline.environment,
            source = %self.pipeline.source_table,
            destination = %self.pipeline.destination_table,
            "✅ Lambda configuration validation passed"
        );
        Ok(())
    }
}

pub fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    crate::utils::validation::validate_non_empty_string(field_name, region)?;

    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens"
                .to_string(),
        });
    }

    Ok(())
}
