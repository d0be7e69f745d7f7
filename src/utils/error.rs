use serde::Serialize;
use thiserror::Error;

/// Whether retrying the same store call later can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Throttling, network faults, 5xx responses.
    Transient,
    /// Malformed requests, missing tables, access denied.
    Permanent,
}

/// Error surfaced by a source or destination store adapter.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} store error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// Record-level failure. The pipeline skips the record and counts it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error(
        "Source read failed after {pages_processed} page(s): {source}{}",
        resume_hint(.resume_token)
    )]
    SourceRead {
        pages_processed: usize,
        resume_token: Option<serde_json::Value>,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Source,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            EtlError::SourceRead { .. } => ErrorCategory::Source,
            EtlError::IoError(_) => ErrorCategory::Storage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::SourceRead { source, .. } if source.is_transient() => ErrorSeverity::Medium,
            EtlError::SourceRead { .. } => ErrorSeverity::Critical,
            EtlError::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::MissingConfigError { field } => {
                format!("Required setting '{}' was not provided", field)
            }
            EtlError::InvalidConfigValueError { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            EtlError::SourceRead {
                pages_processed, ..
            } => format!(
                "Reading the source table failed after {} page(s); no further batches were started",
                pages_processed
            ),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::MissingConfigError { field } => {
                format!("Set {} in the environment, the job file or on the command line", field)
            }
            EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => {
                "Check the job configuration against the documented parameters".to_string()
            }
            EtlError::SourceRead {
                resume_token: Some(token),
                ..
            } => format!("Re-run with --resume-token '{}' to continue the scan", token),
            EtlError::SourceRead { .. } => "Re-run the job from the beginning".to_string(),
            EtlError::IoError(_) => "Check file paths and permissions".to_string(),
        }
    }
}

fn resume_hint(token: &Option<serde_json::Value>) -> String {
    match token {
        Some(token) => format!(" (resume token: {})", token),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_read_severity_follows_store_error_kind() {
        let transient = EtlError::SourceRead {
            pages_processed: 2,
            resume_token: None,
            source: StoreError::transient("throttled"),
        };
        let permanent = EtlError::SourceRead {
            pages_processed: 0,
            resume_token: None,
            source: StoreError::permanent("table not found"),
        };

        assert_eq!(transient.severity(), ErrorSeverity::Medium);
        assert_eq!(permanent.severity(), ErrorSeverity::Critical);
        assert_eq!(transient.category(), ErrorCategory::Source);
    }

    #[test]
    fn resume_token_is_part_of_the_suggestion() {
        let err = EtlError::SourceRead {
            pages_processed: 3,
            resume_token: Some(serde_json::json!({"ddw_key": "k-600"})),
            source: StoreError::transient("throttled"),
        };

        assert!(err.recovery_suggestion().contains("k-600"));
        assert!(err.user_friendly_message().contains("3 page(s)"));
    }

    #[test]
    fn display_carries_the_resume_token() {
        let with_token = EtlError::SourceRead {
            pages_processed: 3,
            resume_token: Some(serde_json::json!({"ddw_key": "k-600"})),
            source: StoreError::transient("throttled"),
        };
        assert_eq!(
            with_token.to_string(),
            r#"Source read failed after 3 page(s): Transient store error: throttled (resume token: {"ddw_key":"k-600"})"#
        );

        let from_start = EtlError::SourceRead {
            pages_processed: 0,
            resume_token: None,
            source: StoreError::permanent("table not found"),
        };
        assert!(!from_start.to_string().contains("resume token"));
    }
}
