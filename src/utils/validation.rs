use crate::utils::error::{EtlError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// DynamoDB table naming rules: 3-255 chars of `[A-Za-z0-9_.-]`.
pub fn validate_table_name(field_name: &str, table_name: &str) -> Result<()> {
    if table_name.len() < 3 || table_name.len() > 255 {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: table_name.to_string(),
            reason: "Table name must be between 3 and 255 characters".to_string(),
        });
    }

    if !table_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: table_name.to_string(),
            reason: "Table name can only contain letters, numbers, underscores, hyphens, and dots"
                .to_string(),
        });
    }

    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// Parses a numeric parameter, keeping the raw text in the error.
pub fn parse_number<T: std::str::FromStr>(field_name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: raw.to_string(),
            reason: "Value must be a whole number".to_string(),
        })
}
