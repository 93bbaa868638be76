use crate::utils::error::{Result, StackError};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_port(field_name: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(StackError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: port.to_string(),
            reason: "Port 0 means 'any port' and cannot be planned".to_string(),
        });
    }
    Ok(())
}

/// 服務名稱會變成 compose service 名與環境變數前綴
pub fn validate_service_name(field_name: &str, name: &str) -> Result<()> {
    validate_non_empty_string(field_name, name)?;

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(StackError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: name.to_string(),
            reason: format!("Unsupported character '{}' (use letters, digits, '-' or '_')", bad),
        });
    }
    Ok(())
}

pub fn validate_env_var_name(field_name: &str, name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');

    if !valid {
        return Err(StackError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: name.to_string(),
            reason: "Variable names must match [A-Z_][A-Z0-9_]*".to_string(),
        });
    }
    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(StackError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StackError::InvalidConfigValueError {
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
        return Err(StackError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port() {
        assert!(validate_port("postgres.internal_port", 5432).is_ok());
        assert!(validate_port("postgres.internal_port", 0).is_err());
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("services.name", "open-webui").is_ok());
        assert!(validate_service_name("services.name", "neo4j_browser").is_ok());
        assert!(validate_service_name("services.name", "").is_err());
        assert!(validate_service_name("services.name", "my service").is_err());
    }

    #[test]
    fn test_validate_env_var_name() {
        assert!(validate_env_var_name("external_var", "KONG_HTTP_PORT").is_ok());
        assert!(validate_env_var_name("external_var", "kong_port").is_err());
        assert!(validate_env_var_name("external_var", "9PORT").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("probe_window", 1000u32, 1, 65535).is_ok());
        assert!(validate_range("probe_window", 0u32, 1, 65535).is_err());
    }
}
