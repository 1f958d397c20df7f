use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_upload_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "max_upload_bytes must be greater than zero".to_string(),
        });
    }

    if config.separation.program.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "separation.program must not be empty".to_string(),
        });
    }

    if config.separation.max_concurrent == 0 {
        return Err(ConfigError::Validation {
            message: "separation.max_concurrent must be at least 1".to_string(),
        });
    }

    if config.retention.ttl_secs == 0 || config.retention.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "retention ttl_secs and sweep_interval_secs must be positive".to_string(),
        });
    }

    if let Some(decoder) = &config.normalizer.external_decoder {
        if decoder.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "normalizer.external_decoder must be null or a program name".to_string(),
            });
        }
    }

    Ok(())
}
