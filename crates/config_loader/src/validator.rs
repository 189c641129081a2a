//! Config validation
//!
//! Rules:
//! - max_batch_size >= 1, max_wait_ms > 0, schedule_attempts >= 1
//! - dispatch max_attempts >= 1, initial_backoff_ms <= max_backoff_ms
//! - file store has a path
//! - sink name is non-empty and type-specific params are present

use contracts::{AppConfig, ContractError, SinkType, StoreKind};
use validator::Validate;

/// Validate an AppConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &AppConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_backoff(config)?;
    validate_store(config)?;
    validate_sink(config)?;
    Ok(())
}

/// Derived range checks on thresholds and retry counts
fn validate_ranges(config: &AppConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn validate_backoff(config: &AppConfig) -> Result<(), ContractError> {
    let dispatch = &config.dispatch;
    if dispatch.initial_backoff_ms > dispatch.max_backoff_ms {
        return Err(ContractError::config_validation(
            "dispatch.initial_backoff_ms / dispatch.max_backoff_ms",
            format!(
                "initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                dispatch.initial_backoff_ms, dispatch.max_backoff_ms
            ),
        ));
    }
    Ok(())
}

fn validate_store(config: &AppConfig) -> Result<(), ContractError> {
    if config.store.kind == StoreKind::File && config.store.path.is_none() {
        return Err(ContractError::config_validation(
            "store.path",
            "file store requires a state directory",
        ));
    }
    Ok(())
}

fn validate_sink(config: &AppConfig) -> Result<(), ContractError> {
    let sink = &config.sink;
    if sink.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "sink.name",
            "sink name cannot be empty",
        ));
    }

    let required = match sink.sink_type {
        SinkType::Log => None,
        SinkType::File => Some("path"),
        SinkType::Network => Some("addr"),
    };
    if let Some(param) = required {
        if !sink.params.contains_key(param) {
            return Err(ContractError::config_validation(
                format!("sink.params.{param}"),
                format!("{:?} sink requires '{param}'", sink.sink_type),
            ));
        }
    }
    Ok(())
}
