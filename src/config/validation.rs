//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacity ≥ 1, rates and intervals > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    let limit = &config.rate_limit;
    if limit.capacity == 0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be at least 1"));
    }
    if !(limit.refill_rate_per_second.is_finite() && limit.refill_rate_per_second > 0.0) {
        errors.push(ValidationError::new(
            "rate_limit.refill_rate_per_second",
            "must be a positive number",
        ));
    }
    if limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_secs",
            "must be greater than zero",
        ));
    }
    if limit.idle_eviction_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.idle_eviction_secs",
            "must be greater than zero",
        ));
    }

    if config.auth.authentication_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "auth.authentication_ttl_secs",
            "must be greater than zero",
        ));
    }
    if config.auth.activation_ttl_secs == 0 {
        errors.push(ValidationError::new("auth.activation_ttl_secs", "must be greater than zero"));
    }
    if config.auth.purge_interval_secs == 0 {
        errors.push(ValidationError::new("auth.purge_interval_secs", "must be greater than zero"));
    }

    if config.background.max_concurrency == Some(0) {
        errors.push(ValidationError::new(
            "background.max_concurrency",
            "must be at least 1 when set",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
