//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, bucket counts, sizes)
//! - Detect duplicate integration names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LayerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{CircuitBreakerConfig, LayerConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &LayerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.memory.enable_l1 && config.memory.max_size == 0 {
        errors.push(ValidationError::new("memory.max_size", "must be greater than 0"));
    }
    if config.memory.ttl_secs == 0 {
        errors.push(ValidationError::new("memory.ttl_secs", "must be greater than 0"));
    }
    if config.redis.compression_threshold == 0 {
        errors.push(ValidationError::new(
            "redis.compression_threshold",
            "must be greater than 0",
        ));
    }
    if config.redis.guard_threshold == 0 {
        errors.push(ValidationError::new("redis.guard_threshold", "must be greater than 0"));
    }

    validate_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    let mut seen = HashSet::new();
    for (i, integration) in config.integrations.iter().enumerate() {
        let prefix = format!("integrations[{}]", i);
        if integration.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
        } else if !seen.insert(integration.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate integration '{}'", integration.name),
            ));
        }
        if integration.retries == 0 {
            errors.push(ValidationError::new(
                format!("{}.retries", prefix),
                "must allow at least one attempt",
            ));
        }
        if integration.timeout_ms == 0 {
            errors.push(ValidationError::new(
                format!("{}.timeout_ms", prefix),
                "must be greater than 0",
            ));
        }
        let merged = integration
            .circuit_breaker
            .apply(&config.circuit_breaker, integration.timeout_ms);
        validate_breaker(&format!("{}.circuit_breaker", prefix), &merged, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.error_threshold_percentage > 100 {
        errors.push(ValidationError::new(
            format!("{}.error_threshold_percentage", prefix),
            "must be between 0 and 100",
        ));
    }
    if config.rolling_count_buckets == 0 {
        errors.push(ValidationError::new(
            format!("{}.rolling_count_buckets", prefix),
            "must be greater than 0",
        ));
    } else if config.rolling_count_timeout_ms < config.rolling_count_buckets as u64 {
        errors.push(ValidationError::new(
            format!("{}.rolling_count_timeout_ms", prefix),
            "buckets must be at least 1ms wide",
        ));
    }
}
