//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::LayerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<LayerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: LayerConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build configuration from defaults plus the environment only.
pub fn config_from_env() -> Result<LayerConfig, ConfigError> {
    let mut config = LayerConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `REDIS_*` environment variables on top of the file configuration.
///
/// `REDIS_URL` (or `REDIS_TLS_URL`) overrides the individual parts.
pub fn apply_env_overrides<F>(config: &mut LayerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let redis = &mut config.redis;

    if let Some(url) = lookup("REDIS_URL").or_else(|| lookup("REDIS_TLS_URL")) {
        redis.url = Some(url);
    }
    if let Some(host) = lookup("REDIS_HOST") {
        redis.host = Some(host);
    }
    if let Some(port) = lookup("REDIS_PORT") {
        match port.parse() {
            Ok(port) => redis.port = port,
            Err(_) => tracing::warn!(value = %port, "Ignoring invalid REDIS_PORT"),
        }
    }
    if let Some(password) = lookup("REDIS_PASSWORD") {
        redis.password = Some(password);
    }
    if let Some(db) = lookup("REDIS_DB") {
        match db.parse() {
            Ok(db) => redis.db = db,
            Err(_) => tracing::warn!(value = %db, "Ignoring invalid REDIS_DB"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LayerConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("REDIS_HOST", "redis.local"),
                ("REDIS_PORT", "6380"),
                ("REDIS_DB", "not-a-number"),
            ]),
        );
        assert_eq!(config.redis.host.as_deref(), Some("redis.local"));
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.db, 0);
    }

    #[test]
    fn test_tls_url_fallback() {
        let mut config = LayerConfig::default();
        apply_env_overrides(&mut config, env(&[("REDIS_TLS_URL", "rediss://secure:6379")]));
        assert_eq!(config.redis.url.as_deref(), Some("rediss://secure:6379"));
        assert!(config.redis.is_configured());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[memory]
max_size = 50

[circuit_breaker]
reset_timeout_ms = 1000

[[integrations]]
name = "ANM"
retries = 5
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.memory.max_size, 50);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 1000);
        assert_eq!(config.integrations.len(), 1);
        assert_eq!(config.integrations[0].retries, 5);
        assert_eq!(config.integrations[0].retry_delay_ms, 1000);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[circuit_breaker]\nerror_threshold_percentage = 150").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("error_threshold_percentage"));
    }
}
