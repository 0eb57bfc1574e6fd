use crate::config::types::{Config, EngineConfig, HttpConfig, StorageConfig};
use crate::ConfigError;

/// Smallest per-subscriber progress buffer accepted
pub const MIN_PROGRESS_BUFFER: usize = 4;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_http_config(&config.http)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates worker pool configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.workers > 1024 {
        return Err(ConfigError::Validation(format!(
            "workers must be at most 1024, got {}",
            config.workers
        )));
    }

    if config.queue_capacity < 1 || config.queue_capacity > 10_000 {
        return Err(ConfigError::Validation(format!(
            "queue-capacity must be between 1 and 10000, got {}",
            config.queue_capacity
        )));
    }

    if config.crawl_timeout_secs < 1 || config.crawl_timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "crawl-timeout-secs must be between 1 and 600, got {}",
            config.crawl_timeout_secs
        )));
    }

    if config.progress_buffer < MIN_PROGRESS_BUFFER {
        return Err(ConfigError::Validation(format!(
            "progress-buffer must be >= {}, got {}",
            MIN_PROGRESS_BUFFER, config.progress_buffer
        )));
    }

    Ok(())
}

/// Validates HTTP client configuration
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    if config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "connect-timeout-secs must be >= 1, got {}",
            config.connect_timeout_secs
        )));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be at most 20, got {}",
            config.max_redirects
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
