use super::models::{Config, DownloaderKind};
use std::time::Duration;
use thiserror::Error;

/// Shortest lease that still leaves room for a renewal round trip
const MIN_LEASE_TTL: Duration = Duration::from_secs(1);

const REDIS_SCHEMES: &[&str] = &["redis", "rediss", "unix", "redis+unix"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("nb_workers must be at least 1")]
    InvalidWorkerCount,

    #[error("retry_backoff ({backoff}) exceeds max_backoff ({max})")]
    InvalidBackoff { backoff: String, max: String },

    #[error("Retention duration must be positive: {field}")]
    InvalidRetention { field: &'static str },

    #[error("Invalid Redis URL scheme '{scheme}', expected one of redis://, rediss://, unix://")]
    InvalidRedisScheme { scheme: String },

    #[error("Redis key prefix must not be empty")]
    EmptyKeyPrefix,

    #[error("Redis lease_ttl must be at least 1s, got {0}")]
    InvalidLeaseTtl(String),

    #[error("Storage root must not be empty")]
    EmptyStorageRoot,

    #[error("Downloader program must be set for the yt-dlp downloader")]
    MissingDownloaderProgram,

    #[error("Downloader timeout must be positive")]
    InvalidDownloaderTimeout,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_workers(config)?;
    validate_redis(config)?;
    validate_storage(config)?;
    validate_retention(config)?;
    validate_downloader(config)?;
    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    let workers = &config.workers;
    if workers.nb_workers == 0 {
        return Err(ValidationError::InvalidWorkerCount);
    }
    if workers.retry_backoff > workers.max_backoff {
        return Err(ValidationError::InvalidBackoff {
            backoff: workers.retry_backoff.to_string(),
            max: workers.max_backoff.to_string(),
        });
    }
    Ok(())
}

/// Only checked when Redis is in use; a disabled backend may keep a stale URL
fn validate_redis(config: &Config) -> Result<(), ValidationError> {
    if !config.redis.enabled {
        return Ok(());
    }

    let scheme = config
        .redis
        .url
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or_default();
    if !REDIS_SCHEMES.contains(&scheme) {
        return Err(ValidationError::InvalidRedisScheme {
            scheme: scheme.to_string(),
        });
    }

    if config.redis.key_prefix.trim().is_empty() {
        return Err(ValidationError::EmptyKeyPrefix);
    }
    if config.redis.lease_ttl.as_duration() < MIN_LEASE_TTL {
        return Err(ValidationError::InvalidLeaseTtl(config.redis.lease_ttl.to_string()));
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.root.as_os_str().is_empty() {
        return Err(ValidationError::EmptyStorageRoot);
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.job_ttl.is_zero() {
        return Err(ValidationError::InvalidRetention { field: "job_ttl" });
    }
    if config.retention.prune_interval.is_zero() {
        return Err(ValidationError::InvalidRetention {
            field: "prune_interval",
        });
    }
    Ok(())
}

fn validate_downloader(config: &Config) -> Result<(), ValidationError> {
    let downloader = &config.downloader;
    if downloader.kind == DownloaderKind::Ytdlp && downloader.program.trim().is_empty() {
        return Err(ValidationError::MissingDownloaderProgram);
    }
    if downloader.timeout.is_zero() {
        return Err(ValidationError::InvalidDownloaderTimeout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;

    fn create_test_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = create_test_config();
        config.workers.nb_workers = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidWorkerCount)
        ));
    }

    #[test]
    fn test_backoff_above_max() {
        let mut config = create_test_config();
        config.workers.retry_backoff = HumanDuration::from_secs(600);
        config.workers.max_backoff = HumanDuration::from_secs(60);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidBackoff { .. })
        ));
    }

    #[test]
    fn test_invalid_redis_scheme() {
        let mut config = create_test_config();
        config.redis.url = "http://localhost:6379".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRedisScheme { .. })
        ));

        // Irrelevant once Redis is disabled
        config.redis.enabled = false;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_short_lease_ttl() {
        let mut config = create_test_config();
        config.redis.lease_ttl = HumanDuration::from_millis(200);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLeaseTtl(ttl)) if ttl == "200ms"
        ));
    }

    #[test]
    fn test_zero_retention_ttl() {
        let mut config = create_test_config();
        config.retention.job_ttl = HumanDuration::from_secs(0);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetention { field: "job_ttl" })
        ));
    }

    #[test]
    fn test_http_downloader_needs_no_program() {
        let mut config = create_test_config();
        config.downloader.program = String::new();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingDownloaderProgram)
        ));

        config.downloader.kind = DownloaderKind::Http;
        assert!(validate(&config).is_ok());
    }
}
