use super::models::Config;
use super::presets::{self, Preset};
use config::{ConfigError, Environment, File, Source};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIABOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "params/params.ini";
const ENV_PREFIX: &str = "MEDIABOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. Config file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables
/// 5. Deployment variables (`NB_WORKERS`, `DISABLE_REDIS`, ...), highest
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_at(config_path)
}

/// Same as [`load`] with an explicit file path
pub fn load_at(config_path: PathBuf) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    apply_deployment_env(&mut config, |name| env::var(name).ok())?;
    Ok(config)
}

/// Apply the short deployment variables the container images document.
///
/// `lookup` resolves a variable name; tests pass a map instead of the
/// process environment.
pub fn apply_deployment_env<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(value) = lookup("NB_WORKERS") {
        config.workers.nb_workers = value.trim().parse().map_err(|_| {
            ConfigError::Message(format!("NB_WORKERS must be a positive integer, got '{}'", value))
        })?;
    }

    if let Some(value) = lookup("DISABLE_REDIS") {
        config.redis.enabled = !parse_flag(&value).ok_or_else(|| {
            ConfigError::Message(format!("DISABLE_REDIS must be a boolean, got '{}'", value))
        })?;
    }

    if let Some(value) = lookup("REDIS_URL") {
        config.redis.url = value;
    }

    if let Some(value) = lookup("DOWNLOAD_DIR") {
        config.storage.root = PathBuf::from(value);
    }

    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Format is picked from the extension (.ini, .toml, .yaml, .json)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // MEDIABOX__WORKERS__NB_WORKERS -> workers.nb_workers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let built = builder.build()?;
    let sections = built.collect()?;
    let mut config: Config = built.try_deserialize()?;

    apply_app_section(&mut config)?;

    // [preset:NAME] sections join any [presets.NAME] tables
    let mut raw = std::mem::take(&mut config.presets);
    for (section, value) in sections {
        if let Some(name) = presets::section_name(&section) {
            let preset: Preset = value.try_deserialize()?;
            raw.insert(name, preset);
        }
    }
    config.presets = presets::expand(raw).map_err(|e| ConfigError::Message(e.to_string()))?;

    Ok(config)
}

/// Fold the underscore keys of `[app]` into the settings they stand for
fn apply_app_section(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(level) = &config.app.legacy_log_level {
        config.app.log_level = log_filter(level).ok_or_else(|| {
            ConfigError::Message(format!(
                "_log_level must be a level name or number, got '{level}'"
            ))
        })?;
    }

    let bind = config.server.bind_addr;
    config.server.bind_addr = SocketAddr::new(
        config.app.listen_ip.unwrap_or(bind.ip()),
        config.app.listen_port.unwrap_or(bind.port()),
    );
    Ok(())
}

/// Tracing filter for a numeric level (10 debug, 20 info, 30 warning,
/// 40 error, 50 critical) or a level name
fn log_filter(level: &str) -> Option<String> {
    let level = level.trim().to_ascii_lowercase();
    let filter = match level.parse::<u32>() {
        Ok(0..10) => "trace",
        Ok(10..20) => "debug",
        Ok(20..30) => "info",
        Ok(30..40) => "warn",
        Ok(_) => "error",
        Err(_) => match level.as_str() {
            "trace" | "notset" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" | "critical" | "fatal" => "error",
            _ => return None,
        },
    };
    Some(filter.to_string())
}
