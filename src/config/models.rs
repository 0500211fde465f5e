use super::presets::Preset;
use crate::humanize::HumanDuration;
use crate::worker::ShutdownPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    /// Named download presets, keyed by lowercase name once loaded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub presets: BTreeMap<String, Preset>,
}

impl Config {
    /// Case-insensitive preset lookup
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(&name.trim().to_ascii_lowercase())
    }
}

/// `[app]` section.
///
/// The underscore keys are the names older `params.ini` files use; when
/// present they win over their modern counterparts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Default tracing filter, `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Numeric level (10 debug .. 50 critical) or level name
    #[serde(rename = "_log_level", default, skip_serializing_if = "Option::is_none")]
    pub legacy_log_level: Option<String>,
    /// Replaces the host part of `server.bind_addr`
    #[serde(rename = "_listen_ip", default, skip_serializing_if = "Option::is_none")]
    pub listen_ip: Option<IpAddr>,
    /// Replaces the port of `server.bind_addr`
    #[serde(rename = "_listen_port", default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            legacy_log_level: None,
            listen_ip: None,
            listen_port: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Largest accepted request body
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Concurrent downloads (`NB_WORKERS`)
    #[serde(default = "default_nb_workers")]
    pub nb_workers: usize,
    /// Retries after the first failed attempt
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Delay before the first retry, doubled on each further failure
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: HumanDuration,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: HumanDuration,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            nb_workers: default_nb_workers(),
            retry_limit: default_retry_limit(),
            retry_backoff: default_retry_backoff(),
            max_backoff: default_max_backoff(),
            shutdown: ShutdownPolicy::default(),
        }
    }
}

fn default_nb_workers() -> usize {
    4
}

fn default_retry_limit() -> u32 {
    2
}

fn default_retry_backoff() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_max_backoff() -> HumanDuration {
    HumanDuration::from_secs(300)
}

/// Redis coordination backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// When false (`DISABLE_REDIS`), store, index and queue live in memory
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Namespace for every key, lets deployments share a server
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Jobs popped by an instance silent for this long are recovered by the next one to start
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: HumanDuration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            lease_ttl: default_lease_ttl(),
        }
    }
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "mediabox".to_string()
}

fn default_lease_ttl() -> HumanDuration {
    HumanDuration::from_secs(30)
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Each job downloads into `{root}/{job_id}/`
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("downloads")
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// How long terminal jobs stay queryable (and deduplicate)
    #[serde(default = "default_job_ttl")]
    pub job_ttl: HumanDuration,
    #[serde(default = "default_prune_interval")]
    pub prune_interval: HumanDuration,
    /// Also remove the job's download directory when pruning
    #[serde(default)]
    pub delete_files: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl: default_job_ttl(),
            prune_interval: default_prune_interval(),
            delete_files: false,
        }
    }
}

fn default_job_ttl() -> HumanDuration {
    HumanDuration::from_secs(7 * 86_400)
}

fn default_prune_interval() -> HumanDuration {
    HumanDuration::from_secs(600)
}

/// Which download capability the workers invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    #[default]
    Ytdlp,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    #[serde(default)]
    pub kind: DownloaderKind,
    /// yt-dlp compatible executable
    #[serde(default = "default_program")]
    pub program: String,
    /// Passed before the generated arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Upper bound on a single attempt
    #[serde(default = "default_download_timeout")]
    pub timeout: HumanDuration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            kind: DownloaderKind::default(),
            program: default_program(),
            extra_args: Vec::new(),
            timeout: default_download_timeout(),
        }
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_download_timeout() -> HumanDuration {
    HumanDuration::from_secs(3600)
}
