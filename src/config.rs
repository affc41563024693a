use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ecosystem::Ecosystem;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default cache entry lifetime in days
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

/// TTL applied to cached metadata lookups that produced no usable answer
pub const NEGATIVE_CACHE_TTL_HOURS: i64 = 24;

/// Length of the rate-limit window in seconds
pub const RATE_WINDOW_SECS: u64 = 60;

/// Upper bound for the exponential backoff in seconds
pub const MAX_BACKOFF_SECS: f64 = 30.0;

/// Base of the exponential backoff in seconds
pub const BASE_BACKOFF_SECS: f64 = 0.1;

/// Timeout for `<tool> --version` prerequisite probes (10 seconds)
pub const PREREQUISITE_TIMEOUT_SECS: u64 = 10;

/// Timeout for building a container image (5 minutes)
pub const IMAGE_BUILD_TIMEOUT_SECS: u64 = 300;

/// Timeout for running an analysis container (3 minutes)
pub const CONTAINER_RUN_TIMEOUT_SECS: u64 = 180;

/// Timeout for removing a container image (30 seconds)
pub const IMAGE_REMOVE_TIMEOUT_SECS: u64 = 30;

/// Timeout for uninstalling a tested package (30 seconds)
pub const UNINSTALL_TIMEOUT_SECS: u64 = 30;

/// Timeout for `file` architecture probes (5 seconds)
pub const FILE_PROBE_TIMEOUT_SECS: u64 = 5;

/// Maximum number of native files inspected with `file`
pub const MAX_ARCH_PROBE_FILES: usize = 5;

/// Default OS for container images
pub const DEFAULT_OS_VERSION: &str = "amazon-linux-2023";

/// Application configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub isolation: IsolationConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Cache and rate governor configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory holding one `<ecosystem>_cache.json` per ecosystem.
    /// Defaults to `<data_dir>/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Lifetime of a cache entry in days
    pub max_age_days: i64,
    pub rate_limiting: bool,
    /// Limits keyed by registry name (pypi, npm, maven, nuget, rubygems)
    pub rate_limits: HashMap<String, RateLimitConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: None,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            rate_limiting: true,
            rate_limits: default_rate_limits(),
        }
    }
}

impl CacheConfig {
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(cache_dir)
    }
}

/// Per-registry request quota
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

fn default_rate_limits() -> HashMap<String, RateLimitConfig> {
    let standard = RateLimitConfig {
        requests_per_minute: 60,
    };
    HashMap::from([
        ("nuget".to_string(), standard),
        ("pypi".to_string(), standard),
        ("npm".to_string(), standard),
        ("maven".to_string(), standard),
        (
            "rubygems".to_string(),
            RateLimitConfig {
                requests_per_minute: 300,
            },
        ),
    ])
}

/// Isolation environment configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IsolationConfig {
    /// Run analyses inside disposable containers instead of native subprocesses
    pub use_containers: bool,
    pub os_version: String,
    /// Keep work directories and images after the run
    pub preserve_for_debug: bool,
    /// Runtime version per ecosystem, used for container base images
    pub runtime_versions: HashMap<Ecosystem, String>,
    /// Permanent directory receiving a copy of each result file
    pub output_dir: Option<PathBuf>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            use_containers: false,
            os_version: DEFAULT_OS_VERSION.to_string(),
            preserve_for_debug: false,
            runtime_versions: HashMap::new(),
            output_dir: None,
        }
    }
}

impl IsolationConfig {
    pub fn runtime_version(&self, ecosystem: Ecosystem) -> String {
        self.runtime_versions
            .get(&ecosystem)
            .cloned()
            .unwrap_or_else(|| ecosystem.default_runtime_version().to_string())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Filter directive used when GRAVITON_PROBE_LOG is unset
    pub level: String,
    pub log_file: Option<PathBuf>,
    /// Emit the log file as JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            json: true,
        }
    }
}

/// Returns the path to the data directory for graviton-probe.
/// Uses $XDG_DATA_HOME/graviton-probe if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/graviton-probe,
/// or ./graviton-probe if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default cache directory.
pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

/// Returns the default log file path.
pub fn log_path() -> PathBuf {
    data_dir().join("graviton-probe.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("graviton-probe")
}
