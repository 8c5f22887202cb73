use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Release feed queried by the installer unless overridden.
pub const DEFAULT_RELEASE_FEED_URL: &str =
    "https://api.github.com/repos/router-for-me/CLIProxyAPIPlus/releases/latest";

const DEFAULT_PORT: u16 = 8317;
const MAX_RETRY_INTERVAL_SECS: u32 = 30;

/// How the managed proxy spreads requests across accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    RoundRobin,
    FillFirst,
}

impl RoutingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin => "round-robin",
            RoutingStrategy::FillFirst => "fill-first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaExceededBehavior {
    #[default]
    Skip,
    Stop,
    Continue,
}

/// User settings for the manager and the proxy it launches.
/// Missing fields fall back to their defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub routing_strategy: RoutingStrategy,
    pub auto_start: bool,
    pub debug_mode: bool,
    pub log_to_file: bool,
    pub usage_stats_enabled: bool,
    pub request_retry_count: u32,
    pub api_keys: Vec<String>,
    pub quota_exceeded_behavior: QuotaExceededBehavior,
    pub release_feed_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            routing_strategy: RoutingStrategy::default(),
            auto_start: false,
            debug_mode: false,
            log_to_file: false,
            usage_stats_enabled: true,
            request_retry_count: 3,
            api_keys: Vec::new(),
            quota_exceeded_behavior: QuotaExceededBehavior::default(),
            release_feed_url: DEFAULT_RELEASE_FEED_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Loads settings from `path`, returning defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// The YAML file handed to the managed process via `-config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfigFile {
    pub host: String,
    pub port: u16,
    pub auth_dir: String,
    pub api_keys: Vec<String>,
    pub remote_management: RemoteManagement,
    pub debug: bool,
    pub logging_to_file: bool,
    pub usage_statistics_enabled: bool,
    pub routing: Routing,
    pub quota_exceeded: QuotaExceeded,
    pub request_retry: u32,
    pub max_retry_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteManagement {
    pub allow_remote: bool,
    pub secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub strategy: RoutingStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuotaExceeded {
    pub switch_project: bool,
    pub switch_preview_model: bool,
}

impl ProxyConfigFile {
    /// Builds the complete file from settings. Nothing is carried over from a
    /// previous file; every field is derived from the inputs.
    pub fn from_settings(config: &AppConfig, auth_dir: &Path, management_key: &str) -> Self {
        let api_keys = if config.api_keys.is_empty() {
            vec![format!("local-{}", random_token(24))]
        } else {
            config.api_keys.clone()
        };

        Self {
            host: "127.0.0.1".to_string(),
            port: config.port,
            auth_dir: auth_dir.to_string_lossy().into_owned(),
            api_keys,
            remote_management: RemoteManagement {
                allow_remote: false,
                secret_key: management_key.to_string(),
            },
            debug: config.debug_mode,
            logging_to_file: config.log_to_file,
            usage_statistics_enabled: config.usage_stats_enabled,
            routing: Routing {
                strategy: config.routing_strategy,
            },
            quota_exceeded: QuotaExceeded {
                switch_project: true,
                switch_preview_model: true,
            },
            request_retry: config.request_retry_count,
            max_retry_interval: MAX_RETRY_INTERVAL_SECS,
        }
    }

    /// Replaces the file at `path`; the old contents are never merged.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .context("Proxy config path has no parent directory")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let yaml = serde_yaml::to_string(self).context("Failed to serialize proxy config")?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create staging file for proxy config")?;
        staged
            .write_all(yaml.as_bytes())
            .context("Failed to write proxy config")?;
        staged
            .persist(path)
            .with_context(|| format!("Failed to replace proxy config: {}", path.display()))?;
        Ok(())
    }
}

/// Generates the per-manager secret used for the management endpoint.
pub fn generate_management_key() -> String {
    format!("pm-{}", random_token(32))
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[path = "tests/app_config_tests.rs"]
mod tests;
