use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cirerun::providers::teamcity::{PollPolicy, RetryPolicy};

/// Configuration file structure for cirerun.
///
/// Holds server defaults, retry and polling budgets, and the list of build
/// configurations that may be re-run. Passwords are never read from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub rerun: RerunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// TeamCity server address
    pub url: Option<String>,

    /// REST user
    pub user: Option<String>,

    /// Skip TLS certificate verification (self-signed internal servers)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Requests made before a transient HTTP error is given up
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollConfig {
    /// Inspections of the original build before giving up on it finishing
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,

    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: u64,

    /// Refuse to re-trigger while the original build is running
    #[serde(default = "default_true")]
    pub only_if_finished: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RerunConfig {
    /// Build configurations eligible for `--rerun`; empty allows all
    #[serde(default)]
    pub allowed_build_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            accept_invalid_certs: true,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            sleep_seconds: default_sleep_seconds(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: default_poll_attempts(),
            sleep_seconds: default_sleep_seconds(),
            only_if_finished: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    180
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_poll_attempts() -> u32 {
    120
}

fn default_sleep_seconds() -> u64 {
    30
}

impl RerunConfig {
    pub fn allows(&self, build_type_id: &str) -> bool {
        self.allowed_build_types.is_empty()
            || self.allowed_build_types.iter().any(|id| id == build_type_id)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cirerun.toml
    /// 3. ./cirerun.json
    /// 4. ./cirerun.yaml
    /// 5. ./cirerun.yml
    /// 6. `<config dir>/cirerun/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let mut candidates: Vec<PathBuf> = ["cirerun.toml", "cirerun.json", "cirerun.yaml", "cirerun.yml"]
            .iter()
            .map(PathBuf::from)
            .collect();

        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("cirerun").join("config.toml"));
        }

        for candidate in &candidates {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            sleep: Duration::from_secs(self.retry.sleep_seconds),
            timeout: Duration::from_secs(self.server.timeout_seconds),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            attempts: self.poll.attempts,
            interval: Duration::from_secs(self.poll.sleep_seconds),
        }
    }
}
