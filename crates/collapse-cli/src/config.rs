//! Configuration management for the Collapse CLI.

use anyhow::{Context, Result};
use collapse::distributed::coordinator::{CoordinatorConfig, OperationThreading};
use collapse::distributed::merge::GroupCountMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name searched for in the current and parent directories.
pub const CONFIG_FILE: &str = "collapse.toml";

/// Collapse project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub shard: ShardConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// Where each shard of the cluster is served.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub shards: Vec<ShardAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardAddress {
    pub id: u32,
    /// host:port of the node serving the shard
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub threading: OperationThreading,
    #[serde(default)]
    pub group_count: GroupCountMode,
    /// Per-call shard timeout; unset waits for the RPC deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_size")]
    pub default_size: u32,
}

/// Shards this node serves with `collapse serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub shards: Vec<ShardData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardData {
    pub id: u32,
    /// JSON array of documents
    pub data: PathBuf,
}

// Default value functions
fn default_size() -> u32 { 10 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 7400 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threading: OperationThreading::default(),
            group_count: GroupCountMode::default(),
            timeout_ms: None,
            default_size: default_size(),
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shards: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            threading: self.threading,
            group_count: self.group_count,
            shard_timeout_ms: self.timeout_ms,
        }
    }
}

impl Config {
    /// Load config from collapse.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Generate default config as TOML string.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("Failed to serialize config")
    }
}

/// Find collapse.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
