//! Configuration loading for Nodulyx.
//! Reads nodulyx.toml from the current directory or path in NODULYX_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use nodulyx_common::{NodulyxError, Result};
use nodulyx_rules::cache::RuleCacheConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_ttl_secs()         -> u64 { 300 }
fn default_fetch_timeout_ms() -> u64 { 5000 }
fn default_fetch_retries()    -> u32 { 3 }
fn default_backoff_ms()       -> u64 { 250 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            fetch_retries: default_fetch_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl CacheConfig {
    pub fn to_rule_cache_config(&self) -> RuleCacheConfig {
        RuleCacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            fetch_retries: self.fetch_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_continue_on_error() -> bool { true }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            continue_on_error: default_continue_on_error(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| NodulyxError::Config(format!("bad config: {e}")))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NodulyxError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from NODULYX_CONFIG, then ./nodulyx.toml, then defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("NODULYX_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        let local = Path::new("nodulyx.toml");
        if local.exists() {
            return Self::load_from(local);
        }
        Ok(Self::default())
    }
}
