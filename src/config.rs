use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use facegate_match::{DescriptorRules, LivenessPolicy, QualityWeights};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static FACE_STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_STORE_PREFIX").unwrap_or("/var/lib/facegate"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_dir: PathBuf,
    pub matching: MatchingConfig,
    pub liveness: LivenessPolicy,
    pub quality: QualityWeights,
    pub index: IndexConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub descriptor_len: usize,
    pub min_confidence: f64,
    pub similarity_threshold: f64,
    pub require_liveness: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub ttl_secs: u64,
    pub rebuild_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// How far back verification events count towards accuracy.
    pub window_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: FACE_STORE_PREFIX.to_path_buf(),
            matching: MatchingConfig::default(),
            liveness: LivenessPolicy::default(),
            quality: QualityWeights::default(),
            index: IndexConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let rules = DescriptorRules::default();
        Self {
            descriptor_len: rules.expected_len,
            min_confidence: rules.min_confidence,
            similarity_threshold: 0.6,
            require_liveness: true,
        }
    }
}

impl MatchingConfig {
    pub fn descriptor_rules(&self) -> DescriptorRules {
        DescriptorRules {
            expected_len: self.descriptor_len,
            min_confidence: self.min_confidence,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            rebuild_timeout_ms: 2000,
        }
    }
}

impl IndexConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_timeout_ms)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { window_days: 30 }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
