use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// YAML configuration. Every section may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub prime_pool: PrimePoolConfig,
    #[serde(default = "default_issuers")]
    pub issuers: Vec<String>,
    /// Index into `issuers` of the issuer that checks the masked identity.
    #[serde(default)]
    pub designated_issuer: usize,
    #[serde(default)]
    pub bloom: BloomConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimePoolConfig {
    #[serde(default = "default_pool_count")]
    pub count: usize,
    #[serde(default = "default_pool_bits")]
    pub bits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomConfig {
    #[serde(default = "default_expected_elements")]
    pub expected_elements: usize,
    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
    #[serde(default = "default_bits_per_count")]
    pub bits_per_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_sec")]
    pub ttl_sec: u64,
    #[serde(default = "default_io_timeout_sec")]
    pub io_timeout_sec: u64,
}

fn default_issuers() -> Vec<String> {
    vec![
        "issuer-one".to_string(),
        "issuer-two".to_string(),
        "issuer-three".to_string(),
    ]
}

fn default_pool_count() -> usize {
    16
}

fn default_pool_bits() -> u64 {
    256
}

fn default_expected_elements() -> usize {
    100
}

fn default_false_positive_rate() -> f64 {
    0.01
}

fn default_bits_per_count() -> u32 {
    1
}

fn default_ttl_sec() -> u64 {
    300
}

fn default_io_timeout_sec() -> u64 {
    30
}

impl Default for PrimePoolConfig {
    fn default() -> Self {
        Self {
            count: default_pool_count(),
            bits: default_pool_bits(),
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_elements: default_expected_elements(),
            false_positive_rate: default_false_positive_rate(),
            bits_per_count: default_bits_per_count(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_sec: default_ttl_sec(),
            io_timeout_sec: default_io_timeout_sec(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            prime_pool: PrimePoolConfig::default(),
            issuers: default_issuers(),
            designated_issuer: 0,
            bloom: BloomConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_sec)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_sec)
    }
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&file)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prime_pool.count == 0 {
            bail!("prime_pool.count must be > 0");
        }
        if self.prime_pool.bits < 2 {
            bail!("prime_pool.bits must be >= 2");
        }
        if self.issuers.is_empty() {
            bail!("at least one issuer is required");
        }
        if self.designated_issuer >= self.issuers.len() {
            bail!(
                "designated_issuer {} out of range for {} issuers",
                self.designated_issuer,
                self.issuers.len()
            );
        }
        if self.bloom.expected_elements == 0 {
            bail!("bloom.expected_elements must be > 0");
        }
        let rate = self.bloom.false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            bail!("bloom.false_positive_rate must be in (0, 1), got {}", rate);
        }
        if !matches!(self.bloom.bits_per_count, 1 | 2 | 4 | 8) {
            bail!(
                "bloom.bits_per_count must be 1, 2, 4 or 8, got {}",
                self.bloom.bits_per_count
            );
        }
        if self.session.ttl_sec == 0 || self.session.io_timeout_sec == 0 {
            bail!("session.ttl_sec and session.io_timeout_sec must be > 0");
        }
        Ok(())
    }
}
