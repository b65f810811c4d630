use crate::types::{default_variants, ProbeConfig, Variant};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid variant prefix: {0:?} (expected http:// or https:// with an optional subdomain ending in '.')")]
    InvalidVariant(String),
    #[error("Duplicate variant: {0}")]
    DuplicateVariant(String),
    #[error("At least one variant must be configured")]
    NoVariants,
    #[error("{0} must be at least 1")]
    ZeroBound(&'static str),
}

/// Everything one run needs. Every field has a default, so a config file only
/// has to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Ranked domain list, one `rank,...,domain` line per unit.
    pub input_list: PathBuf,
    /// Scheme/subdomain prefixes probed for every unit, in order.
    pub variants: Vec<Variant>,
    /// Number of worker threads, and the cap on shard count.
    pub workers: usize,
    /// Maximum number of units per shard.
    pub shard_capacity: usize,
    pub probe: ProbeConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl ReconConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variants.is_empty() {
            return Err(ConfigError::NoVariants);
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if !seen.insert(variant) {
                return Err(ConfigError::DuplicateVariant(variant.to_string()));
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroBound("workers"));
        }
        if self.shard_capacity == 0 {
            return Err(ConfigError::ZeroBound("shard_capacity"));
        }
        Ok(())
    }
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            input_list: PathBuf::from("res/top-1m.csv"),
            variants: default_variants(),
            workers: 20,
            shard_capacity: 32767,
            probe: ProbeConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection URL, e.g. `sqlite://recon.db`.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://recon.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub file: PathBuf,
    /// Filter directive for the log file: `error`, `warn`, `info`, `debug`,
    /// or a full `EnvFilter` expression.
    pub level: String,
    /// Filter directive for console output; `off` silences it.
    pub console_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("recon.log"),
            level: "info".to_string(),
            console_level: "info".to_string(),
        }
    }
}
