use std::path::PathBuf;
use std::time::Duration;

use crate::pool::Deployment;

/// Process configuration, read from `RIGLEDGER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub deployment: Deployment,
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

#[derive(Debug)]
pub enum ConfigError {
    ReadPools { path: PathBuf, source: std::io::Error },
    InvalidPools(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadPools { path, source } => {
                write!(f, "cannot read pool description {}: {source}", path.display())
            }
            ConfigError::InvalidPools(msg) => write!(f, "invalid pool description: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadPools { source, .. } => Some(source),
            ConfigError::InvalidPools(_) => None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let data_dir = PathBuf::from(lookup("RIGLEDGER_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let backup_dir = lookup("RIGLEDGER_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("backups"));

        let deployment = match lookup("RIGLEDGER_POOLS") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::ReadPools { path: path.clone(), source })?;
                Deployment::from_json_str(&text).map_err(ConfigError::InvalidPools)?
            }
            None => Deployment::default(),
        };

        Ok(Self {
            data_dir,
            backup_dir,
            deployment,
            cache_ttl: Duration::from_secs(number("RIGLEDGER_CACHE_TTL_SECS").unwrap_or(30)),
            sweep_interval: Duration::from_secs(number("RIGLEDGER_SWEEP_INTERVAL_SECS").unwrap_or(300).max(1)),
            compact_threshold: number("RIGLEDGER_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: lookup("RIGLEDGER_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        })
    }
}
