use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SEARCH_QUIET_MS: u64 = 500;
pub const MAX_SEARCH_QUIET_MS: u64 = 5000;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    NotInteger { key: &'static str, value: String },
    #[error("{key} must be <= {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        max: u64,
    },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
    pub search_quiet: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            workspace: None,
            search_quiet: Duration::from_millis(DEFAULT_SEARCH_QUIET_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(v) = non_empty(lookup("CONDUCTD_LOG")) {
            cfg.log_filter = v;
        }
        cfg.workspace = non_empty(lookup("CONDUCTD_WORKSPACE")).map(PathBuf::from);
        if let Some(v) = non_empty(lookup("CONDUCTD_SEARCH_QUIET_MS")) {
            let ms: u64 = v.parse().map_err(|_| ConfigError::NotInteger {
                key: "CONDUCTD_SEARCH_QUIET_MS",
                value: v.clone(),
            })?;
            if ms > MAX_SEARCH_QUIET_MS {
                return Err(ConfigError::OutOfRange {
                    key: "CONDUCTD_SEARCH_QUIET_MS",
                    value: ms,
                    max: MAX_SEARCH_QUIET_MS,
                });
            }
            cfg.search_quiet = Duration::from_millis(ms);
        }
        Ok(cfg)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
