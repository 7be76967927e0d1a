use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub spool: SpoolConfig,
    pub batch_posting_limit: usize,
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,
    pub endpoint: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Base file name of the rolling writer. Spool files are expected at
    /// `<base_path>*.json`; the bookmark lives at `<base_path>.bookmark`.
    pub base_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub stream: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.spool.base_path = expand_tilde(&config.spool.base_path);
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.batch_posting_limit == 0 {
        return Err(ConfigError::Validation(
            "batch_posting_limit must be at least 1".to_string(),
        ));
    }
    if config.tick_period.is_zero() {
        return Err(ConfigError::Validation(
            "tick_period must be greater than zero".to_string(),
        ));
    }
    if config.endpoint.url.is_empty() {
        return Err(ConfigError::Validation(
            "endpoint.url must not be empty".to_string(),
        ));
    }
    if config.endpoint.stream.is_empty() {
        return Err(ConfigError::Validation(
            "endpoint.stream must not be empty".to_string(),
        ));
    }
    if config.spool.base_path.file_name().is_none() {
        return Err(ConfigError::Validation(format!(
            "spool.base_path '{}' has no file name",
            config.spool.base_path.display()
        )));
    }
    Ok(())
}

/// Expands a leading tilde to the user's home directory; anything else is
/// returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path from an explicit argument or the default
/// locations: `~/.config/barge/config.yml`, then `/etc/barge/config.yml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/barge/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/barge/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

pub fn generate_starter_config() -> String {
    r#"# barge configuration
#
# barge tails the spool files an external rolling writer produces at
# <base_path>*.json, ships complete lines to the ingestion endpoint in
# batches, and records its progress in <base_path>.bookmark.

spool:
  # Base file name of the rolling writer (not a directory).
  base_path: ~/barge/buffer/events

# Maximum number of records submitted in a single batch.
batch_posting_limit: 500

# How often unshipped records are looked for.
tick_period: 5s

endpoint:
  # Ingestion URL batches are POSTed to.
  url: http://localhost:8080/ingest
  # Logical stream name records are filed under.
  stream: app-logs
  # Per-request timeout.
  timeout: 30s
"#
    .to_string()
}
