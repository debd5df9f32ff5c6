use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: must be at least 1 worker")]
    NoWorkers { name: &'static str },
    #[error("{name}: invalid value {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Everything the sync run needs from the environment. Credentials are read
/// here but validated by the API client (blank values are rejected there).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub username: String,
    pub password: String,
    pub base_url: Option<String>,
    pub include_recipes: bool,
    pub include_categories: bool,
    pub workers: usize,
    /// `None` disables purge entirely; `Some(0)` purges immediately.
    pub purge_after: Option<Duration>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("LARDER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        let username = std::env::var("LARDER_USER").unwrap_or_default();
        let password = std::env::var("LARDER_PASSWORD").unwrap_or_default();
        let base_url = std::env::var("LARDER_BASE_URL").ok();
        let include_recipes = read_bool_env("LARDER_SYNC_RECIPES", true);
        let include_categories = read_bool_env("LARDER_SYNC_CATEGORIES", true);
        let workers = parse_workers("LARDER_SYNC_WORKERS", std::env::var("LARDER_SYNC_WORKERS").ok())?;
        let purge_after = parse_purge_after(
            "LARDER_PURGE_AFTER_SECS",
            std::env::var("LARDER_PURGE_AFTER_SECS").ok(),
        )?;

        Ok(Self {
            data_dir,
            username,
            password,
            base_url,
            include_recipes,
            include_categories,
            workers,
            purge_after,
        })
    }
}

fn parse_workers(name: &'static str, value: Option<String>) -> Result<usize, ConfigError> {
    let Some(value) = value else {
        return Ok(DEFAULT_WORKERS);
    };
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue { name, value: value.clone() })?;
    if parsed == 0 {
        return Err(ConfigError::NoWorkers { name });
    }
    Ok(parsed)
}

fn parse_purge_after(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        // Purge stays off unless explicitly requested.
        return Ok(None);
    };
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidValue { name, value: value.clone() })?;
    if parsed < 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs(parsed as u64)))
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
