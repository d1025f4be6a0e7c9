use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Deserializer, de};
use url::Url;

use crate::error::ConfigError;

const CONFIG_FILES: [&str; 2] = ["config.yml", "/etc/config.yml"];

/// Fully resolved settings for the monitor.
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Url,
    pub store_url: Url,
    pub products_file: PathBuf,
    pub user_agent: String,
    pub poll_interval: Duration,
    pub category_retry: Duration,
    pub request_timeout: Duration,
    pub resolve_attempts: u32,
    pub resolve_backoff: Duration,
    pub rate_limit_delay: Duration,
    pub rate_limit_retries: u32,
}

/// One layer of optional settings. The same shape is read from the
/// environment and from the YAML config file.
#[derive(Debug, Default, Deserialize)]
pub struct Overrides {
    #[serde(default, deserialize_with = "non_empty_url")]
    pub discord_webhook_url: Option<Url>,
    #[serde(default, deserialize_with = "non_empty_url")]
    pub store_url: Option<Url>,
    pub products_file: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub category_retry_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub resolve_attempts: Option<u32>,
    pub resolve_backoff_secs: Option<u64>,
    pub rate_limit_delay_secs: Option<u64>,
    pub rate_limit_retries: Option<u32>,
}

/// An empty value (`DISCORD_WEBHOOK_URL=`) counts as unset.
fn non_empty_url<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Url>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => Url::parse(raw.trim()).map(Some).map_err(de::Error::custom),
        _ => Ok(None),
    }
}

fn default_store_url() -> Url {
    Url::parse("https://store.ui.com").expect("static url is valid")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".into()
}

impl Config {
    /// Reads `.env`, the process environment and the first config file found.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let env: Overrides = envy::from_env()?;
        let path = std::env::var_os("CONFIG_PATH")
            .map(PathBuf::from)
            .or_else(|| {
                CONFIG_FILES
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            });
        Self::load_with(env, path.as_deref())
    }

    /// A webhook set in the environment settles the configuration: the
    /// config file is not read at all.
    pub fn load_with(env: Overrides, path: Option<&Path>) -> Result<Self, ConfigError> {
        if env.discord_webhook_url.is_some() {
            return Self::resolve(env, Overrides::default());
        }
        let file = match path {
            Some(path) => read_file(path)?,
            None => Overrides::default(),
        };
        Self::resolve(env, file)
    }

    /// Environment values win over file values, which win over defaults.
    pub fn resolve(env: Overrides, file: Overrides) -> Result<Self, ConfigError> {
        let secs = |env: Option<u64>, file: Option<u64>, default: u64| {
            Duration::from_secs(env.or(file).unwrap_or(default))
        };

        Ok(Self {
            webhook_url: env
                .discord_webhook_url
                .or(file.discord_webhook_url)
                .ok_or(ConfigError::MissingWebhook)?,
            store_url: env
                .store_url
                .or(file.store_url)
                .unwrap_or_else(default_store_url),
            products_file: env
                .products_file
                .or(file.products_file)
                .unwrap_or_else(|| PathBuf::from("products.json")),
            user_agent: env
                .user_agent
                .or(file.user_agent)
                .unwrap_or_else(default_user_agent),
            poll_interval: secs(env.poll_interval_secs, file.poll_interval_secs, 30),
            category_retry: secs(env.category_retry_secs, file.category_retry_secs, 30),
            request_timeout: secs(env.request_timeout_secs, file.request_timeout_secs, 10),
            resolve_attempts: env
                .resolve_attempts
                .or(file.resolve_attempts)
                .unwrap_or(3)
                .max(1),
            resolve_backoff: secs(env.resolve_backoff_secs, file.resolve_backoff_secs, 1),
            rate_limit_delay: secs(env.rate_limit_delay_secs, file.rate_limit_delay_secs, 5),
            rate_limit_retries: env
                .rate_limit_retries
                .or(file.rate_limit_retries)
                .unwrap_or(3),
        })
    }
}

fn read_file(path: &Path) -> Result<Overrides, ConfigError> {
    debug!("Reading config from {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    })
}
