use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::scraper::Category;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed")]
    Request {
        url: Url,
        #[source]
        source: BoxError,
    },
    #[error("{url} responded with {status}")]
    Status { url: Url, status: StatusCode },
}

impl FetchError {
    pub fn request(url: &Url, source: impl Into<BoxError>) -> Self {
        Self::Request {
            url: url.clone(),
            source: source.into(),
        }
    }
}

/// Failures of the endpoint resolver and the category fetcher.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no build id found in {0}")]
    Parse(Url),
    #[error("malformed listing for category {category}")]
    Decode {
        category: Category,
        #[source]
        source: serde_json::Error,
    },
    #[error("endpoint resolution failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ScrapeError>,
    },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode {}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to encode webhook payload")]
    Encode(#[from] serde_json::Error),
    #[error("webhook rejected payload with {0}")]
    Rejected(StatusCode),
    #[error("webhook still rate limited after {0} retries")]
    RateLimited(u32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DISCORD_WEBHOOK_URL is not set in the environment or the config file")]
    MissingWebhook,
    #[error("invalid environment configuration")]
    Env(#[from] envy::Error),
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
