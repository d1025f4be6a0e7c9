use reqwest::blocking::Client;
use reqwest::{StatusCode, header};
use url::Url;

use crate::config::Config;
use crate::error::FetchError;

/// Status and body of a completed request. Any status is a completed
/// request; callers decide which ones they accept.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    /// Fails with [`FetchError::Status`] unless the status is 200.
    pub fn require_ok(self, url: &Url) -> Result<Self, FetchError> {
        if self.status == StatusCode::OK {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: url.clone(),
                status: self.status,
            })
        }
    }
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError>;
    fn post_json(&self, url: &Url, payload: &serde_json::Value)
    -> Result<HttpResponse, FetchError>;
}

/// Blocking client carrying the storefront's browser-like header set.
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en,en_US;q=0.9"),
        );
        let inner = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { inner })
    }

    fn read(url: &Url, res: reqwest::blocking::Response) -> Result<HttpResponse, FetchError> {
        let status = res.status();
        let body = res.text().map_err(|e| FetchError::request(url, e))?;
        Ok(HttpResponse { status, body })
    }
}

impl Transport for HttpClient {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let res = self
            .inner
            .get(url.clone())
            .send()
            .map_err(|e| FetchError::request(url, e))?;
        Self::read(url, res)
    }

    fn post_json(
        &self,
        url: &Url,
        payload: &serde_json::Value,
    ) -> Result<HttpResponse, FetchError> {
        let res = self
            .inner
            .post(url.clone())
            .json(payload)
            .send()
            .map_err(|e| FetchError::request(url, e))?;
        Self::read(url, res)
    }
}
