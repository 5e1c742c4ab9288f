use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA, REFERER, USER_AGENT,
};
use std::time::Duration;
use thiserror::Error;

use crate::sites::SiteDescriptor;
use crate::utils::{Jitter, get_random_user_agent};

/// Every way a single page retrieval can fail. Callers only ever see these,
/// never a raw transport error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("harvest deadline exceeded")]
    DeadlineExceeded,
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub jitter: Jitter,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            jitter: Jitter::default(),
        }
    }
}

/// Retrieves the listing page of one site
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, site: &SiteDescriptor) -> Result<String, FetchError>;
}

/// Body (or failure) of one retrieval, tied to the site it came from
#[derive(Debug)]
pub struct FetchResult<'a> {
    pub site: &'a SiteDescriptor,
    pub body: Result<String, FetchError>,
}

impl FetchResult<'_> {
    pub fn is_success(&self) -> bool {
        self.body.is_ok()
    }
}

pub async fn fetch_site<'a>(fetcher: &dyn PageFetcher, site: &'a SiteDescriptor) -> FetchResult<'a> {
    FetchResult {
        site,
        body: fetcher.fetch(site).await,
    }
}

/// reqwest-backed fetcher: random user agent and a jittered pause before every request
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self { client, settings })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, site: &SiteDescriptor) -> Result<String, FetchError> {
        self.settings.jitter.wait().await;

        let user_agent = get_random_user_agent();
        log::debug!("Fetching {} ({}) as {}", site.name, site.url, user_agent);

        let response = self
            .client
            .get(&site.url)
            .headers(build_headers(user_agent, &site.url))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })
    }
}

/// Browser-like headers; caching disabled so each harvest sees the live page
pub fn build_headers(user_agent: &str, referer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, value);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    headers
}
