//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests made by a crawl:
//! - Building the HTTP client with the configured user agent and timeouts
//! - GET requests for the target page
//! - HEAD probes for link health
//!
//! Every request runs inside the crawl's [`CrawlScope`] and is abandoned as
//! soon as the scope is cancelled or expires.

use super::scope::{CrawlScope, ScopeExit};
use crate::config::HttpConfig;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use std::time::Duration;
use thiserror::Error;

/// A fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code
    pub status_code: u16,
    /// Content-Type header value (empty when absent)
    pub content_type: String,
    /// Page body content
    pub body: String,
}

/// Why a request produced no response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,

    #[error("crawl deadline exceeded")]
    DeadlineExceeded,

    #[error("network error: {0}")]
    Network(String),
}

impl From<ScopeExit> for FetchError {
    fn from(exit: ScopeExit) -> Self {
        match exit {
            ScopeExit::Cancelled => Self::Cancelled,
            ScopeExit::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network("request timeout".to_string())
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Network access used by a crawl
///
/// Implementations must honour the scope: once it is cancelled or past its
/// deadline, calls return promptly with the matching error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url` with GET and reads the whole body
    async fn get(&self, url: &str, scope: &CrawlScope) -> Result<FetchedPage, FetchError>;

    /// Sends a HEAD request to `url` and returns the response status
    async fn probe(&self, url: &str, scope: &CrawlScope) -> Result<u16, FetchError>;
}

/// Returns true for content types the analyzer can handle
///
/// Matches `text/html` anywhere in the header, plus `application/xhtml+xml`.
pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml+xml")
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The HTTP configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use linkscope::config::HttpConfig;
/// use linkscope::crawler::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(config.max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, scope: &CrawlScope) -> Result<FetchedPage, FetchError> {
        let request = async {
            let response = self.client.get(url).send().await?;
            let status_code = response.status().as_u16();

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let body = response.text().await?;

            Ok::<_, reqwest::Error>(FetchedPage {
                status_code,
                content_type,
                body,
            })
        };

        let page = scope.run(request).await??;
        tracing::debug!("GET {} -> {}", url, page.status_code);
        Ok(page)
    }

    async fn probe(&self, url: &str, scope: &CrawlScope) -> Result<u16, FetchError> {
        let response = scope.run(self.client.head(url).send()).await??;
        Ok(response.status().as_u16())
    }
}
