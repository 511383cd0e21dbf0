//! The request transport: rate-limited cross-origin GETs with retry and
//! binary-response filtering.

use crate::types::{HttpConfig, Result, WebsiftError};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Content types never worth extracting from.
const BINARY_CONTENT_TYPES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "font/",
    "application/octet-stream",
    "application/zip",
    "application/pdf",
    "application/x-protobuf",
];

/// A fetched response, body already read.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub ok: bool,
    pub status: u16,
    pub content_type: Option<String>,
    /// URL after redirects.
    pub final_url: String,
    /// Empty for binary responses.
    pub text: String,
    /// True when the body was skipped due to a binary content type.
    pub binary: bool,
}

/// HTTP transport with rate limiting and retry.
pub struct RequestTransport {
    client: Client,
    config: HttpConfig,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl RequestTransport {
    pub fn new(config: HttpConfig, rate_limit: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_second(
            NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN)),
        );
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Issue a GET with retries. Client errors (4xx) fail fast; other
    /// failures retry with linear backoff.
    pub async fn request(&self, url: &str) -> Result<TransportResponse> {
        self.rate_limiter.until_ready().await;

        let mut retries = 0;
        let mut last_error: Option<WebsiftError> = None;

        while retries <= self.config.max_retries {
            match self.do_fetch(url).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let should_retry = match &e {
                        WebsiftError::HttpError(http_err) => http_err
                            .status()
                            .map(|status| !status.is_client_error())
                            .unwrap_or(true),
                        _ => true,
                    };
                    last_error = Some(e);

                    if !should_retry {
                        debug!("not retrying {} - client error", url);
                        break;
                    }

                    retries += 1;
                    if retries <= self.config.max_retries {
                        trace!("retry {} for {}", retries, url);
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(retries))).await;
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| WebsiftError::ConfigError("no fetch attempt made".to_string()));
        if retries > 1 {
            warn!("failed to fetch {} after {} retries: {}", url, retries - 1, error);
        } else {
            debug!("failed to fetch {}: {}", url, error);
        }
        Err(error)
    }

    async fn do_fetch(&self, url: &str) -> Result<TransportResponse> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebsiftError::HttpError(
                response.error_for_status().unwrap_err(),
            ));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(ct) = &content_type {
            if BINARY_CONTENT_TYPES.iter().any(|b| ct.starts_with(b)) {
                trace!("skipping binary response ({}) from {}", ct, url);
                return Ok(TransportResponse {
                    ok: true,
                    status: status.as_u16(),
                    content_type,
                    final_url,
                    text: String::new(),
                    binary: true,
                });
            }
        }

        let text = response.text().await?;
        debug!("fetched {} ({} bytes)", url, text.len());

        Ok(TransportResponse {
            ok: true,
            status: status.as_u16(),
            content_type,
            final_url,
            text,
            binary: false,
        })
    }

    /// SHA-256 hex digest, used for full-content provenance.
    pub fn hash_content(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content() {
        let hash = RequestTransport::hash_content("console.log('hello');");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, RequestTransport::hash_content("console.log('hello');"));
    }

    #[test]
    fn test_transport_construction() {
        let transport = RequestTransport::new(HttpConfig::default(), 10);
        assert!(transport.is_ok());
    }
}
