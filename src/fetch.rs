//! Downloading remote test data
//!
//! The resolver only sees the [`Fetcher`] trait. [`HttpFetcher`] is the real
//! implementation; tests substitute an in-memory one.

use crate::config::FixtureConfig;
use crate::error::{FixtureError, FixtureResult};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Proxy, StatusCode};
use std::io::Write;
use tracing::{debug, info};

/// Something that can stream the body behind a URL into a writer.
pub trait Fetcher: Send + Sync {
    /// Write the resource at `url` into `dest`, returning the byte count
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> FixtureResult<u64>;
}

/// HTTP(S) fetcher configured with headers, proxies and a timeout.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client from the session configuration.
    ///
    /// Header and proxy values are read from the configuration's environment
    /// snapshot; unset variables are skipped.
    pub fn new(config: &FixtureConfig) -> FixtureResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.resolved_http_headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                FixtureError::config(format!("Invalid HTTP header name: {}", e), Some(&name))
            })?;
            let mut header_value = HeaderValue::from_str(&value).map_err(|e| {
                FixtureError::config(format!("Invalid HTTP header value: {}", e), Some(&name))
            })?;
            header_value.set_sensitive(true);
            headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.http_timeout);

        for (scheme, proxy_url) in config.resolved_proxies() {
            let proxy = match scheme.as_str() {
                "http" => Proxy::http(&proxy_url),
                "https" => Proxy::https(&proxy_url),
                "all" => Proxy::all(&proxy_url),
                other => {
                    return Err(FixtureError::config(
                        format!("Unsupported proxy scheme '{}'", other),
                        Some(&scheme),
                    ))
                }
            }
            .map_err(|e| FixtureError::config(format!("Invalid proxy URL: {}", e), Some(&scheme)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FixtureError::config(format!("Failed to build HTTP client: {}", e), None))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> FixtureResult<u64> {
        info!(url, "downloading test data");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FixtureError::fetch(url, e.to_string(), None))?;

        check_status(url, response.status())?;

        let bytes = response
            .copy_to(dest)
            .map_err(|e| FixtureError::fetch(url, format!("Failed to read response body: {}", e), None))?;
        debug!(url, bytes, "download complete");
        Ok(bytes)
    }
}

/// Map an HTTP status to success, an authentication failure, or a fetch error
pub fn check_status(url: &str, status: StatusCode) -> FixtureResult<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(FixtureError::Auth {
            url: url.to_string(),
            status: status.as_u16(),
        })
    } else {
        Err(FixtureError::fetch(
            url,
            status
                .canonical_reason()
                .unwrap_or("unexpected HTTP status")
                .to_string(),
            Some(status.as_u16()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSnapshot;

    #[test]
    fn test_check_status() {
        let url = "https://example.org/data.vcf";
        assert!(check_status(url, StatusCode::OK).is_ok());

        match check_status(url, StatusCode::UNAUTHORIZED) {
            Err(FixtureError::Auth { status, .. }) => assert_eq!(status, 401),
            other => panic!("Expected auth error, got {:?}", other),
        }
        assert!(matches!(
            check_status(url, StatusCode::FORBIDDEN),
            Err(FixtureError::Auth { status: 403, .. })
        ));

        match check_status(url, StatusCode::NOT_FOUND) {
            Err(FixtureError::Fetch { status, message, .. }) => {
                assert_eq!(status, Some(404));
                assert_eq!(message, "Not Found");
            }
            other => panic!("Expected fetch error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_fetcher_builds_from_config() {
        let config = FixtureConfig::default().with_env(EnvSnapshot::from_pairs([
            ("TOKEN", "abc123"),
            ("HTTPS_PROXY", "http://proxy.internal:3128"),
        ]));
        assert!(HttpFetcher::new(&config).is_ok());
    }

    #[test]
    fn test_http_fetcher_rejects_bad_proxy_scheme() {
        let mut config = FixtureConfig::default()
            .with_env(EnvSnapshot::from_pairs([("SOCKS", "socks5://localhost:1080")]));
        config.proxies.insert("gopher".to_string(), "SOCKS".to_string());
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(FixtureError::Config { .. })
        ));
    }
}
