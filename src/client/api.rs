//! API client module
//!
//! Provides `ApiClient` for issuing GET requests against the source API.

use eyre::{Context, Result};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::time::Duration;
use url::Url;

/// Header carrying the configured API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Upper bound on a single request, including reading the body
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Source API client.
///
/// Endpoint paths are resolved relative to the base URL, so a base of
/// `http://host/api` and an endpoint of `comments` requests `http://host/api/comments`.
///
/// # Example
/// ```no_run
/// use analytics_etl::client::{ApiClient, DEFAULT_TIMEOUT};
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("http://localhost:8080/api")?;
/// let client = ApiClient::try_new(url, Some("secret".to_string()), DEFAULT_TIMEOUT)?;
/// let response = client.get("comments").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    url: Url,
}

impl ApiClient {
    /// Create a client for `url`, sending `api_key` (if any) on every request.
    ///
    /// # Errors
    /// Returns an error if the API key is not a valid header value or the
    /// HTTP client cannot be built
    pub fn try_new(mut url: Url, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(api_key) = api_key.filter(|k| !k.is_empty()) {
            let mut value: HeaderValue = api_key
                .parse()
                .with_context(|| format!("Invalid {} header value", API_KEY_HEADER))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        // Url::join replaces the last path segment unless the base ends in '/'
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    /// Send a GET request to an endpoint path.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.endpoint_url(path)?;
        log::debug!("GET {}", url);
        self.client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))
    }
}

impl std::fmt::Display for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolves_under_base_path() {
        let url = Url::parse("http://localhost:8080/api").unwrap();
        let client = ApiClient::try_new(url, None, DEFAULT_TIMEOUT).unwrap();

        assert_eq!(client.url().as_str(), "http://localhost:8080/api/");
        assert_eq!(
            client.endpoint_url("comments").unwrap().as_str(),
            "http://localhost:8080/api/comments"
        );
        assert_eq!(
            client.endpoint_url("/v2/reviews?limit=10").unwrap().as_str(),
            "http://localhost:8080/api/v2/reviews?limit=10"
        );
    }

    #[test]
    fn test_invalid_api_key_is_rejected() {
        let url = Url::parse("http://localhost:8080").unwrap();
        let result = ApiClient::try_new(url, Some("bad\nkey".to_string()), DEFAULT_TIMEOUT);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid X-API-Key header value")
        );
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let url = Url::parse("http://localhost:8080").unwrap();
        assert!(ApiClient::try_new(url, Some(String::new()), DEFAULT_TIMEOUT).is_ok());
    }
}
