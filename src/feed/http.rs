use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use url::Url;

use crate::util::{validate_url_with, UrlPolicy};

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// 2xx response with an empty body
    #[error("server returned no data")]
    NoData,
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// The URL was rejected by the fetch policy
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// The one network primitive everything else builds on: a GET that only
/// counts as success with a 2xx status and a non-empty body.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: UrlPolicy,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher with the `tidings/<version>` user agent.
    pub fn new(policy: UrlPolicy, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tidings/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, policy, timeout))
    }

    /// Wrap an existing client (caller controls its configuration).
    pub fn with_client(client: reqwest::Client, policy: UrlPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
        }
    }

    /// Check `url` against this fetcher's host policy.
    pub fn validate(&self, url: &str) -> Result<Url, FetchError> {
        validate_url_with(url, self.policy).map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }

    /// GET `url` and return its body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - URL rejected by the host policy
    /// - [`FetchError::Timeout`] - no complete response within the timeout
    /// - [`FetchError::Network`] - connection, DNS or TLS failure
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - body over 10MB
    /// - [`FetchError::NoData`] - empty body
    pub async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.validate(url.as_str())?;

        let response = tokio::time::timeout(self.timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Fetch returned non-success status");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchError::Timeout)??;

        if bytes.is_empty() {
            return Err(FetchError::NoData);
        }
        Ok(bytes)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_fetcher() -> HttpFetcher {
        HttpFetcher::new(UrlPolicy::AllowPrivate, REQUEST_TIMEOUT).unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_get_success_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header(
                "user-agent",
                concat!("tidings/", env!("CARGO_PKG_VERSION")),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&server)
            .await;

        let body = local_fetcher().get(&url(&server, "/feed")).await.unwrap();
        assert_eq!(body, b"<rss/>");
    }

    #[tokio::test]
    async fn test_get_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = local_fetcher().get(&url(&server, "/missing")).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_get_empty_body_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = local_fetcher().get(&url(&server, "/empty")).await;
        assert!(matches!(result, Err(FetchError::NoData)));
    }

    #[tokio::test]
    async fn test_get_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_SIZE + 1]))
            .mount(&server)
            .await;

        let result = local_fetcher().get(&url(&server, "/big")).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(UrlPolicy::AllowPrivate, Duration::from_millis(50)).unwrap();
        let result = fetcher.get(&url(&server, "/slow")).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_public_policy_rejects_local_server() {
        let server = MockServer::start().await;
        let fetcher = HttpFetcher::new(UrlPolicy::PublicOnly, REQUEST_TIMEOUT).unwrap();

        let result = fetcher.get(&url(&server, "/feed")).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
