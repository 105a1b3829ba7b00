//! HTTP fetch boundary.
//!
//! Every request races the session's cancellation token so an abandoned
//! session never waits on the network.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{Error, Result};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves manifests and segments.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body.
    ///
    /// Non-2xx answers map to [`Error::Fetch`], transport failures to
    /// [`Error::Network`], and a fired token to [`Error::Cancelled`].
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Bytes>;

    /// GET `url` and decode the body as UTF-8, replacing invalid sequences.
    async fn fetch_text(&self, url: &Url, cancel: &CancellationToken) -> Result<String> {
        let body = self.fetch(url, cancel).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// [`Fetcher`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeout: {}", e);
            Client::new()
        });
        Self { client }
    }

    async fn get(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|e| Error::network(url, e))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Bytes> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.get(url) => {
                if let Ok(body) = &result {
                    tracing::trace!(%url, bytes = body.len(), "fetched");
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg1.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::default();
        let body = fetcher
            .fetch(&url(&server, "/seg1.m4s"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&body[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let text = HttpFetcher::default()
            .fetch_text(&url(&server, "/live.m3u8"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "#EXTM3U\n");
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = HttpFetcher::default()
            .fetch(&url(&server, "/missing.m4s"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Fetch { status: 404, .. });
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Url::parse(&format!("http://127.0.0.1:{port}/init.mp4")).unwrap();
        let err = HttpFetcher::default()
            .fetch(&target, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Network { .. });
    }

    #[tokio::test]
    async fn test_cancel_aborts_slow_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = HttpFetcher::default()
            .fetch(&url(&server, "/slow.m4s"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = HttpFetcher::default()
            .fetch(&url(&server, "/seg.m4s"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
