//! Key sets published at a URL

use std::{error::Error as StdError, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};

use crate::{
    error::KeyFetchError,
    jwks::KeySet,
    resolver::{Fetched, KeySource},
};

/// The timeout used when none is configured
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A key source that fetches a JWKS document over HTTPS
///
/// After a successful fetch, the `ETag` (or failing that, the
/// `Last-Modified`) of the response is sent back on the next request so the
/// provider can answer `304 Not Modified`.
#[derive(Debug)]
pub struct RemoteKeySource {
    url: String,
    client: Client,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

impl RemoteKeySource {
    /// Constructs a source for `url` whose requests time out after `timeout`
    ///
    /// Only `https` URLs are fetched.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyFetchError> {
        let client = Client::builder()
            .user_agent(concat!("barista_auth/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .https_only(true)
            .build()
            .map_err(KeyFetchError::request)?;

        Ok(Self::with_client(url, client))
    }

    /// Constructs a source for `url` that uses an existing client
    #[must_use]
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            etag: None,
            last_modified: None,
        }
    }

    /// The URL of the key document
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn request_failed(err: reqwest::Error) -> KeyFetchError {
    if err.is_timeout() {
        KeyFetchError::Timeout
    } else {
        KeyFetchError::request(err)
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    #[tracing::instrument(skip(self), fields(jwks.url = %self.url))]
    async fn fetch(&mut self) -> Result<Fetched, KeyFetchError> {
        let mut request = self.client.get(&self.url);

        if let Some(etag) = &self.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        } else if let Some(last_modified) = &self.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await.map_err(request_failed)?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("JWKS not modified");
            return Ok(Fetched::NotModified);
        } else if !status.is_success() {
            tracing::warn!(
                http.status_code = status.as_u16(),
                "JWKS fetch failed; unexpected response status",
            );
            return Err(KeyFetchError::Status {
                status: status.as_u16(),
            });
        }

        let etag = response.headers().get(header::ETAG).cloned();
        let last_modified = response.headers().get(header::LAST_MODIFIED).cloned();

        let body = response.bytes().await.map_err(request_failed)?;
        let keys: KeySet = serde_json::from_slice(&body).map_err(|err| {
            let error: &dyn StdError = &err;
            tracing::warn!(error, "JWKS fetch failed; malformed document");
            KeyFetchError::malformed(err)
        })?;

        self.etag = etag;
        self.last_modified = last_modified;

        Ok(Fetched::Updated(keys))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use wiremock::{
        matchers::{header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::testing;

    const JWKS_PATH: &str = "/.well-known/jwks.json";

    fn source(server: &MockServer, timeout: Duration) -> Result<RemoteKeySource> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(RemoteKeySource::with_client(
            format!("{}{JWKS_PATH}", server.uri()),
            client,
        ))
    }

    fn jwks_body() -> &'static str {
        include_str!("../data/rsa/jwks.json")
    }

    #[tokio::test]
    async fn fetches_and_parses_the_document() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(jwks_body(), "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = source(&server, DEFAULT_FETCH_TIMEOUT)?;

        match source.fetch().await? {
            Fetched::Updated(keys) => assert_eq!(keys, testing::key_set()),
            Fetched::NotModified => panic!("expected a key set"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn sends_etag_back_and_accepts_not_modified() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .set_body_raw(jwks_body(), "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut source = source(&server, DEFAULT_FETCH_TIMEOUT)?;

        assert!(matches!(source.fetch().await?, Fetched::Updated(_)));
        assert!(matches!(source.fetch().await?, Fetched::NotModified));
        Ok(())
    }

    #[tokio::test]
    async fn first_request_is_unconditional() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("if-none-match"))
            .respond_with(ResponseTemplate::new(304))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(jwks_body(), "application/json"))
            .mount(&server)
            .await;

        let mut source = source(&server, DEFAULT_FETCH_TIMEOUT)?;
        assert!(matches!(source.fetch().await?, Fetched::Updated(_)));
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_reported() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut source = source(&server, DEFAULT_FETCH_TIMEOUT)?;

        assert!(matches!(
            source.fetch().await,
            Err(KeyFetchError::Status { status: 503 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_is_reported() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>", "text/html"))
            .mount(&server)
            .await;

        let mut source = source(&server, DEFAULT_FETCH_TIMEOUT)?;

        assert!(matches!(
            source.fetch().await,
            Err(KeyFetchError::Malformed(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn slow_provider_times_out() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(jwks_body(), "application/json")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut source = source(&server, Duration::from_millis(100))?;

        assert!(matches!(source.fetch().await, Err(KeyFetchError::Timeout)));
        Ok(())
    }

    #[test]
    fn plain_http_is_refused() -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let mut source = RemoteKeySource::new("http://127.0.0.1:9/jwks.json", DEFAULT_FETCH_TIMEOUT)?;

        assert!(matches!(
            rt.block_on(source.fetch()),
            Err(KeyFetchError::Request(_))
        ));
        Ok(())
    }
}
