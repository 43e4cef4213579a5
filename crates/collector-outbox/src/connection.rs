//! Low-level delivery channels to the collector.

use crate::error::OutboxResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Outcome of a pixel fetch. A pixel load carries no status code; only
/// load or error is observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOutcome {
    /// The pixel loaded.
    Loaded,
    /// The fetch errored.
    Errored,
}

/// Delivery channel to the collector.
///
/// The queue manager drives this trait; the `reqwest`-backed
/// implementation below is the production channel, and tests substitute a
/// recording mock so no unit test touches the network.
#[async_trait]
pub trait CollectorConnection: Send + Sync {
    /// POST a JSON body. Resolves to the terminal HTTP status.
    async fn post(&self, url: &str, body: Vec<u8>, headers: &[(String, String)])
        -> OutboxResult<u16>;

    /// GET a URL. Resolves to the terminal HTTP status.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16>;

    /// Hand a POST body to the fire-and-forget channel.
    ///
    /// Returns whether the channel accepted ownership of the payload, not
    /// whether it reached the collector. Headers cannot be attached.
    fn send_beacon(&self, url: &str, body: Vec<u8>) -> bool;

    /// Fetch a tracking pixel. Completion carries no status code.
    async fn fetch_pixel(&self, url: &str) -> PixelOutcome;

    /// Blocking POST for the teardown flush.
    fn post_blocking(&self, url: &str, body: Vec<u8>, headers: &[(String, String)])
        -> OutboxResult<u16>;

    /// Blocking GET for the teardown flush.
    fn get_blocking(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16>;
}

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// HTTP delivery channel backed by `reqwest`.
///
/// The async client carries no request timeout of its own; the sender
/// races every attempt against the configured connection timeout. The
/// blocking client used by the teardown flush applies the timeout
/// directly, since no timer loop exists at that point.
pub struct HttpCollectorConnection {
    client: reqwest::Client,
    timeout: Duration,
    with_credentials: bool,
}

impl HttpCollectorConnection {
    /// Create the production collector channel.
    pub fn new(timeout: Duration, with_credentials: bool) -> OutboxResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(with_credentials)
            .build()?;
        Ok(Self {
            client,
            timeout,
            with_credentials,
        })
    }

    fn blocking_client(&self) -> OutboxResult<reqwest::blocking::Client> {
        Ok(reqwest::blocking::Client::builder()
            .cookie_store(self.with_credentials)
            .timeout(self.timeout)
            .build()?)
    }
}

#[async_trait]
impl CollectorConnection for HttpCollectorConnection {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> OutboxResult<u16> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }

    async fn get(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }

    fn send_beacon(&self, url: &str, body: Vec<u8>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let client = self.client.clone();
        let url = url.to_string();
        handle.spawn(async move {
            if let Err(e) = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(body)
                .send()
                .await
            {
                debug!(error = %e, "Beacon send did not complete");
            }
        });
        true
    }

    async fn fetch_pixel(&self, url: &str) -> PixelOutcome {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => PixelOutcome::Loaded,
            Ok(_) | Err(_) => PixelOutcome::Errored,
        }
    }

    fn post_blocking(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> OutboxResult<u16> {
        let client = self.blocking_client()?;
        let mut request = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send()?;
        Ok(response.status().as_u16())
    }

    fn get_blocking(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16> {
        let client = self.blocking_client()?;
        let mut request = client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send()?;
        Ok(response.status().as_u16())
    }
}
