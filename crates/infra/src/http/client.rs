use std::time::Duration;

use marketpulse_common::resilience::{ResilienceError, RetryStrategy};
use marketpulse_core::{GuardRegistry, ResilientFetcher};
use marketpulse_domain::{Config, MarketPulseError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as ReqwestClient, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{HttpError, InfraError};

/// Guard name used for the market data API
pub const MARKET_RESOURCE: &str = "market";
/// Guard name used for the news API
pub const NEWS_RESOURCE: &str = "news";

/// JSON client for one upstream API, guarded by a [`ResilientFetcher`].
///
/// Every request goes through the resource's concurrency gate, circuit
/// breaker and rate limiter. Transient failures (HTTP 429, 5xx, transport
/// errors, open circuit, rate-limit denials) are retried under the client's
/// [`RetryStrategy`]; a `Retry-After` header on a 429 sets the next delay.
#[derive(Debug, Clone)]
pub struct HttpMarketClient {
    client: ReqwestClient,
    base_url: String,
    fetcher: ResilientFetcher,
    retry: RetryStrategy,
}

impl HttpMarketClient {
    /// Start building a client for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpMarketClientBuilder {
        HttpMarketClientBuilder::new(base_url)
    }

    /// Client with default settings.
    pub fn new(
        base_url: impl Into<String>,
        fetcher: ResilientFetcher,
    ) -> Result<Self, MarketPulseError> {
        Self::builder(base_url).build(fetcher)
    }

    /// Client for the configured market data API.
    pub fn for_market(config: &Config, registry: &GuardRegistry) -> Result<Self, MarketPulseError> {
        Self::from_config(
            config.fetch.market_base_url.as_deref(),
            "fetch.market_base_url",
            MARKET_RESOURCE,
            registry,
        )
    }

    /// Client for the configured news API.
    pub fn for_news(config: &Config, registry: &GuardRegistry) -> Result<Self, MarketPulseError> {
        Self::from_config(
            config.fetch.news_base_url.as_deref(),
            "fetch.news_base_url",
            NEWS_RESOURCE,
            registry,
        )
    }

    fn from_config(
        base_url: Option<&str>,
        field: &str,
        resource: &str,
        registry: &GuardRegistry,
    ) -> Result<Self, MarketPulseError> {
        let base_url =
            base_url.ok_or_else(|| MarketPulseError::Config(format!("{field} is not set")))?;
        Self::new(base_url, registry.fetcher(resource)?)
    }

    /// Same client with a different retry profile
    #[must_use]
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetcher(&self) -> &ResilientFetcher {
        &self.fetcher
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ResilienceError<HttpError>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let url = url.as_str();
        self.fetcher.fetch_with_retry(self.retry, move || self.send_get(url, query)).await
    }

    /// [`Self::get_json`] with failures mapped into the domain error.
    pub async fn fetch_json<T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MarketPulseError>
    where
        T: DeserializeOwned,
    {
        self.get_json(path, query).await.map_err(|err| InfraError::from(err).into())
    }

    async fn send_get<T>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        debug!(resource = %self.fetcher.resource(), %url, "sending HTTP request");
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        debug!(resource = %self.fetcher.resource(), %url, %status, "received HTTP response");

        if !status.is_success() {
            return Err(HttpError::status(status, retry_after(&response)));
        }
        Ok(response.json::<T>().await?)
    }
}

/// Delay-seconds form of `Retry-After`; HTTP dates are ignored
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Builder for [`HttpMarketClient`].
#[derive(Debug)]
pub struct HttpMarketClientBuilder {
    base_url: String,
    timeout: Option<Duration>,
    retry: RetryStrategy,
    user_agent: Option<String>,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl HttpMarketClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            retry: RetryStrategy::STANDARD,
            user_agent: None,
            default_headers: None,
        }
    }

    /// Transport-level timeout; the fetcher's per-call deadline applies regardless
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self, fetcher: ResilientFetcher) -> Result<HttpMarketClient, MarketPulseError> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(MarketPulseError::Config("HTTP base URL must not be empty".into()));
        }

        let mut builder = ReqwestClient::builder().no_proxy();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|err| MarketPulseError::from(InfraError::from(HttpError::from(err))))?;

        Ok(HttpMarketClient { client, base_url, fetcher, retry: self.retry })
    }
}
