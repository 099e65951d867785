//! HTTP adapter over Kraken Futures' history API. Grounded on the teacher
//! crate's [`crate` root `Client`] (bearer-auth'd `reqwest::Client`,
//! one struct, one `Result`/`Error` pair) and on
//! `pysrc.adapters.kraken.historical.updates.historical_updates_data_client::_request`
//! (original_source) for the route shape and pagination contract (spec §4.10).

use serde::Deserialize;

use crate::events::{ExecutionApiEvent, OrderApiEvent};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to deserialize response: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("request to '{route}' failed with status {status}: {body}")]
    TransportError {
        route: String,
        status: u16,
        body: String,
    },

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// A single page of the orders/executions endpoint: the raw `elements`
/// array plus an optional continuation cursor (spec §6).
#[derive(Debug, Deserialize)]
struct Page<T> {
    elements: Vec<T>,
    #[serde(rename = "continuationToken")]
    continuation_token: Option<String>,
}

/// One page's worth of already-parsed events plus the cursor to fetch the
/// next page, if any.
pub struct EventPage<T> {
    pub elements: Vec<T>,
    pub continuation_token: Option<String>,
}

/// Thin, stateless (across requests) client for the history API. Auth for
/// private endpoints and transport selection live outside this core (spec
/// §1); this adapter only shapes the GET requests and parses responses.
pub struct HistoryClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client builder should not fail with defaults"),
        }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        route: &str,
        since: u64,
        before: u64,
        continuation_token: Option<&str>,
    ) -> Result<EventPage<T>> {
        let mut request = self
            .client
            .get(route)
            .bearer_auth(&self.api_key)
            .query(&[("sort", "asc"), ("since", &since.to_string()), ("before", &before.to_string())]);
        if let Some(token) = continuation_token {
            request = request.query(&[("continuation_token", token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransportError {
                route: route.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let page: Page<T> = serde_json::from_str(&body)?;
        tracing::debug!(route, elements = page.elements.len(), "fetched history page");

        Ok(EventPage {
            elements: page.elements,
            continuation_token: page.continuation_token,
        })
    }

    /// Fetches one page of `.../market/<feedcode>/orders`.
    pub async fn order_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> Result<EventPage<OrderApiEvent>> {
        let route = format!("{}/market/{}/orders", self.base_url, feedcode);
        self.get_page(&route, since_ms, before_ms, continuation_token)
            .await
    }

    /// Fetches one page of `.../market/<feedcode>/executions`.
    pub async fn execution_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> Result<EventPage<ExecutionApiEvent>> {
        let route = format!("{}/market/{}/executions", self.base_url, feedcode);
        self.get_page(&route, since_ms, before_ms, continuation_token)
            .await
    }
}

/// Seam [`crate::builder::UpdatesBuilder`] fetches through, so day
/// orchestration can be driven by a canned fake in tests the way the
/// original's test suite drives `HistoricalUpdatesDataClient` through
/// `unittest.mock.patch`. Implemented by [`HistoryClient`] for real use.
pub trait HistorySource {
    fn order_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> impl std::future::Future<Output = Result<EventPage<OrderApiEvent>>> + Send;

    fn execution_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> impl std::future::Future<Output = Result<EventPage<ExecutionApiEvent>>> + Send;
}

impl HistorySource for HistoryClient {
    async fn order_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> Result<EventPage<OrderApiEvent>> {
        HistoryClient::order_events_page(self, feedcode, since_ms, before_ms, continuation_token)
            .await
    }

    async fn execution_events_page(
        &self,
        feedcode: &str,
        since_ms: u64,
        before_ms: u64,
        continuation_token: Option<&str>,
    ) -> Result<EventPage<ExecutionApiEvent>> {
        HistoryClient::execution_events_page(self, feedcode, since_ms, before_ms, continuation_token)
            .await
    }
}
