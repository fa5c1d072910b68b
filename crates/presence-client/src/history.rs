//! HTTP implementation of HistoryApi

use async_trait::async_trait;
use presence_common::HistoryConfig;
use presence_core::{ActivityEvent, HistoryApi, HistoryError, TopicId};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::instrument;

/// Fetches missed events from `GET {base}/topics/{topicId}/events?since={seq}`
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpHistoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HistoryError> {
        let base_url = Url::parse(base_url).map_err(|e| HistoryError::Request(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(HistoryError::Request(format!("invalid base URL: {base_url}")));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn from_config(config: &HistoryConfig) -> Result<Self, HistoryError> {
        Self::new(&config.base_url, Duration::from_millis(config.timeout_ms))
    }

    /// Send `Authorization: Bearer <token>` with every request
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn events_url(&self, topic_id: &TopicId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["topics", topic_id.as_str(), "events"]);
        }
        url
    }
}

#[async_trait]
impl HistoryApi for HttpHistoryClient {
    #[instrument(skip(self), fields(topic_id = %topic_id))]
    async fn events_since(&self, topic_id: &TopicId, since: u64) -> Result<Vec<ActivityEvent>, HistoryError> {
        let mut request = self
            .client
            .get(self.events_url(topic_id))
            .query(&[("since", since)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status.as_u16()));
        }

        let mut events: Vec<ActivityEvent> = response
            .json()
            .await
            .map_err(|e| HistoryError::Decode(e.to_string()))?;

        events.retain(|e| e.seq > since && e.topic_id == *topic_id);
        events.sort_by_key(|e| e.seq);

        tracing::debug!(fetched = events.len(), "History fetched");
        Ok(events)
    }
}
