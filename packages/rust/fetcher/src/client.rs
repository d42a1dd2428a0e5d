//! HTTP client for the links API: listing pages, user topics, topic updates.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use linksort_shared::{ApiConfig, Item, ItemId, LinksortError, Result};

use crate::engine::{PageOutcome, PageSource};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("linksort/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One page of the listing endpoint.
#[derive(Debug, Deserialize)]
struct LinksPage {
    #[serde(rename = "userSaved", default)]
    user_saved: Option<Vec<SavedLink>>,
}

/// A saved link as the listing endpoint returns it.
#[derive(Debug, Deserialize)]
struct SavedLink {
    id: ItemId,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    topics: Option<Vec<TopicRef>>,
}

/// Topics show up either as bare names or as `{ "topic": ... }` objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopicRef {
    Name(String),
    Object { topic: String },
}

impl TopicRef {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) => name,
            Self::Object { topic } => topic,
        }
    }
}

impl From<SavedLink> for Item {
    fn from(link: SavedLink) -> Self {
        Self {
            id: link.id,
            url: link.link.unwrap_or_default(),
            title: link.title.unwrap_or_default(),
            snippet: link.snippet.unwrap_or_default(),
            topics: link
                .topics
                .unwrap_or_default()
                .into_iter()
                .map(TopicRef::into_name)
                .filter(|t| !t.trim().is_empty())
                .collect(),
        }
    }
}

/// Response of the user topics endpoint.
#[derive(Debug, Deserialize)]
struct TopicsResponse {
    #[serde(default)]
    topics: Vec<TopicRef>,
}

/// Body of the topic update call.
#[derive(Debug, serde::Serialize)]
struct UpdateTopicsBody<'a> {
    topics: &'a [String],
}

/// Why a single request attempt failed.
#[derive(Debug)]
struct RequestFailure {
    status: Option<u16>,
    message: String,
    retryable: bool,
}

impl RequestFailure {
    fn from_status(status: StatusCode) -> Self {
        Self {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn from_send(e: reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            retryable: e.is_timeout() || e.is_connect() || e.is_request(),
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Client for the links API, bound to one user.
///
/// Cheap to clone; clones share the connection pool and configuration.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ApiConfig>,
}

impl ApiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LinksortError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Fetch one page of the user's saved links.
    ///
    /// Transient failures (5xx, 429, timeouts, connection errors) are retried
    /// up to `max_retries` times with exponential backoff before the page is
    /// reported as failed.
    pub async fn fetch_links_page(&self, page: u32) -> PageOutcome {
        let url = self.endpoint(&format!("users/{}/links", self.config.user_id));
        let mut attempt: u32 = 0;

        loop {
            match self.try_fetch_links_page(&url, page).await {
                Ok(items) if items.is_empty() => {
                    debug!(page, "links page is empty");
                    return PageOutcome::Exhausted;
                }
                Ok(items) => {
                    debug!(page, count = items.len(), "fetched links page");
                    return PageOutcome::Items(items);
                }
                Err(failure) if failure.retryable && attempt < self.config.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        page,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "transient failure fetching links page, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    error!(
                        page,
                        status = ?failure.status,
                        error = %failure.message,
                        "failed to fetch links page"
                    );
                    return PageOutcome::Failed {
                        status: failure.status,
                        message: failure.message,
                    };
                }
            }
        }
    }

    async fn try_fetch_links_page(
        &self,
        url: &str,
        page: u32,
    ) -> std::result::Result<Vec<Item>, RequestFailure> {
        let response = self
            .client
            .get(url)
            .query(&[("page", page)])
            .send()
            .await
            .map_err(RequestFailure::from_send)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::from_status(status));
        }

        let body: LinksPage = response.json().await.map_err(|e| RequestFailure {
            status: Some(status.as_u16()),
            message: format!("invalid links page body: {e}"),
            retryable: false,
        })?;

        Ok(body
            .user_saved
            .unwrap_or_default()
            .into_iter()
            .map(Item::from)
            .collect())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    /// Fetch the user's existing topic labels.
    ///
    /// Failures are logged and produce an empty list; a missing vocabulary
    /// only means the classifier starts from scratch.
    #[instrument(skip_all, fields(user_id = %self.config.user_id))]
    pub async fn fetch_topics(&self) -> Vec<String> {
        let url = self.endpoint("user/topics");

        let response = match self
            .client
            .get(&url)
            .query(&[("uid", self.config.user_id.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "failed to fetch topics");
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "failed to fetch topics");
            return Vec::new();
        }

        match response.json::<TopicsResponse>().await {
            Ok(body) => {
                let topics: Vec<String> = body
                    .topics
                    .into_iter()
                    .map(TopicRef::into_name)
                    .filter(|t| !t.trim().is_empty())
                    .collect();
                info!(count = topics.len(), "fetched existing topics");
                topics
            }
            Err(e) => {
                error!(error = %e, "invalid topics response");
                Vec::new()
            }
        }
    }

    /// Replace the topics of one link. `token` is sent verbatim as the
    /// `Authorization` header (e.g. `Bearer ...`).
    pub async fn update_topics(&self, id: ItemId, topics: &[String], token: &str) -> Result<()> {
        let url = self.endpoint(&format!("links/{id}/topics"));

        let response = self
            .client
            .put(&url)
            .header("Authorization", token)
            .json(&UpdateTopicsBody { topics })
            .send()
            .await
            .map_err(|e| LinksortError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinksortError::Network(format!(
                "updating topics for link {id}: HTTP {status}"
            )));
        }

        debug!(id, topics = topics.len(), "topics updated");
        Ok(())
    }
}

impl PageSource for ApiClient {
    async fn fetch_page(&self, page: u32) -> PageOutcome {
        self.fetch_links_page(page).await
    }
}
