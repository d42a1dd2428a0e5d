//! Concurrent paginated fetcher.
//!
//! The total number of pages is unknown up front, so the fetcher keeps a
//! fixed number of page requests in flight. Each page that returns items
//! hands its slot to the next unclaimed page index; a page that is empty
//! (or failed) retires its slot. The run ends once no request is outstanding.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use linksort_shared::{Item, LinksortError, Result};

// ---------------------------------------------------------------------------
// PageSource
// ---------------------------------------------------------------------------

/// Result of requesting one page.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// The page held at least one item.
    Items(Vec<Item>),
    /// The page was empty: no more data along this slot.
    Exhausted,
    /// The request failed (after any retries the source performs).
    Failed {
        /// HTTP status, if the server answered.
        status: Option<u16>,
        /// Human-readable reason.
        message: String,
    },
}

/// Anything that can serve numbered pages of items.
pub trait PageSource: Send + Sync + Clone + 'static {
    /// Fetch page `page` (0-based).
    fn fetch_page(&self, page: u32) -> impl Future<Output = PageOutcome> + Send;
}

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

/// Summary of a completed fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// All items, in no particular cross-page order.
    pub items: Vec<Item>,
    /// Pages that returned items.
    pub pages_fetched: usize,
    /// Pages that failed, with the reason. Each one retired its slot.
    pub pages_failed: Vec<(u32, String)>,
    /// Highest page index that was requested.
    pub highest_page: Option<u32>,
    /// Total duration of the fetch.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// Fetches every page of a collection with at most `concurrency` requests
/// in flight.
pub struct PageFetcher<S> {
    source: S,
    concurrency: usize,
}

impl<S: PageSource> PageFetcher<S> {
    /// Create a fetcher over `source`. A concurrency of 0 is treated as 1.
    pub fn new(source: S, concurrency: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch all pages until every slot has seen an empty or failed page.
    ///
    /// Per-page failures never abort the run; they are recorded in
    /// [`FetchResult::pages_failed`]. Errors are returned only when a worker
    /// task dies or `cancel` fires.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<FetchResult> {
        let start = Instant::now();
        let mut in_flight: JoinSet<(u32, PageOutcome)> = JoinSet::new();
        let mut next_page: u32 = 0;
        let mut result = FetchResult::default();

        info!("starting paginated fetch");

        for _ in 0..self.concurrency {
            self.spawn_page(&mut in_flight, next_page);
            result.highest_page = Some(next_page);
            next_page += 1;
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    in_flight.abort_all();
                    warn!(
                        items = result.items.len(),
                        next_page,
                        "fetch cancelled"
                    );
                    return Err(LinksortError::Cancelled);
                }
                joined = in_flight.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            let (page, outcome) = joined
                .map_err(|e| LinksortError::Network(format!("page worker failed: {e}")))?;

            match outcome {
                PageOutcome::Items(items) => {
                    debug!(page, count = items.len(), next_page, "page done, claiming next");
                    result.pages_fetched += 1;
                    result.items.extend(items);

                    self.spawn_page(&mut in_flight, next_page);
                    result.highest_page = Some(next_page);
                    next_page += 1;
                }
                PageOutcome::Exhausted => {
                    debug!(page, remaining = in_flight.len(), "page empty, retiring slot");
                }
                PageOutcome::Failed { status, message } => {
                    error!(
                        page,
                        ?status,
                        error = %message,
                        remaining = in_flight.len(),
                        "page failed, retiring slot"
                    );
                    result.pages_failed.push((page, message));
                }
            }
        }

        result.duration = start.elapsed();

        info!(
            items = result.items.len(),
            pages_fetched = result.pages_fetched,
            pages_failed = result.pages_failed.len(),
            duration_ms = result.duration.as_millis() as u64,
            "paginated fetch completed"
        );

        Ok(result)
    }

    fn spawn_page(&self, in_flight: &mut JoinSet<(u32, PageOutcome)>, page: u32) {
        let source = self.source.clone();
        in_flight.spawn(async move {
            let outcome = source.fetch_page(page).await;
            (page, outcome)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use linksort_shared::ApiConfig;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::ApiClient;

    fn item(id: i64) -> Item {
        Item {
            id,
            url: format!("https://example.com/{id}"),
            title: format!("Item {id}"),
            snippet: String::new(),
            topics: vec![],
        }
    }

    /// In-memory page source that records requests and in-flight peaks.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        pages: Arc<HashMap<u32, PageOutcome>>,
        requested: Arc<Mutex<Vec<u32>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay_ms: u64,
    }

    impl ScriptedSource {
        fn new(pages: HashMap<u32, PageOutcome>, delay_ms: u64) -> Self {
            Self {
                pages: Arc::new(pages),
                delay_ms,
                ..Default::default()
            }
        }

        fn with_item_counts(counts: &[usize], delay_ms: u64) -> Self {
            let mut next_id = 0;
            let pages = counts
                .iter()
                .enumerate()
                .map(|(page, &n)| {
                    let items: Vec<Item> = (0..n)
                        .map(|_| {
                            next_id += 1;
                            item(next_id)
                        })
                        .collect();
                    let outcome = if items.is_empty() {
                        PageOutcome::Exhausted
                    } else {
                        PageOutcome::Items(items)
                    };
                    (page as u32, outcome)
                })
                .collect();
            Self::new(pages, delay_ms)
        }

        fn requested_sorted(&self) -> Vec<u32> {
            let mut pages = self.requested.lock().unwrap().clone();
            pages.sort_unstable();
            pages
        }
    }

    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, page: u32) -> PageOutcome {
            self.requested.lock().unwrap().push(page);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.pages
                .get(&page)
                .cloned()
                .unwrap_or(PageOutcome::Exhausted)
        }
    }

    #[tokio::test]
    async fn three_two_zero_pages_yield_five_items() {
        let source = ScriptedSource::with_item_counts(&[3, 2, 0], 0);
        let fetcher = PageFetcher::new(source.clone(), 2);

        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.items.len(), 5);
        assert_eq!(result.pages_fetched, 2);
        assert!(result.pages_failed.is_empty());
        // Pages 0 and 1 each hand their slot on once; 2 and 3 are empty.
        assert_eq!(source.requested_sorted(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_first_page_yields_nothing() {
        let source = ScriptedSource::with_item_counts(&[0], 0);
        let fetcher = PageFetcher::new(source.clone(), 1);

        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        assert!(result.items.is_empty());
        assert_eq!(result.pages_fetched, 0);
        assert_eq!(source.requested_sorted(), vec![0]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let counts = vec![2; 20];
        let source = ScriptedSource::with_item_counts(&counts, 5);
        let fetcher = PageFetcher::new(source.clone(), 3);

        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.items.len(), 40);
        assert_eq!(result.pages_fetched, 20);
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_item_ids_come_from_pages() {
        let source = ScriptedSource::with_item_counts(&[4, 4, 1, 0], 1);
        let fetcher = PageFetcher::new(source, 4);

        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        let mut ids: Vec<i64> = result.items.iter().map(|i| i.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=9).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_page_does_not_abort_siblings() {
        let mut pages = HashMap::new();
        pages.insert(0, PageOutcome::Items(vec![item(1)]));
        pages.insert(
            1,
            PageOutcome::Failed {
                status: Some(500),
                message: "HTTP 500".into(),
            },
        );
        pages.insert(2, PageOutcome::Items(vec![item(2)]));
        pages.insert(3, PageOutcome::Items(vec![item(3)]));
        pages.insert(4, PageOutcome::Items(vec![item(4)]));
        let source = ScriptedSource::new(pages, 1);
        let fetcher = PageFetcher::new(source, 2);

        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.items.len(), 4);
        assert_eq!(result.pages_failed.len(), 1);
        assert_eq!(result.pages_failed[0].0, 1);
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_cancelled() {
        let source = ScriptedSource::with_item_counts(&[1; 10], 50);
        let fetcher = PageFetcher::new(source, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch_all(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn fetch_over_http_with_mock_server() {
        let server = MockServer::start().await;

        let page = |ids: &[i64]| {
            let links: Vec<_> = ids
                .iter()
                .map(|id| {
                    serde_json::json!({
                        "id": id,
                        "link": format!("https://example.com/{id}"),
                        "title": format!("Link {id}"),
                        "snippet": "",
                    })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "userSaved": links }))
        };

        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .and(query_param("page", "0"))
            .respond_with(page(&[1, 2, 3]))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .and(query_param("page", "1"))
            .respond_with(page(&[4, 5]))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .respond_with(page(&[]))
            .with_priority(10)
            .mount(&server)
            .await;

        let client = ApiClient::new(ApiConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            user_id: "7".into(),
            concurrency: 2,
            max_retries: 0,
            retry_backoff_ms: 1,
            timeout_secs: 5,
        })
        .unwrap();

        let fetcher = PageFetcher::new(client, 2);
        let result = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.items.len(), 5);
        assert_eq!(result.highest_page, Some(3));
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn http_failure_on_one_page_keeps_other_items() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userSaved": [{"id": 1, "link": "https://example.com/1", "title": "", "snippet": ""}]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/7/links"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"userSaved": []})),
            )
            .with_priority(10)
            .mount(&server)
            .await;

        let client = ApiClient::new(ApiConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            user_id: "7".into(),
            concurrency: 2,
            max_retries: 1,
            retry_backoff_ms: 1,
            timeout_secs: 5,
        })
        .unwrap();

        let result = PageFetcher::new(client, 2)
            .fetch_all(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.pages_failed.len(), 1);
        assert_eq!(result.pages_failed[0].0, 1);
    }
}
