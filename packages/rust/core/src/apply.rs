//! Push categorized topics back to the links API.
//!
//! Updates go out one at a time. A failed update is recorded and the loop
//! moves on to the next item.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use linksort_fetcher::ApiClient;
use linksort_shared::{Item, ItemId, LinksortError, Result};

use crate::pipeline::ProgressReporter;

/// Outcome of an apply run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Items whose topics were written.
    pub updated: Vec<ItemId>,
    /// Items whose update failed, with the reason.
    pub failed: Vec<(ItemId, String)>,
    /// Items without topics; nothing was sent for these.
    pub skipped: Vec<ItemId>,
}

impl ApplyReport {
    /// Whether every update that was attempted went through.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write each item's topics through the update endpoint.
///
/// Progress is reported as `(k + 1) / total` after every item. Cancellation
/// stops the loop before the next request and returns
/// [`LinksortError::Cancelled`].
#[instrument(skip_all, fields(items = items.len()))]
pub async fn apply_topics(
    api: &ApiClient,
    items: &[Item],
    token: &str,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ApplyReport> {
    let total = items.len();
    let mut report = ApplyReport::default();

    progress.phase("Updating topics");

    for (k, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(done = k, total, "apply cancelled");
            return Err(LinksortError::Cancelled);
        }

        if item.is_untopiced() {
            report.skipped.push(item.id);
        } else {
            match api.update_topics(item.id, &item.topics, token).await {
                Ok(()) => report.updated.push(item.id),
                Err(e) => {
                    warn!(id = item.id, error = %e, "topic update failed");
                    report.failed.push((item.id, e.to_string()));
                }
            }
        }

        let label = format!("Updating {} / {total}", k + 1);
        progress.progress((k + 1) as f64 / total as f64, Some(&label));
    }

    info!(
        updated = report.updated.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "apply complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use linksort_shared::ApiConfig;

    use crate::pipeline::SilentProgress;

    fn api_for(server: &MockServer) -> ApiClient {
        ApiClient::new(ApiConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            user_id: "42".into(),
            concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: 1,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn item(id: ItemId, topics: &[&str]) -> Item {
        Item {
            id,
            url: format!("https://example.com/{id}"),
            title: String::new(),
            snippet: String::new(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        labels: Mutex<Vec<(f64, String)>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, _name: &str) {}
        fn progress(&self, fraction: f64, label: Option<&str>) {
            self.labels
                .lock()
                .unwrap()
                .push((fraction, label.unwrap_or_default().to_string()));
        }
    }

    #[tokio::test]
    async fn apply_reports_per_item_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/links/1/topics"))
            .and(header("Authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/links/2/topics"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/links/3/topics"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let items = vec![item(1, &["rust"]), item(2, &["ml"]), item(3, &["web"])];
        let progress = RecordingProgress::default();

        let report = apply_topics(
            &api_for(&server),
            &items,
            "Bearer t",
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.updated, vec![1, 3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2);
        assert!(report.failed[0].1.contains("403"));
        assert!(!report.is_clean());

        let labels = progress.labels.lock().unwrap().clone();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].1, "Updating 1 / 3");
        assert_eq!(labels[2].0, 1.0);
    }

    #[tokio::test]
    async fn untopiced_items_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let items = vec![item(1, &[]), item(2, &["rust"])];
        let report = apply_topics(
            &api_for(&server),
            &items,
            "Bearer t",
            &SilentProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.skipped, vec![1]);
        assert_eq!(report.updated, vec![2]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn cancelled_apply_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = apply_topics(
            &api_for(&server),
            &[item(1, &["rust"])],
            "Bearer t",
            &SilentProgress,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
