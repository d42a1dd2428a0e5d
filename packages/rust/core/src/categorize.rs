//! End-to-end `categorize` flow: fetch → filter → load topics → classify.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use linksort_classifier::Classifier;
use linksort_fetcher::{ApiClient, PageFetcher};
use linksort_shared::{HallucinationCounter, Item, LinksortError, TopicVocabulary};

use crate::pipeline::{self, ProgressReporter};

/// Configuration for the `categorize` flow.
#[derive(Debug, Clone)]
pub struct CategorizeConfig {
    /// Items per classifier call.
    pub batch_size: usize,
    /// Skip items that already carry topics.
    pub only_untopiced: bool,
    /// Cap on the number of items classified.
    pub limit: Option<usize>,
}

/// Result of the `categorize` flow.
#[derive(Debug, Default)]
pub struct CategorizeResult {
    /// Classified items, ordered by id.
    pub items: Vec<Item>,
    /// Vocabulary after the last batch.
    pub vocabulary: Vec<String>,
    /// Labels introduced during this run.
    pub new_topics: Vec<String>,
    /// Hallucinations observed during this run.
    pub hallucinations: usize,
    /// Classifier calls made.
    pub batches: usize,
    /// Items returned by the listing endpoint.
    pub links_fetched: usize,
    /// Listing pages that failed, with the reason.
    pub pages_failed: Vec<(u32, String)>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// A `categorize` run that did not finish.
#[derive(Debug, thiserror::Error)]
#[error("categorize failed: {source}")]
pub struct CategorizeFailure {
    /// Why the run stopped.
    pub source: LinksortError,
    /// What the completed batches produced. `None` when the run failed
    /// before classification started.
    pub partial: Option<CategorizeResult>,
    /// Batches the run would have made.
    pub total_batches: usize,
}

impl CategorizeFailure {
    /// Whether the run was stopped by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

impl From<LinksortError> for CategorizeFailure {
    fn from(source: LinksortError) -> Self {
        Self {
            source,
            partial: None,
            total_batches: 0,
        }
    }
}

/// Run the full `categorize` flow for the user configured on `api`.
///
/// A classifier failure ends the run. The returned [`CategorizeFailure`]
/// carries the items of every batch that completed before it.
#[instrument(skip_all, fields(user_id = %api.config().user_id, model = classifier.model()))]
pub async fn categorize<C: Classifier>(
    api: &ApiClient,
    classifier: &C,
    config: &CategorizeConfig,
    hallucinations: &HallucinationCounter,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> std::result::Result<CategorizeResult, CategorizeFailure> {
    let start = Instant::now();

    // --- Phase 1: Fetch ---
    progress.phase("Fetching saved links");
    let fetcher = PageFetcher::new(api.clone(), api.config().concurrency);
    let fetched = fetcher.fetch_all(cancel).await?;
    let links_fetched = fetched.items.len();

    if !fetched.pages_failed.is_empty() {
        warn!(
            failed = fetched.pages_failed.len(),
            "some listing pages failed, results may be incomplete"
        );
    }

    let selected = pipeline::select_items(fetched.items, config.only_untopiced, config.limit);
    info!(
        fetched = links_fetched,
        selected = selected.len(),
        only_untopiced = config.only_untopiced,
        "links selected for categorization"
    );

    // --- Phase 2: Vocabulary ---
    progress.phase("Loading existing topics");
    let mut vocabulary: TopicVocabulary = api.fetch_topics().await.into_iter().collect();

    // --- Phase 3: Classify ---
    progress.phase("Categorizing links");
    let outcome = match pipeline::classify(
        classifier,
        selected,
        &mut vocabulary,
        config.batch_size,
        hallucinations,
        progress,
        cancel,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(failure) => {
            warn!(
                batches_completed = failure.batches_completed,
                total_batches = failure.total_batches,
                kept = failure.partial.len(),
                "categorization stopped early"
            );
            let partial = CategorizeResult {
                items: failure.partial.into_values().collect(),
                vocabulary: vocabulary.snapshot(),
                new_topics: failure.new_topics,
                hallucinations: failure.hallucinations,
                batches: failure.batches_completed,
                links_fetched,
                pages_failed: fetched.pages_failed,
                elapsed: start.elapsed(),
            };
            return Err(CategorizeFailure {
                source: failure.source,
                partial: Some(partial),
                total_batches: failure.total_batches,
            });
        }
    };

    let elapsed = start.elapsed();
    info!(
        items = outcome.items.len(),
        batches = outcome.batches,
        hallucinations = outcome.hallucinations,
        elapsed_ms = elapsed.as_millis() as u64,
        "categorize complete"
    );

    Ok(CategorizeResult {
        items: outcome.items.into_values().collect(),
        vocabulary: vocabulary.snapshot(),
        new_topics: outcome.new_topics,
        hallucinations: outcome.hallucinations,
        batches: outcome.batches,
        links_fetched,
        pages_failed: fetched.pages_failed,
        elapsed,
    })
}
