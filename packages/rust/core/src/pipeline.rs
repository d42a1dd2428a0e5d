//! Batch classification pipeline.
//!
//! Items are split into fixed-size batches and sent to the classifier one
//! batch at a time. Batches run strictly in order: each call sees the
//! vocabulary left behind by the previous one, so labels introduced early
//! get reused later.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use linksort_classifier::{ClassificationResult, Classifier};
use linksort_shared::{HallucinationCounter, Item, ItemId, LinksortError, TopicVocabulary};

/// Cumulative id → item map built up across batches.
pub type ItemMap = BTreeMap<ItemId, Item>;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for categorize/apply runs.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Fractional completion in `[0.0, 1.0]` with an optional label.
    fn progress(&self, fraction: f64, label: Option<&str>);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn progress(&self, _fraction: f64, _label: Option<&str>) {}
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of a completed classification run.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    /// Every item seen, with merged topics.
    pub items: ItemMap,
    /// Number of classifier calls made.
    pub batches: usize,
    /// Hallucinations observed during this run.
    pub hallucinations: usize,
    /// Labels the classifier introduced that were not in the vocabulary.
    pub new_topics: Vec<String>,
}

/// A run that stopped early. Carries what was merged before the failure.
#[derive(Debug, thiserror::Error)]
#[error("classification stopped after {batches_completed} of {total_batches} batches: {source}")]
pub struct ClassifyFailure {
    /// Why the run stopped.
    pub source: LinksortError,
    /// Items from the batches that completed, with merged topics.
    pub partial: ItemMap,
    /// Batches that finished before the failure.
    pub batches_completed: usize,
    /// Batches the run would have made.
    pub total_batches: usize,
    /// Hallucinations observed by the completed batches.
    pub hallucinations: usize,
    /// Labels introduced by the completed batches.
    pub new_topics: Vec<String>,
}

/// Counts from merging one classifier response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Assignments applied to known items.
    pub merged: usize,
    /// Unknown ids plus rejected entries.
    pub hallucinated: usize,
    /// Labels added to the vocabulary.
    pub new_topics: Vec<String>,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Apply the caller-level filter before batching.
///
/// With `only_untopiced`, items that already have topics are dropped.
/// `limit` caps the number of items kept, after filtering.
pub fn select_items(items: Vec<Item>, only_untopiced: bool, limit: Option<usize>) -> Vec<Item> {
    let filtered = items
        .into_iter()
        .filter(|item| !only_untopiced || item.is_untopiced());

    match limit {
        Some(limit) => filtered.take(limit).collect(),
        None => filtered.collect(),
    }
}

/// Number of classifier calls needed for `len` items.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    len.div_ceil(batch_size)
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge one classifier response into the cumulative map.
///
/// Known ids get their topics overwritten (not extended) and every returned
/// label joins the vocabulary. Unknown ids and rejected entries are counted
/// as hallucinations and otherwise ignored.
pub fn merge_assignments(
    items: &mut ItemMap,
    vocabulary: &mut TopicVocabulary,
    response: ClassificationResult,
    hallucinations: &HallucinationCounter,
) -> MergeStats {
    let mut stats = MergeStats::default();

    for assignment in response.assignments {
        match items.get_mut(&assignment.id) {
            Some(item) => {
                stats
                    .new_topics
                    .extend(vocabulary.extend_with(assignment.topics.iter().cloned()));
                item.topics = assignment.topics;
                stats.merged += 1;
            }
            None => {
                let total = hallucinations.record();
                stats.hallucinated += 1;
                warn!(id = assignment.id, total, "classifier returned an unknown item id");
            }
        }
    }

    for _ in 0..response.rejected {
        let total = hallucinations.record();
        stats.hallucinated += 1;
        warn!(total, "classifier returned an uninterpretable entry");
    }

    stats
}

// ---------------------------------------------------------------------------
// Classify
// ---------------------------------------------------------------------------

/// Classify `items` in batches of `batch_size`, growing `vocabulary` as the
/// classifier introduces labels.
///
/// Progress `i / T` is reported before every batch but the first, and `1.0`
/// once all batches are done. A classifier error or cancellation stops the
/// run; the returned [`ClassifyFailure`] holds the items of the batches that
/// completed.
#[instrument(skip_all, fields(items = items.len(), batch_size = batch_size, model = classifier.model()))]
pub async fn classify<C: Classifier>(
    classifier: &C,
    items: Vec<Item>,
    vocabulary: &mut TopicVocabulary,
    batch_size: usize,
    hallucinations: &HallucinationCounter,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> std::result::Result<ClassifyOutcome, ClassifyFailure> {
    let total_batches = batch_count(items.len(), batch_size);
    let mut merged = ItemMap::new();

    if batch_size == 0 {
        return Err(ClassifyFailure {
            source: LinksortError::validation("batch size must be at least 1"),
            partial: merged,
            batches_completed: 0,
            total_batches,
            hallucinations: 0,
            new_topics: Vec::new(),
        });
    }

    info!(total_batches, vocabulary = vocabulary.len(), "starting classification");

    let mut run_hallucinations = 0;
    let mut new_topics = Vec::new();

    for (index, batch) in items.chunks(batch_size).enumerate() {
        let label = format!("Categorizing batch {} of {total_batches}", index + 1);
        if index > 0 {
            progress.progress(index as f64 / total_batches as f64, Some(&label));
        }

        if cancel.is_cancelled() {
            return Err(ClassifyFailure {
                source: LinksortError::Cancelled,
                partial: merged,
                batches_completed: index,
                total_batches,
                hallucinations: run_hallucinations,
                new_topics,
            });
        }

        // An id already merged by an earlier batch keeps its topics.
        let mut fresh = Vec::with_capacity(batch.len());
        for item in batch {
            if let Entry::Vacant(slot) = merged.entry(item.id) {
                slot.insert(item.clone());
                fresh.push(item.id);
            }
        }

        let snapshot = vocabulary.snapshot();
        debug!(batch = index, size = batch.len(), vocabulary = snapshot.len(), "{label}");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LinksortError::Cancelled),
            response = classifier.classify(batch, &snapshot) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(source) => {
                warn!(batch = index, error = %source, "classification batch failed");
                for id in &fresh {
                    merged.remove(id);
                }
                return Err(ClassifyFailure {
                    source,
                    partial: merged,
                    batches_completed: index,
                    total_batches,
                    hallucinations: run_hallucinations,
                    new_topics,
                });
            }
        };

        let stats = merge_assignments(&mut merged, vocabulary, response, hallucinations);
        debug!(
            batch = index,
            merged = stats.merged,
            hallucinated = stats.hallucinated,
            new_topics = stats.new_topics.len(),
            "batch merged"
        );
        run_hallucinations += stats.hallucinated;
        new_topics.extend(stats.new_topics);
    }

    progress.progress(1.0, Some("Categorization complete"));

    info!(
        items = merged.len(),
        batches = total_batches,
        hallucinations = run_hallucinations,
        new_topics = new_topics.len(),
        "classification complete"
    );

    Ok(ClassifyOutcome {
        items: merged,
        batches: total_batches,
        hallucinations: run_hallucinations,
        new_topics,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
