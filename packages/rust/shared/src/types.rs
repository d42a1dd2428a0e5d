//! Core domain types for linksort.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the run artifact format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Stable identifier of a saved link on the remote service.
pub type ItemId = i64;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A saved link together with the topics assigned to it.
///
/// This is also the projection sent to the classifier, so field names are
/// part of the prompt contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique, stable identifier.
    pub id: ItemId,
    /// The saved URL.
    pub url: String,
    /// Page title (may be empty).
    #[serde(default)]
    pub title: String,
    /// Highlighted snippet or description (may be empty).
    #[serde(default)]
    pub snippet: String,
    /// Assigned topics. Treated as a set; may be empty.
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Item {
    /// Whether the item has no topics yet.
    pub fn is_untopiced(&self) -> bool {
        self.topics.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TopicVocabulary
// ---------------------------------------------------------------------------

/// The growing set of topic labels known for a user.
///
/// Seeded from the user's existing topics and extended with every label the
/// classifier assigns. Snapshots are sorted so prompts are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicVocabulary {
    labels: BTreeSet<String>,
}

impl TopicVocabulary {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label. Returns `true` if it was not present before.
    pub fn insert(&mut self, label: impl Into<String>) -> bool {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return false;
        }
        if trimmed.len() == label.len() {
            self.labels.insert(label)
        } else {
            self.labels.insert(trimmed.to_string())
        }
    }

    /// Add several labels, returning the ones that were new.
    pub fn extend_with<I, S>(&mut self, labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = Vec::new();
        for label in labels {
            let label = label.into();
            if self.insert(label.clone()) {
                added.push(label.trim().to_string());
            }
        }
        added
    }

    /// Whether the label is known.
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no labels are known.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Point-in-time copy of the labels, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        self.labels.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for TopicVocabulary {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut vocabulary = Self::new();
        vocabulary.extend_with(iter);
        vocabulary
    }
}

// ---------------------------------------------------------------------------
// HallucinationCounter
// ---------------------------------------------------------------------------

/// Counts classifier entries that could not be matched to a known item.
///
/// Owned by the caller and passed into each run, so one counter can span
/// several runs in the same process.
#[derive(Debug, Default)]
pub struct HallucinationCounter {
    count: AtomicUsize,
}

impl HallucinationCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one hallucination and return the new total.
    pub fn record(&self) -> usize {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current total.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying a categorize run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// RunArtifact
// ---------------------------------------------------------------------------

/// The JSON document a categorize run leaves behind for review and `apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Unique identifier for this run.
    pub run_id: RunId,
    /// User whose links were categorized.
    pub user_id: String,
    /// When the run finished.
    pub created_at: DateTime<Utc>,
    /// Classifier model used.
    pub model: String,
    /// Items per classifier call.
    pub batch_size: usize,
    /// Hallucinations observed during the run.
    pub hallucinations: usize,
    /// Set when the run stopped early and `items` covers only the batches
    /// that completed.
    #[serde(default)]
    pub partial: bool,
    /// Vocabulary after the last batch.
    #[serde(default)]
    pub vocabulary: Vec<String>,
    /// Categorized items, ordered by id.
    pub items: Vec<Item>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn item_defaults_missing_fields() {
        let json = r#"{"id": 7, "url": "https://example.com"}"#;
        let item: Item = serde_json::from_str(json).expect("deserialize");
        assert_eq!(item.id, 7);
        assert!(item.title.is_empty());
        assert!(item.is_untopiced());
    }

    #[test]
    fn vocabulary_ignores_duplicates_and_blanks() {
        let mut vocab: TopicVocabulary = ["rust", "databases"].into_iter().collect();
        assert_eq!(vocab.len(), 2);

        let added = vocab.extend_with(["rust", "  ", " compilers ", "ml"]);
        assert_eq!(added, vec!["compilers".to_string(), "ml".to_string()]);
        assert!(vocab.contains("compilers"));
        assert_eq!(vocab.len(), 4);
    }

    #[test]
    fn vocabulary_snapshot_is_sorted() {
        let vocab: TopicVocabulary = ["zig", "ada", "lisp"].into_iter().collect();
        assert_eq!(vocab.snapshot(), vec!["ada", "lisp", "zig"]);
    }

    #[test]
    fn hallucination_counter_counts() {
        let counter = HallucinationCounter::new();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.record(), 1);
        assert_eq!(counter.record(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn artifact_serialization() {
        let artifact = RunArtifact {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            user_id: "42".into(),
            created_at: Utc::now(),
            model: "gpt-4-turbo".into(),
            batch_size: 20,
            hallucinations: 1,
            partial: false,
            vocabulary: vec!["rust".into()],
            items: vec![Item {
                id: 1,
                url: "https://example.com".into(),
                title: "Example".into(),
                snippet: String::new(),
                topics: vec!["rust".into()],
            }],
        };

        let json = serde_json::to_string_pretty(&artifact).expect("serialize");
        let parsed: RunArtifact = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].topics, vec!["rust"]);
        assert!(!parsed.partial);
    }

    #[test]
    fn artifact_without_partial_flag_is_complete() {
        let json = format!(
            r#"{{"schema_version": {CURRENT_SCHEMA_VERSION}, "run_id": "{}", "user_id": "42",
            "created_at": "2026-01-01T00:00:00Z", "model": "m", "batch_size": 5,
            "hallucinations": 0, "items": []}}"#,
            RunId::new()
        );
        let parsed: RunArtifact = serde_json::from_str(&json).expect("deserialize");
        assert!(!parsed.partial);
    }
}
