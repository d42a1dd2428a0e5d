//! Topic classification boundary.
//!
//! The [`Classifier`] trait is what the batch pipeline talks to. Model output
//! is decoded by [`parse_categorization`], which rejects individual malformed
//! entries without failing the whole response. [`OpenAiClassifier`] implements
//! the trait against any OpenAI-compatible chat completions endpoint using
//! JSON-schema structured output.

mod openai;
mod prompt;
mod response;

use std::future::Future;

use linksort_shared::{Item, ItemId, Result};

pub use openai::OpenAiClassifier;
pub use prompt::{SYSTEM_PROMPT, build_user_message};
pub use response::{MAX_TOPICS_PER_ITEM, parse_categorization, response_schema};

/// Topics the classifier assigned to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAssignment {
    /// The id the model returned. Not guaranteed to be a submitted id.
    pub id: ItemId,
    /// Between one and [`MAX_TOPICS_PER_ITEM`] labels.
    pub topics: Vec<String>,
}

/// Decoded classifier output for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Well-formed `(id, topics)` pairs.
    pub assignments: Vec<TopicAssignment>,
    /// Entries that could not be interpreted (wrong shape, no usable topics).
    pub rejected: usize,
}

/// Assigns topics to a batch of items, biased toward a known vocabulary.
pub trait Classifier: Send + Sync {
    /// Model identifier, for logs and run artifacts.
    fn model(&self) -> &str;

    /// Classify `batch`, preferring labels from `vocabulary`.
    ///
    /// Transport and response-shape errors are returned as `Err` and end the
    /// caller's run.
    fn classify(
        &self,
        batch: &[Item],
        vocabulary: &[String],
    ) -> impl Future<Output = Result<ClassificationResult>> + Send;
}
