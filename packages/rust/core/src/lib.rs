//! Orchestration for linksort.
//!
//! - [`pipeline`]: sequential batch classification with an evolving vocabulary
//! - [`categorize`]: fetch → filter → classify, as one call
//! - [`apply`]: write topics back, one item at a time
//! - [`artifact`]: the JSON file a run leaves behind

pub mod apply;
pub mod artifact;
pub mod categorize;
pub mod pipeline;

pub use apply::{ApplyReport, apply_topics};
pub use artifact::{build_artifact, default_artifact_path, read_artifact, write_artifact};
pub use categorize::{CategorizeConfig, CategorizeFailure, CategorizeResult, categorize};
pub use pipeline::{
    ClassifyFailure, ClassifyOutcome, ItemMap, MergeStats, ProgressReporter, SilentProgress,
    batch_count, classify, merge_assignments, select_items,
};
