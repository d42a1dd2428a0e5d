//! Shared types, error model, and configuration for linksort.
//!
//! This crate is the foundation depended on by all other linksort crates.
//! It provides:
//! - [`LinksortError`]: the unified error type
//! - Domain types ([`Item`], [`TopicVocabulary`], [`HallucinationCounter`], [`RunArtifact`])
//! - Configuration ([`AppConfig`], [`ApiConfig`], [`ClassifierConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, ApiSection, AppConfig, ClassifierConfig, ClassifierSection, FetchSection,
    auth_token, classifier_api_key, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{LinksortError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, HallucinationCounter, Item, ItemId, RunArtifact, RunId,
    TopicVocabulary,
};
