//! Links API client and concurrent paginated fetcher.
//!
//! This crate provides:
//! - [`ApiClient`]: listing, topics, and topic-update calls against the links API
//! - [`PageFetcher`]: bounded-concurrency retrieval of every listing page
//! - [`PageSource`]: the seam between the two, so the fetcher can be driven
//!   by any page provider

pub mod client;
pub mod engine;

pub use client::ApiClient;
pub use engine::{FetchResult, PageFetcher, PageOutcome, PageSource};
