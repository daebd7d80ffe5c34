//! Health forum scraping pipeline.
//!
//! Scrapes posts and member profiles from a HealthUnlocked-style forum into
//! a local staging store, then enriches them with model-backed classifiers.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod config;
pub mod constants;
pub mod db;
pub mod enrich;
pub mod pipeline;
pub mod scraper;
