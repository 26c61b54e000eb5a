//! # arXiv Ingest
//!
//! Fetches paper metadata from the arXiv search API, downloads each paper's PDF into a local
//! cache and extracts structured content from it, producing a per-run report.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (Record, ExtractedContent, PipelineOutcome, etc.)
//! - [`sources`]: The arXiv fetcher, the artifact downloader and the traits they implement
//! - [`parser`]: Precondition checks and pluggable content extraction backends
//! - [`pipeline`]: The bounded-concurrency download/parse orchestrator and run statistics
//! - [`store`]: Persistence boundary for successfully parsed papers
//! - [`utils`]: HTTP client, rate limiting, retry and filename helpers
//! - [`config`]: Configuration management

pub mod config;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use models::{ExtractedContent, PipelineOutcome, Record, SearchQuery};
pub use pipeline::{Pipeline, PipelineError, RunReport, RunStats};
pub use sources::{ArtifactDownloader, ArxivClient, SourceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
