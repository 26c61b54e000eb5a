//! Core data models for fetched records, extracted content and pipeline outcomes.

mod content;
mod outcome;
mod record;
mod search;

pub use content::{ExtractedContent, ParserKind, Section};
pub use outcome::{DownloadResult, ErrorKind, ItemError, ItemState, PipelineOutcome};
pub use record::{Record, RecordBuilder};
pub use search::{DateRange, SearchQuery, SortBy, SortOrder, MAX_RESULTS_CEILING};
