//! Per-item results produced by the download/parse pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{ExtractedContent, Record};

/// Result of downloading one record's artifact
///
/// The path is present if and only if the download succeeded; the fields are
/// private so that invariant cannot be broken from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    record_id: String,
    path: Option<PathBuf>,
}

impl DownloadResult {
    /// Create a successful download result
    pub fn success(record_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            record_id: record_id.into(),
            path: Some(path.into()),
        }
    }

    /// Create a failed download result
    pub fn failure(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            path: None,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }
}

/// Lifecycle of a single item-pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Fetched,
    Downloading,
    Downloaded,
    DownloadFailed,
    Parsing,
    Parsed,
    ParseFailed,
    Cancelled,
}

impl ItemState {
    /// Whether the item-pipeline has stopped in this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::DownloadFailed | ItemState::Parsed | ItemState::ParseFailed | ItemState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (Fetched, Downloading) => true,
            (Downloading, Downloaded | DownloadFailed) => true,
            (Downloaded, Parsing) => true,
            (Parsing, Parsed | ParseFailed) => true,
            (state, Cancelled) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemState::Fetched => "fetched",
            ItemState::Downloading => "downloading",
            ItemState::Downloaded => "downloaded",
            ItemState::DownloadFailed => "download failed",
            ItemState::Parsing => "parsing",
            ItemState::Parsed => "parsed",
            ItemState::ParseFailed => "parse failed",
            ItemState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error taxonomy shared by the fetch phase and item-pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Search API unreachable or answered with a non-success status
    Fetch,
    /// Search response could not be parsed
    Parse,
    /// Search request timed out
    Timeout,
    /// Artifact download exhausted its retries or hit a filesystem error
    Download,
    /// Artifact rejected by a parser precondition
    Validation,
    /// Extraction backend failed on an accepted artifact
    Extraction,
    /// Any other per-item fault, including panics
    Pipeline,
    /// Run was cancelled before the item finished
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Parse => "parse",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Download => "download",
            ErrorKind::Validation => "validation",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Pipeline => "pipeline",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// An error tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal result of one item-pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub record: Record,
    pub state: ItemState,
    pub download: DownloadResult,
    pub content: Option<ExtractedContent>,
    pub error: Option<ItemError>,
}

impl PipelineOutcome {
    /// Download and parse both succeeded
    pub fn parsed(record: Record, path: impl Into<PathBuf>, content: ExtractedContent) -> Self {
        Self {
            download: DownloadResult::success(&record.id, path),
            record,
            state: ItemState::Parsed,
            content: Some(content),
            error: None,
        }
    }

    /// The artifact could not be downloaded
    pub fn download_failed(record: Record, error: ItemError) -> Self {
        Self {
            download: DownloadResult::failure(&record.id),
            record,
            state: ItemState::DownloadFailed,
            content: None,
            error: Some(error),
        }
    }

    /// The artifact was downloaded but rejected or not extractable
    pub fn parse_failed(record: Record, path: impl Into<PathBuf>, error: ItemError) -> Self {
        Self {
            download: DownloadResult::success(&record.id, path),
            record,
            state: ItemState::ParseFailed,
            content: None,
            error: Some(error),
        }
    }

    /// The run was cancelled while this item was in flight
    ///
    /// `path` is the artifact location if the download had already finished.
    pub fn cancelled(record: Record, path: Option<PathBuf>) -> Self {
        Self {
            download: download_result(&record, path),
            record,
            state: ItemState::Cancelled,
            content: None,
            error: Some(ItemError::new(ErrorKind::Cancelled, "run cancelled")),
        }
    }

    /// An unexpected fault outside the normal failure paths
    pub fn faulted(record: Record, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        let state = if path.is_some() {
            ItemState::ParseFailed
        } else {
            ItemState::DownloadFailed
        };
        Self {
            download: download_result(&record, path),
            record,
            state,
            content: None,
            error: Some(ItemError::new(ErrorKind::Pipeline, message)),
        }
    }

    /// Record id this outcome belongs to
    pub fn record_id(&self) -> &str {
        &self.record.id
    }

    /// Whether the artifact reached local disk
    pub fn downloaded(&self) -> bool {
        self.download.is_success()
    }

    pub fn is_success(&self) -> bool {
        self.state == ItemState::Parsed
    }
}

fn download_result(record: &Record, path: Option<PathBuf>) -> DownloadResult {
    match path {
        Some(path) => DownloadResult::success(&record.id, path),
        None => DownloadResult::failure(&record.id),
    }
}
