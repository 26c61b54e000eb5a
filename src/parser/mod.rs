//! Boundary to the content-extraction capability.
//!
//! [`ParsingAdapter`] checks a downloaded artifact against a fixed list of
//! preconditions and only then hands it to a [`ContentExtractor`]. A rejected
//! artifact never reaches the extractor, and a rejection is reported
//! differently from an extractor failure.
//!
//! Preconditions, checked in order:
//!
//! 1. the file exists
//! 2. the file is not empty
//! 3. the file is not larger than the configured maximum
//! 4. the file starts with `%PDF-`
//! 5. the page count does not exceed the configured maximum

mod mock;
mod pdf;
mod sections;

pub use mock::MockExtractor;
pub use pdf::{build_extractor, count_pages, ExtractorBackend, LopdfExtractor, PdfExtractExtractor};
pub use sections::{structure, LEAD_SECTION_TITLE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::models::{ErrorKind, ExtractedContent, ParserKind};

/// Magic bytes every PDF starts with
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Number of leading bytes inspected for the magic
const HEADER_PROBE_LEN: u64 = 8;

/// An extraction backend
#[async_trait]
pub trait ContentExtractor: Send + Sync + std::fmt::Debug {
    /// Backend identifier recorded on extracted content
    fn kind(&self) -> ParserKind;

    /// Extract structured content from a validated artifact
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError>;
}

/// Errors raised by an extraction backend
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExtractError::Task(err.to_string())
    }
}

/// Why an artifact was rejected before extraction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationReason {
    #[error("file not found")]
    NotFound,

    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("missing %PDF- header")]
    BadHeader,

    #[error("{count} pages exceeds limit of {limit}")]
    TooManyUnits { count: usize, limit: usize },

    #[error("unreadable document: {0}")]
    Unreadable(String),
}

/// Failure of [`ParsingAdapter::parse`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationReason),

    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl ParseFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseFailure::Validation(_) => ErrorKind::Validation,
            ParseFailure::Extraction(_) => ErrorKind::Extraction,
        }
    }
}

/// Upper bounds an artifact must respect to be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseLimits {
    /// Largest accepted file, in bytes
    pub max_file_size: u64,
    /// Largest accepted page count
    pub max_pages: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_file_size: 20 * 1024 * 1024,
            max_pages: 30,
        }
    }
}

/// Validates artifacts and delegates extraction to a backend
#[derive(Debug, Clone)]
pub struct ParsingAdapter {
    extractor: Arc<dyn ContentExtractor>,
    limits: ParseLimits,
}

impl ParsingAdapter {
    pub fn new(extractor: Arc<dyn ContentExtractor>, limits: ParseLimits) -> Self {
        Self { extractor, limits }
    }

    pub fn limits(&self) -> ParseLimits {
        self.limits
    }

    pub fn extractor_kind(&self) -> ParserKind {
        self.extractor.kind()
    }

    /// Run every precondition, returning the page count on success
    pub async fn validate(&self, path: &Path) -> Result<usize, ValidationReason> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ValidationReason::NotFound)
            }
            Err(e) => return Err(ValidationReason::Unreadable(e.to_string())),
        };
        if !metadata.is_file() {
            return Err(ValidationReason::NotFound);
        }

        let size = metadata.len();
        if size == 0 {
            return Err(ValidationReason::Empty);
        }
        if size > self.limits.max_file_size {
            return Err(ValidationReason::TooLarge {
                size,
                limit: self.limits.max_file_size,
            });
        }

        let header = read_header(path)
            .await
            .map_err(|e| ValidationReason::Unreadable(e.to_string()))?;
        if !header.starts_with(PDF_MAGIC) {
            return Err(ValidationReason::BadHeader);
        }

        let owned: PathBuf = path.to_path_buf();
        let count = tokio::task::spawn_blocking(move || count_pages(&owned))
            .await
            .map_err(|e| ValidationReason::Unreadable(e.to_string()))??;
        if count > self.limits.max_pages {
            return Err(ValidationReason::TooManyUnits {
                count,
                limit: self.limits.max_pages,
            });
        }

        Ok(count)
    }

    /// Validate an artifact and extract its content
    pub async fn parse(&self, path: &Path) -> Result<ExtractedContent, ParseFailure> {
        let pages = match self.validate(path).await {
            Ok(pages) => pages,
            Err(reason) => {
                tracing::warn!("Rejected {}: {}", path.display(), reason);
                return Err(reason.into());
            }
        };

        tracing::debug!(
            pages,
            parser = %self.extractor.kind(),
            "Extracting {}",
            path.display()
        );

        let mut content = self
            .extractor
            .extract(path)
            .await
            .map_err(|e| ParseFailure::Extraction(e.to_string()))?;

        content
            .metadata
            .entry("pages".to_string())
            .or_insert_with(|| pages.into());
        Ok(content)
    }
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN as usize);
    file.take(HEADER_PROBE_LEN).read_to_end(&mut header).await?;
    Ok(header)
}
