//! Upstream sources: the metadata search API and the artifact host.
//!
//! Two traits describe the seams the pipeline depends on:
//!
//! - [`MetadataSource`] turns a [`SearchQuery`] into an ordered list of [`Record`]s
//! - [`ArtifactSource`] materialises a record's artifact on local disk
//!
//! [`ArxivClient`] and [`ArtifactDownloader`] are the production implementations;
//! both pace every network call through one shared
//! [`RateLimiter`](crate::utils::RateLimiter). The [`mock`] module provides
//! in-memory stand-ins for tests.

mod arxiv;
mod download;
pub mod mock;

pub use arxiv::{parse_feed, ArxivClient, DEFAULT_ARXIV_API_URL};
pub use download::ArtifactDownloader;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::models::{ErrorKind, Record, SearchQuery};

/// A source of metadata records
#[async_trait]
pub trait MetadataSource: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs (e.g. "arxiv")
    fn id(&self) -> &str;

    /// Fetch records matching the query, in upstream order
    async fn fetch(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, SourceError>;
}

/// A successfully materialised artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// Local path of the artifact
    pub path: PathBuf,
    /// Network attempts made; zero on a cache hit
    pub attempts: u32,
    /// Whether the file was already present and reused
    pub cached: bool,
}

/// A source of binary artifacts referenced by records
#[async_trait]
pub trait ArtifactSource: Send + Sync + std::fmt::Debug {
    /// Cache path the artifact of `record` is stored at
    fn destination_for(&self, record: &Record) -> Result<PathBuf, SourceError>;

    /// Download the artifact of `record` to `destination`
    ///
    /// Without `force`, an existing file at `destination` is returned as-is.
    async fn download(
        &self,
        record: &Record,
        destination: &Path,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Downloaded, SourceError>;
}

/// Errors that can occur when talking to an upstream source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport failure or non-success HTTP status
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Response body could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Artifact download gave up
    #[error("Download failed after {attempts} attempt(s): {message}")]
    Download { attempts: u32, message: String },

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled while the call was pending
    #[error("Cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Fetch(_) | SourceError::Timeout(_))
    }

    /// Error kind recorded for this error in a run report
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Fetch(_) => ErrorKind::Fetch,
            SourceError::Parse(_) => ErrorKind::Parse,
            SourceError::Timeout(_) => ErrorKind::Timeout,
            SourceError::Download { .. } | SourceError::Io(_) => ErrorKind::Download,
            SourceError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else {
            SourceError::Fetch(err.to_string())
        }
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}
