//! Mock sources for testing purposes.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{Record, RecordBuilder, SearchQuery};
use crate::sources::{ArtifactSource, Downloaded, MetadataSource, SourceError};

/// A metadata source that returns a fixed list of records
#[derive(Debug, Default)]
pub struct MockMetadataSource {
    records: Vec<Record>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockMetadataSource {
    /// Create a mock returning `records` for every query
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Create a mock whose fetch always fails with a `Fetch` error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Number of fetches made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for MockMetadataSource {
    fn id(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        if let Some(message) = &self.failure {
            return Err(SourceError::Fetch(message.clone()));
        }
        Ok(self
            .records
            .iter()
            .take(query.clamped_max_results())
            .cloned()
            .collect())
    }
}

/// What the mock downloader writes for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    Pdf,
    Empty,
    Fail,
    Panic,
}

/// An artifact source that writes generated PDFs instead of downloading
///
/// Individual records can be set up to produce an empty file, to fail, or to
/// panic. Tracks how many downloads run at once so tests can check the
/// download concurrency cap.
#[derive(Debug)]
pub struct MockDownloader {
    dir: PathBuf,
    pages: usize,
    delay: Duration,
    empty: HashSet<String>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDownloader {
    /// Create a mock writing one-page PDFs into `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pages: 1,
            delay: Duration::ZERO,
            empty: HashSet::new(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of pages in every generated PDF
    pub fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    /// Hold every download for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Write a zero-byte file for this record
    pub fn with_empty(mut self, id: impl Into<String>) -> Self {
        self.empty.insert(id.into());
        self
    }

    /// Fail the download of this record after three attempts
    pub fn with_failure(mut self, id: impl Into<String>) -> Self {
        self.failing.insert(id.into());
        self
    }

    /// Panic while downloading this record
    pub fn with_panic(mut self, id: impl Into<String>) -> Self {
        self.panicking.insert(id.into());
        self
    }

    /// Number of downloads started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of downloads that wrote their file
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of downloads observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn artifact_for(&self, id: &str) -> Artifact {
        if self.panicking.contains(id) {
            Artifact::Panic
        } else if self.failing.contains(id) {
            Artifact::Fail
        } else if self.empty.contains(id) {
            Artifact::Empty
        } else {
            Artifact::Pdf
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactSource for MockDownloader {
    fn destination_for(&self, record: &Record) -> Result<PathBuf, SourceError> {
        let stem = crate::utils::safe_file_stem(&record.id).map_err(|e| SourceError::Download {
            attempts: 0,
            message: e.to_string(),
        })?;
        Ok(self.dir.join(format!("{}.pdf", stem)))
    }

    async fn download(
        &self,
        record: &Record,
        destination: &Path,
        _force: bool,
        cancel: &CancellationToken,
    ) -> Result<Downloaded, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        match self.artifact_for(&record.id) {
            Artifact::Panic => panic!("mock downloader panicked on {}", record.id),
            Artifact::Fail => {
                return Err(SourceError::Download {
                    attempts: 3,
                    message: format!("HTTP 503 for {}", record.artifact_url),
                })
            }
            Artifact::Empty => tokio::fs::write(destination, b"").await?,
            Artifact::Pdf => {
                let pages: Vec<String> = (1..=self.pages)
                    .map(|n| format!("{} page {}", record.title, n))
                    .collect();
                write_sample_pdf(destination, &pages)?;
            }
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Downloaded {
            path: destination.to_path_buf(),
            attempts: 1,
            cached: false,
        })
    }
}

/// Build `count` records with ids `2401.<n>` and PDF links
pub fn sample_records(count: usize) -> Vec<Record> {
    (1..=count)
        .map(|n| {
            let id = format!("2401.{:05}v1", n);
            RecordBuilder::new(id.clone())
                .title(format!("Sample Paper {}", n))
                .authors([format!("Author {}", n)])
                .categories(["cs.AI"])
                .published("2024-01-01T00:00:00Z")
                .artifact_url(format!("https://arxiv.org/pdf/{}", id))
                .build()
        })
        .collect()
}

/// Write a minimal PDF with one text line per page
pub fn write_sample_pdf(path: &Path, pages: &[String]) -> std::io::Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text.as_str())]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().map_err(std::io::Error::other)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(path)?;
    Ok(())
}
