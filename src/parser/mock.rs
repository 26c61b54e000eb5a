//! Mock extractor for testing purposes.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ContentExtractor, ExtractError};
use crate::models::{ExtractedContent, ParserKind, Section};

/// An extractor that returns canned content and counts its use
///
/// Tracks how many extractions run at once so tests can check the parse
/// concurrency cap.
#[derive(Debug, Default)]
pub struct MockExtractor {
    failure: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExtractor {
    /// Create a mock that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Hold every extraction for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of extractions started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of extractions observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    fn kind(&self) -> ParserKind {
        ParserKind::Mock
    }

    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = &self.failure {
            return Err(ExtractError::Backend(message.clone()));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut content = ExtractedContent::new(ParserKind::Mock, format!("Mock text for {}", name))
            .with_metadata("source", ParserKind::Mock.id());
        content.sections.push(Section::new("Content", content.raw_text.clone(), 1));
        Ok(content)
    }
}
