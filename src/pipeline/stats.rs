//! Run statistics folded from per-item outcomes.

use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

use crate::models::{ErrorKind, PipelineOutcome};

/// One failed item in a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub record_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Records returned by the fetch phase (after de-duplication)
    pub fetched: usize,
    /// Items whose artifact reached local disk
    pub downloaded: usize,
    /// Items whose artifact was parsed
    pub parsed: usize,
    /// Parsed items accepted by the outcome sink
    pub stored: usize,
    /// Wall time of the whole run, fetch included
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// One entry per item that did not end in `Parsed`, in fold order
    pub errors: Vec<ErrorEntry>,
}

impl RunStats {
    /// Number of items that did not end in `Parsed`
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    /// Whether every fetched record was parsed
    pub fn is_complete_success(&self) -> bool {
        self.errors.is_empty() && self.parsed == self.fetched
    }

    /// Add items accepted by the outcome sink; never exceeds the parsed count
    pub fn record_stored(&mut self, count: usize) {
        self.stored = self.stored.saturating_add(count).min(self.parsed);
    }

    /// Error entries of one kind
    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &ErrorEntry> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Folds outcomes into [`RunStats`]
///
/// Owned by the task that joins the item-pipelines, so it needs no locking.
#[derive(Debug)]
pub struct StatsAggregator {
    started: Instant,
    fetched: usize,
    downloaded: usize,
    parsed: usize,
    errors: Vec<ErrorEntry>,
}

impl StatsAggregator {
    /// Start aggregating; `started` is taken before the fetch
    pub fn with_start(fetched: usize, started: Instant) -> Self {
        Self {
            started,
            fetched,
            downloaded: 0,
            parsed: 0,
            errors: Vec::new(),
        }
    }

    /// Fold one outcome
    pub fn record(&mut self, outcome: &PipelineOutcome) {
        if outcome.downloaded() {
            self.downloaded += 1;
        }

        if outcome.is_success() {
            self.parsed += 1;
            return;
        }

        let (kind, message) = match &outcome.error {
            Some(error) => (error.kind, error.message.clone()),
            None => (
                ErrorKind::Pipeline,
                format!("item ended in state '{}' without an error", outcome.state),
            ),
        };
        self.errors.push(ErrorEntry {
            record_id: outcome.record_id().to_string(),
            kind,
            message,
        });
    }

    /// Final statistics
    pub fn finish(self) -> RunStats {
        RunStats {
            fetched: self.fetched,
            downloaded: self.downloaded,
            parsed: self.parsed,
            stored: 0,
            elapsed: self.started.elapsed(),
            errors: self.errors,
        }
    }
}
