//! Fetch → download → parse orchestration.
//!
//! A run fetches every record first, then spawns one item-pipeline per record.
//! Each item-pipeline passes through two independent gates:
//!
//! - a download slot, held only while the artifact is being materialised
//! - a parse slot, requested after the download slot has been released
//!
//! A failing, cancelled or panicking item-pipeline produces its own typed
//! [`PipelineOutcome`] and never affects its siblings. Only a failed fetch
//! aborts the run.

mod stats;

pub use stats::{ErrorEntry, RunStats, StatsAggregator};

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::models::{DownloadResult, ErrorKind, ItemError, ItemState, PipelineOutcome, Record, SearchQuery};
use crate::parser::ParsingAdapter;
use crate::sources::{ArtifactSource, MetadataSource, SourceError};

/// Errors that abort a whole run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to fetch records: {0}")]
    Fetch(#[source] SourceError),

    #[error("run cancelled before records were fetched")]
    Cancelled,

    #[error("{stage} concurrency must be at least 1")]
    InvalidConcurrency { stage: &'static str },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::InvalidConcurrency { .. } => ErrorKind::Pipeline,
        }
    }
}

/// Knobs of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Maximum simultaneous downloads
    pub download_concurrency: usize,
    /// Maximum simultaneous parses
    pub parse_concurrency: usize,
    /// Re-download artifacts already in the cache
    pub force_download: bool,
    /// Cancel the run once this much time has passed
    pub deadline: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            download_concurrency: 5,
            parse_concurrency: 3,
            force_download: false,
            deadline: None,
        }
    }
}

/// Receives progress notifications during a run
pub trait PipelineObserver: Send + Sync {
    /// Records were fetched and item-pipelines are about to start
    fn on_fetched(&self, _count: usize) {}

    /// An item-pipeline moved to a new state
    fn on_state(&self, _record_id: &str, _state: ItemState) {}

    /// An item-pipeline reached its terminal state
    fn on_outcome(&self, _outcome: &PipelineOutcome) {}
}

/// Result of [`Pipeline::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: RunStats,
    /// One outcome per record, in fetch order
    pub outcomes: Vec<PipelineOutcome>,
    /// Whether the run was cancelled or hit its deadline
    pub cancelled: bool,
    /// Why the parsed outcomes could not be persisted, if they could not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

impl RunReport {
    /// Outcomes that ended in `Parsed`
    pub fn successes(&self) -> impl Iterator<Item = &PipelineOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }
}

/// Shared, immutable state every item-pipeline reads
struct Stages {
    artifacts: Arc<dyn ArtifactSource>,
    parser: Arc<ParsingAdapter>,
    download_slots: Semaphore,
    parse_slots: Semaphore,
    force_download: bool,
    observer: Option<Arc<dyn PipelineObserver>>,
}

/// The bounded-concurrency ingest pipeline
pub struct Pipeline {
    source: Arc<dyn MetadataSource>,
    stages: Arc<Stages>,
    options: PipelineOptions,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source.id())
            .field("options", &self.options)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        artifacts: Arc<dyn ArtifactSource>,
        parser: Arc<ParsingAdapter>,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        Self::build(source, artifacts, parser, options, None)
    }

    /// Attach an observer notified of progress
    pub fn with_observer(self, observer: Arc<dyn PipelineObserver>) -> Result<Self, PipelineError> {
        let Pipeline {
            source,
            stages,
            options,
        } = self;
        let artifacts = Arc::clone(&stages.artifacts);
        let parser = Arc::clone(&stages.parser);
        Self::build(source, artifacts, parser, options, Some(observer))
    }

    fn build(
        source: Arc<dyn MetadataSource>,
        artifacts: Arc<dyn ArtifactSource>,
        parser: Arc<ParsingAdapter>,
        options: PipelineOptions,
        observer: Option<Arc<dyn PipelineObserver>>,
    ) -> Result<Self, PipelineError> {
        if options.download_concurrency == 0 {
            return Err(PipelineError::InvalidConcurrency { stage: "download" });
        }
        if options.parse_concurrency == 0 {
            return Err(PipelineError::InvalidConcurrency { stage: "parse" });
        }

        Ok(Self {
            source,
            stages: Arc::new(Stages {
                artifacts,
                parser,
                download_slots: Semaphore::new(options.download_concurrency),
                parse_slots: Semaphore::new(options.parse_concurrency),
                force_download: options.force_download,
                observer,
            }),
            options,
        })
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Fetch records for `query` and push each through download and parse
    ///
    /// Fails only if the fetch itself fails or is cancelled. Per-item failures
    /// are reported in the returned [`RunStats`].
    pub async fn run(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let run_token = self.run_token(cancel);
        let _stop_deadline = run_token.clone().drop_guard();

        tracing::info!(source = self.source.id(), "Fetching records");
        let records = match self.source.fetch(query, &run_token).await {
            Ok(records) => records,
            Err(SourceError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!("Fetch failed: {}", e);
                return Err(PipelineError::Fetch(e));
            }
        };

        Ok(self.process_records(records, &run_token, started).await)
    }

    /// Push already-fetched records through download and parse
    pub async fn run_records(&self, records: Vec<Record>, cancel: &CancellationToken) -> RunReport {
        let started = Instant::now();
        let run_token = self.run_token(cancel);
        let _stop_deadline = run_token.clone().drop_guard();
        self.process_records(records, &run_token, started).await
    }

    /// Child token of `cancel`, cancelled by the deadline if one is configured
    fn run_token(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        if let Some(limit) = self.options.deadline {
            let deadline_token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline_token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!("Run deadline of {:?} reached, cancelling", limit);
                        deadline_token.cancel();
                    }
                }
            });
        }
        token
    }

    async fn process_records(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> RunReport {
        let records = dedup_records(records);
        let mut stats = StatsAggregator::with_start(records.len(), started);

        if let Some(observer) = &self.stages.observer {
            observer.on_fetched(records.len());
        }
        tracing::info!(
            records = records.len(),
            download_concurrency = self.options.download_concurrency,
            parse_concurrency = self.options.parse_concurrency,
            "Starting item pipelines"
        );

        let tasks: Vec<(Record, Arc<OnceLock<PathBuf>>, JoinHandle<PipelineOutcome>)> = records
            .into_iter()
            .map(|record| {
                let artifact = Arc::new(OnceLock::new());
                let span = tracing::info_span!("item", id = %record.id);
                let handle = tokio::spawn(
                    run_item(
                        Arc::clone(&self.stages),
                        record.clone(),
                        cancel.clone(),
                        Arc::clone(&artifact),
                    )
                    .instrument(span),
                );
                (record, artifact, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (record, artifact, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(id = %record.id, error = %e, "Item pipeline panicked");
                    let outcome = PipelineOutcome::faulted(
                        record,
                        artifact.get().cloned(),
                        format!("item pipeline aborted: {}", e),
                    );
                    if let Some(observer) = &self.stages.observer {
                        observer.on_outcome(&outcome);
                    }
                    outcome
                }
            };
            stats.record(&outcome);
            outcomes.push(outcome);
        }

        let stats = stats.finish();
        tracing::info!(
            fetched = stats.fetched,
            downloaded = stats.downloaded,
            parsed = stats.parsed,
            failed = stats.failed(),
            elapsed = ?stats.elapsed,
            "Run complete"
        );

        RunReport {
            stats,
            outcomes,
            cancelled: cancel.is_cancelled(),
            store_error: None,
        }
    }
}

/// Drop repeated record ids, keeping the first occurrence
fn dedup_records(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| {
            let first = seen.insert(record.id.clone());
            if !first {
                tracing::warn!(id = %record.id, "Dropping duplicate record");
            }
            first
        })
        .collect()
}

async fn run_item(
    stages: Arc<Stages>,
    record: Record,
    cancel: CancellationToken,
    artifact: Arc<OnceLock<PathBuf>>,
) -> PipelineOutcome {
    let outcome = drive_item(&stages, record, &cancel, &artifact).await;
    tracing::debug!(state = %outcome.state, "Item finished");
    if let Some(observer) = &stages.observer {
        observer.on_outcome(&outcome);
    }
    outcome
}

/// State of one item-pipeline, reported to the observer on every step
struct Progress<'a> {
    stages: &'a Stages,
    record_id: String,
    state: ItemState,
}

impl<'a> Progress<'a> {
    fn new(stages: &'a Stages, record: &Record) -> Self {
        Self {
            stages,
            record_id: record.id.clone(),
            state: ItemState::Fetched,
        }
    }

    fn advance(&mut self, next: ItemState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "Illegal item state transition");
        }
        tracing::trace!(from = %self.state, to = %next, "Item state");
        self.state = next;
        if let Some(observer) = &self.stages.observer {
            observer.on_state(&self.record_id, next);
        }
    }

    /// Move to the outcome's terminal state and hand the outcome back
    fn finish(mut self, outcome: PipelineOutcome) -> PipelineOutcome {
        self.advance(outcome.state);
        outcome
    }
}

async fn drive_item(
    stages: &Stages,
    record: Record,
    cancel: &CancellationToken,
    artifact: &OnceLock<PathBuf>,
) -> PipelineOutcome {
    let mut progress = Progress::new(stages, &record);

    progress.advance(ItemState::Downloading);
    let download = match download_stage(stages, &record, cancel).await {
        Ok(download) => download,
        Err(DownloadStageError::Cancelled) => {
            return progress.finish(PipelineOutcome::cancelled(record, None))
        }
        Err(DownloadStageError::Failed(error)) => {
            tracing::warn!("Download failed: {}", error);
            return progress.finish(PipelineOutcome::download_failed(record, error));
        }
    };
    let Some(path) = download.path().map(PathBuf::from) else {
        return progress.finish(PipelineOutcome::faulted(
            record,
            None,
            "download succeeded without a path",
        ));
    };
    let _ = artifact.set(path.clone());
    progress.advance(ItemState::Downloaded);

    let _slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return progress.finish(PipelineOutcome::cancelled(record, Some(path))),
        slot = stages.parse_slots.acquire() => match slot {
            Ok(slot) => slot,
            Err(_) => return progress.finish(PipelineOutcome::faulted(record, Some(path), "parse pool closed")),
        },
    };

    progress.advance(ItemState::Parsing);
    tracing::debug!("Parsing {}", path.display());
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return progress.finish(PipelineOutcome::cancelled(record, Some(path))),
        result = stages.parser.parse(&path) => result,
    };

    let outcome = match result {
        Ok(content) => {
            tracing::info!(sections = content.sections.len(), "Parsed");
            PipelineOutcome::parsed(record, path, content)
        }
        Err(failure) => {
            tracing::warn!("Parse failed: {}", failure);
            PipelineOutcome::parse_failed(
                record,
                path,
                ItemError::new(failure.kind(), failure.to_string()),
            )
        }
    };
    progress.finish(outcome)
}

enum DownloadStageError {
    Cancelled,
    Failed(ItemError),
}

/// Hold a download slot only for the duration of the download
async fn download_stage(
    stages: &Stages,
    record: &Record,
    cancel: &CancellationToken,
) -> Result<DownloadResult, DownloadStageError> {
    let _slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadStageError::Cancelled),
        slot = stages.download_slots.acquire() => slot.map_err(|_| {
            DownloadStageError::Failed(ItemError::new(ErrorKind::Pipeline, "download pool closed"))
        })?,
    };

    let destination = stages
        .artifacts
        .destination_for(record)
        .map_err(|e| DownloadStageError::Failed(ItemError::new(ErrorKind::Download, e.to_string())))?;

    tracing::debug!("Downloading to {}", destination.display());
    match stages
        .artifacts
        .download(record, &destination, stages.force_download, cancel)
        .await
    {
        Ok(done) => {
            if done.cached {
                tracing::debug!("Using cached artifact");
            }
            Ok(DownloadResult::success(&record.id, done.path))
        }
        Err(SourceError::Cancelled) => Err(DownloadStageError::Cancelled),
        Err(e) => Err(DownloadStageError::Failed(ItemError::new(
            ErrorKind::Download,
            e.to_string(),
        ))),
    }
}
