//! Persistence boundary for parsed outcomes.
//!
//! The pipeline does not know how papers are stored. Callers hand the
//! successful outcomes of a run to an [`OutcomeSink`] and fold the returned
//! count into the run statistics.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::models::{ExtractedContent, PipelineOutcome, Record};
use crate::pipeline::RunReport;

/// Errors raised while persisting outcomes
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for successfully parsed outcomes
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Persist `outcomes`, returning how many were stored
    ///
    /// Outcomes without extracted content are skipped.
    async fn persist(&self, outcomes: &[PipelineOutcome]) -> Result<usize, StoreError>;
}

/// Persist the parsed outcomes of `report` and fold the result into it
///
/// The report survives a sink failure: the error is returned and also kept in
/// [`RunReport::store_error`], and every count and error entry stays intact.
pub async fn store_report(sink: &dyn OutcomeSink, report: &mut RunReport) -> Result<usize, StoreError> {
    let successes: Vec<PipelineOutcome> = report.successes().cloned().collect();
    match sink.persist(&successes).await {
        Ok(stored) => {
            report.stats.record_stored(stored);
            Ok(stored)
        }
        Err(e) => {
            tracing::error!("Failed to store parsed papers: {}", e);
            report.store_error = Some(e.to_string());
            Err(e)
        }
    }
}

/// One stored paper: upstream metadata next to the extracted content
#[derive(Debug, Serialize)]
struct StoredPaper<'a> {
    metadata: &'a Record,
    content: &'a ExtractedContent,
}

/// Appends one JSON document per parsed paper to a file
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeSink for JsonlSink {
    async fn persist(&self, outcomes: &[PipelineOutcome]) -> Result<usize, StoreError> {
        let mut buffer = Vec::new();
        let mut stored = 0;
        for outcome in outcomes {
            let Some(content) = &outcome.content else {
                continue;
            };
            serde_json::to_writer(
                &mut buffer,
                &StoredPaper {
                    metadata: &outcome.record,
                    content,
                },
            )?;
            buffer.push(b'\n');
            stored += 1;
        }

        if stored == 0 {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        tracing::info!("Stored {} papers in {}", stored, self.path.display());
        Ok(stored)
    }
}
