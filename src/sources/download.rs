//! Artifact downloader with a local file cache.
//!
//! Bytes are streamed into a sibling `<name>.part` file that is renamed onto
//! the destination only once the transfer completed, so a file at the
//! destination is always a whole artifact and can be reused as a cache hit.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::models::Record;
use crate::sources::{ArtifactSource, Downloaded, SourceError};
use crate::utils::{safe_file_stem, validate_url, with_retry, HttpClient, RateLimiter, RetryConfig};

/// Downloads record artifacts into a cache directory
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    http: HttpClient,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    cache_dir: PathBuf,
    extension: String,
}

impl ArtifactDownloader {
    pub fn new(
        http: HttpClient,
        limiter: Arc<RateLimiter>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            limiter,
            retry: RetryConfig::default(),
            cache_dir: cache_dir.into(),
            extension: "pdf".to_string(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// One transfer attempt: claim the limiter, stream into the part file, rename
    async fn attempt(
        &self,
        url: &str,
        destination: &Path,
        part: &Path,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, SourceError> {
        self.limiter.acquire(cancel).await?;
        tracing::debug!(attempt, url, "Downloading artifact");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            result = self.transfer(url, destination, part) => result,
        };

        if result.is_err() {
            remove_if_exists(part).await;
        }
        result
    }

    async fn transfer(&self, url: &str, destination: &Path, part: &Path) -> Result<u64, SourceError> {
        let response = self.http.client().get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!("HTTP {} for {}", status, url)));
        }

        let file = File::create(part).await?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }

        writer.flush().await?;
        drop(writer);

        fs::rename(part, destination).await?;
        Ok(bytes_written)
    }
}

#[async_trait]
impl ArtifactSource for ArtifactDownloader {
    fn destination_for(&self, record: &Record) -> Result<PathBuf, SourceError> {
        let stem = safe_file_stem(&record.id).map_err(|e| SourceError::Download {
            attempts: 0,
            message: e.to_string(),
        })?;
        Ok(self.cache_dir.join(format!("{}.{}", stem, self.extension)))
    }

    async fn download(
        &self,
        record: &Record,
        destination: &Path,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Downloaded, SourceError> {
        if !record.has_artifact() {
            return Err(SourceError::Download {
                attempts: 0,
                message: format!("record {} has no artifact URL", record.id),
            });
        }
        validate_url(&record.artifact_url).map_err(|e| SourceError::Download {
            attempts: 0,
            message: e.to_string(),
        })?;

        if !force && fs::try_exists(destination).await.map_err(io_failure)? {
            tracing::debug!("Cache hit: {}", destination.display());
            return Ok(Downloaded {
                path: destination.to_path_buf(),
                attempts: 0,
                cached: true,
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(io_failure)?;
        }

        let part = part_path(destination)?;
        let part = part.as_path();
        let url = record.artifact_url.as_str();
        let clock = self.limiter.clock();

        let result = with_retry(self.retry, clock.as_ref(), cancel, |attempt| {
            self.attempt(url, destination, part, attempt, cancel)
        })
        .await;

        match result {
            Ok(done) => {
                tracing::info!(
                    bytes = done.value,
                    attempts = done.attempts,
                    "Downloaded {}",
                    destination.display()
                );
                Ok(Downloaded {
                    path: destination.to_path_buf(),
                    attempts: done.attempts,
                    cached: false,
                })
            }
            Err(failure) => {
                remove_if_exists(part).await;
                match failure.error {
                    SourceError::Cancelled => Err(SourceError::Cancelled),
                    error => {
                        remove_if_exists(destination).await;
                        Err(SourceError::Download {
                            attempts: failure.attempts,
                            message: error.to_string(),
                        })
                    }
                }
            }
        }
    }
}

fn io_failure(err: std::io::Error) -> SourceError {
    SourceError::Download {
        attempts: 0,
        message: err.to_string(),
    }
}

fn part_path(destination: &Path) -> Result<PathBuf, SourceError> {
    let name = destination.file_name().ok_or_else(|| SourceError::Download {
        attempts: 0,
        message: format!("invalid destination: {}", destination.display()),
    })?;
    let mut part = name.to_os_string();
    part.push(".part");
    Ok(destination.with_file_name(part))
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordBuilder;
    use crate::utils::ManualClock;
    use std::time::Duration;
    use tempfile::TempDir;

    const BODY: &[u8] = b"%PDF-1.4\n% test artifact\n";

    fn downloader(cache_dir: &Path) -> (ArtifactDownloader, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(
            Duration::from_secs(3),
            clock.clone(),
        ));
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let downloader = ArtifactDownloader::new(http, limiter, cache_dir)
            .with_retry(RetryConfig::new(3, Duration::from_secs(5)));
        (downloader, clock)
    }

    fn record(url: &str) -> Record {
        RecordBuilder::new("2301.00001v1").artifact_url(url).build()
    }

    #[test]
    fn test_destination_for() {
        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());

        let path = downloader
            .destination_for(&Record::new("math.GT/0104020v1"))
            .unwrap();
        assert_eq!(path, dir.path().join("math.GT_2F0104020v1.pdf"));
    }

    #[tokio::test]
    async fn test_download_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(200)
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = record(&format!("{}/pdf/2301.00001v1", server.url()));
        let dest = downloader.destination_for(&record).unwrap();

        let done = downloader
            .download(&record, &dest, false, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(done.attempts, 1);
        assert!(!done.cached);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert!(!part_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(200)
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = record(&format!("{}/pdf/2301.00001v1", server.url()));
        let dest = downloader.destination_for(&record).unwrap();
        let cancel = CancellationToken::new();

        downloader.download(&record, &dest, false, &cancel).await.unwrap();
        let second = downloader.download(&record, &dest, false, &cancel).await.unwrap();

        // Only the first call reached the server
        mock.assert_async().await;
        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(second.path, dest);
    }

    #[tokio::test]
    async fn test_force_redownloads() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(200)
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = record(&format!("{}/pdf/2301.00001v1", server.url()));
        let dest = downloader.destination_for(&record).unwrap();
        std::fs::write(&dest, b"stale").unwrap();

        let done = downloader
            .download(&record, &dest, true, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(!done.cached);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(200)
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (downloader, clock) = downloader(dir.path());
        let record = record(&format!("{}/pdf/2301.00001v1", server.url()));
        let dest = downloader.destination_for(&record).unwrap();

        let done = downloader
            .download(&record, &dest, false, &CancellationToken::new())
            .await
            .unwrap();

        failing.assert_async().await;
        ok.assert_async().await;
        assert_eq!(done.attempts, 3);

        // Backoff of 5s then 10s; the limiter has nothing left to wait for
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_retry_exhaustion_leaves_no_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pdf/2301.00001v1")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = record(&format!("{}/pdf/2301.00001v1", server.url()));
        let dest = downloader.destination_for(&record).unwrap();
        std::fs::write(&dest, b"stale").unwrap();

        let err = downloader
            .download(&record, &dest, true, &CancellationToken::new())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, SourceError::Download { attempts: 3, .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_url() {
        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = Record::new("2301.00001v1");
        let dest = downloader.destination_for(&record).unwrap();

        let err = downloader
            .download(&record, &dest, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Download { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_download_cancelled() {
        let dir = TempDir::new().unwrap();
        let (downloader, _) = downloader(dir.path());
        let record = record("http://127.0.0.1:9/pdf/2301.00001v1");
        let dest = downloader.destination_for(&record).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = downloader
            .download(&record, &dest, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
        assert!(!dest.exists());
    }
}
