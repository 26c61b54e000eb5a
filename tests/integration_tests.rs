//! Integration tests for arXiv Ingest
//!
//! These tests drive whole runs through the public API: mock stages for the
//! concurrency and failure-isolation properties, and a local HTTP server for
//! the real fetcher and downloader.

use arxiv_ingest::models::{ErrorKind, ItemState, Record, RecordBuilder, SearchQuery};
use arxiv_ingest::parser::{MockExtractor, ParseLimits, ParsingAdapter};
use arxiv_ingest::pipeline::{Pipeline, PipelineOptions};
use arxiv_ingest::sources::mock::{sample_records, write_sample_pdf, MockDownloader, MockMetadataSource};
use arxiv_ingest::sources::{ArtifactDownloader, ArtifactSource, ArxivClient, MetadataSource};
use arxiv_ingest::store::{JsonlSink, OutcomeSink};
use arxiv_ingest::utils::{HttpClient, ManualClock, RateLimiter, RetryConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn adapter(extractor: Arc<MockExtractor>) -> Arc<ParsingAdapter> {
    Arc::new(ParsingAdapter::new(extractor, ParseLimits::default()))
}

fn mock_pipeline(
    records: Vec<Record>,
    downloader: Arc<MockDownloader>,
    extractor: Arc<MockExtractor>,
    options: PipelineOptions,
) -> Pipeline {
    Pipeline::new(
        Arc::new(MockMetadataSource::new(records)),
        downloader,
        adapter(extractor),
        options,
    )
    .unwrap()
}

#[tokio::test]
async fn test_download_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()).with_delay(Duration::from_millis(20)));
    let extractor = Arc::new(MockExtractor::new());
    let options = PipelineOptions {
        download_concurrency: 2,
        ..PipelineOptions::default()
    };
    let pipeline = mock_pipeline(sample_records(8), downloader.clone(), extractor, options);

    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.parsed, 8);
    assert_eq!(downloader.calls(), 8);
    assert_eq!(downloader.max_in_flight(), 2);
}

#[tokio::test]
async fn test_slow_parse_does_not_hold_download_slot() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()));
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_millis(400)));
    let options = PipelineOptions {
        download_concurrency: 1,
        parse_concurrency: 1,
        ..PipelineOptions::default()
    };
    let pipeline = mock_pipeline(sample_records(3), downloader.clone(), extractor.clone(), options);

    let run = tokio::spawn(async move {
        pipeline
            .run(&SearchQuery::new(), &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Every download finished while the first parse still holds the only parse slot
    assert_eq!(downloader.completed(), 3);
    assert_eq!(extractor.calls(), 1);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.stats.parsed, 3);
    assert_eq!(extractor.max_in_flight(), 1);
}

#[tokio::test]
async fn test_parse_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()));
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_millis(20)));
    let options = PipelineOptions {
        download_concurrency: 4,
        parse_concurrency: 1,
        ..PipelineOptions::default()
    };
    let pipeline = mock_pipeline(sample_records(6), downloader, extractor.clone(), options);

    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.parsed, 6);
    assert_eq!(extractor.calls(), 6);
    assert_eq!(extractor.max_in_flight(), 1);
}

#[tokio::test]
async fn test_empty_artifact_fails_only_its_item() {
    let dir = TempDir::new().unwrap();
    let records = sample_records(5);
    let empty = records[2].id.clone();
    let downloader = Arc::new(MockDownloader::new(dir.path()).with_empty(empty.clone()));
    let extractor = Arc::new(MockExtractor::new());
    let pipeline = mock_pipeline(records, downloader, extractor.clone(), PipelineOptions::default());

    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.fetched, 5);
    assert_eq!(report.stats.downloaded, 5);
    assert_eq!(report.stats.parsed, 4);
    assert_eq!(report.stats.errors.len(), 1);
    assert_eq!(report.stats.errors_of(ErrorKind::Validation).count(), 1);
    assert_eq!(report.stats.errors[0].record_id, empty);
    assert_eq!(report.outcomes[2].state, ItemState::ParseFailed);
    // The empty file never reached the extractor
    assert_eq!(extractor.calls(), 4);
}

#[tokio::test]
async fn test_page_limit_rejects_long_documents() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()).with_pages(3));
    let extractor = Arc::new(MockExtractor::new());
    let parser = Arc::new(ParsingAdapter::new(
        extractor.clone(),
        ParseLimits {
            max_pages: 2,
            ..ParseLimits::default()
        },
    ));
    let pipeline = Pipeline::new(
        Arc::new(MockMetadataSource::new(sample_records(2))),
        downloader,
        parser,
        PipelineOptions::default(),
    )
    .unwrap();

    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.parsed, 0);
    assert_eq!(report.stats.errors_of(ErrorKind::Validation).count(), 2);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_stops_outstanding_items() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()).with_delay(Duration::from_secs(30)));
    let extractor = Arc::new(MockExtractor::new());
    let options = PipelineOptions {
        download_concurrency: 2,
        ..PipelineOptions::default()
    };
    let pipeline = mock_pipeline(sample_records(5), downloader, extractor.clone(), options);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = pipeline.run(&SearchQuery::new(), &cancel).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 5);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.state == ItemState::Cancelled));
    assert_eq!(report.stats.errors_of(ErrorKind::Cancelled).count(), 5);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_deadline_cancels_run() {
    let dir = TempDir::new().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path()).with_delay(Duration::from_secs(30)));
    let options = PipelineOptions {
        deadline: Some(Duration::from_millis(50)),
        ..PipelineOptions::default()
    };
    let pipeline = mock_pipeline(
        sample_records(3),
        downloader,
        Arc::new(MockExtractor::new()),
        options,
    );

    let caller = CancellationToken::new();
    let report = pipeline.run(&SearchQuery::new(), &caller).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.stats.parsed, 0);
    // The deadline cancels the run's own token, not the caller's
    assert!(!caller.is_cancelled());
}

#[tokio::test]
async fn test_parsed_outcomes_are_stored() {
    let dir = TempDir::new().unwrap();
    let records = sample_records(3);
    let failing = records[0].id.clone();
    let downloader = Arc::new(MockDownloader::new(dir.path().join("pdfs")).with_failure(failing));
    std::fs::create_dir_all(dir.path().join("pdfs")).unwrap();
    let pipeline = mock_pipeline(
        records,
        downloader,
        Arc::new(MockExtractor::new()),
        PipelineOptions::default(),
    );

    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    let sink = JsonlSink::new(dir.path().join("papers.jsonl"));
    let successes: Vec<_> = report.successes().cloned().collect();
    let stored = sink.persist(&successes).await.unwrap();
    assert_eq!(stored, 2);

    let text = std::fs::read_to_string(sink.path()).unwrap();
    assert_eq!(text.lines().count(), 2);
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["metadata"]["id"], "2401.00002v1");
    assert_eq!(first["content"]["sections"][0]["title"], "Content");
}

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2402.00001v1</id>
    <published>2024-02-01T00:00:00Z</published>
    <title>Attention Revisited</title>
    <summary>First abstract.</summary>
    <author><name>Grace Hopper</name></author>
    <link title="pdf" href="http://arxiv.org/pdf/2402.00001v1" rel="related" type="application/pdf"/>
    <category term="cs.AI"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2402.00002v1</id>
    <published>2024-02-02T00:00:00Z</published>
    <title>Sparse Experts</title>
    <summary>Second abstract.</summary>
    <author><name>Edsger Dijkstra</name></author>
    <link title="pdf" href="http://arxiv.org/pdf/2402.00002v1" rel="related" type="application/pdf"/>
    <category term="cs.AI"/>
  </entry>
</feed>"#;

#[tokio::test]
async fn test_run_against_arxiv_api() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/query")
        .match_query(mockito::Matcher::UrlEncoded(
            "search_query".into(),
            "cat:cs.AI".into(),
        ))
        .with_status(200)
        .with_body(FEED)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let limiter = Arc::new(RateLimiter::with_clock(
        Duration::from_secs(3),
        Arc::new(ManualClock::new()),
    ));
    let source = ArxivClient::new(HttpClient::new(Duration::from_secs(5)).unwrap(), limiter)
        .with_base_url(format!("{}/api/query", server.url()));
    let downloader = Arc::new(MockDownloader::new(dir.path()));
    let pipeline = Pipeline::new(
        Arc::new(source),
        downloader.clone(),
        adapter(Arc::new(MockExtractor::new())),
        PipelineOptions::default(),
    )
    .unwrap();

    let report = pipeline
        .run(&SearchQuery::new().max_results(2), &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(report.stats.is_complete_success());
    assert_eq!(report.outcomes[0].record.title, "Attention Revisited");
    assert_eq!(
        report.outcomes[1].record.artifact_url,
        "https://arxiv.org/pdf/2402.00002v1"
    );
    assert_eq!(downloader.calls(), 2);
}

#[tokio::test]
async fn test_real_downloader_isolates_failed_transfer() {
    let dir = TempDir::new().unwrap();
    let fixture = dir.path().join("fixture.pdf");
    write_sample_pdf(&fixture, &["Introduction text".to_string()]).unwrap();
    let body = std::fs::read(&fixture).unwrap();

    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("GET", mockito::Matcher::Regex(r"^/pdf/2403\.0000[12]v1$".into()))
        .with_status(200)
        .with_body(body)
        .expect(2)
        .create_async()
        .await;
    let missing = server
        .mock("GET", "/pdf/2403.00003v1")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let records: Vec<Record> = (1..=3)
        .map(|n| {
            let id = format!("2403.{:05}v1", n);
            RecordBuilder::new(id.clone())
                .title(format!("Paper {}", n))
                .artifact_url(format!("{}/pdf/{}", server.url(), id))
                .build()
        })
        .collect();

    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_clock(Duration::from_secs(3), clock.clone()));
    let downloader = ArtifactDownloader::new(
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        limiter,
        dir.path().join("cache"),
    )
    .with_retry(RetryConfig::new(3, Duration::from_secs(5)));
    let pipeline = Pipeline::new(
        Arc::new(MockMetadataSource::new(Vec::new())),
        Arc::new(downloader),
        adapter(Arc::new(MockExtractor::new())),
        PipelineOptions::default(),
    )
    .unwrap();

    let report = pipeline.run_records(records, &CancellationToken::new()).await;

    ok.assert_async().await;
    missing.assert_async().await;
    assert_eq!(report.stats.downloaded, 2);
    assert_eq!(report.stats.parsed, 2);
    assert_eq!(report.stats.errors.len(), 1);
    assert_eq!(report.stats.errors[0].record_id, "2403.00003v1");
    assert_eq!(report.stats.errors[0].kind, ErrorKind::Download);
    assert!(dir.path().join("cache/2403.00001v1.pdf").exists());
    assert!(!dir.path().join("cache/2403.00003v1.pdf").exists());
    assert!(!dir.path().join("cache/2403.00003v1.pdf.part").exists());
}

#[tokio::test]
async fn test_fetch_and_download_share_one_limiter() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/query")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(FEED)
        .create_async()
        .await;
    server
        .mock("GET", "/pdf/2402.00001v1")
        .with_status(200)
        .with_body("%PDF-1.4\n")
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_clock(Duration::from_secs(3), clock.clone()));
    let http = HttpClient::new(Duration::from_secs(5)).unwrap();
    let client = ArxivClient::new(http.clone(), Arc::clone(&limiter))
        .with_base_url(format!("{}/api/query", server.url()));
    let downloader = ArtifactDownloader::new(http, limiter, dir.path());

    let cancel = CancellationToken::new();
    let records = client.fetch(&SearchQuery::new(), &cancel).await.unwrap();
    assert_eq!(records.len(), 2);

    let record = RecordBuilder::new(records[0].id.clone())
        .artifact_url(format!("{}/pdf/{}", server.url(), records[0].id))
        .build();
    let destination = downloader.destination_for(&record).unwrap();
    let done = downloader
        .download(&record, &destination, false, &cancel)
        .await
        .unwrap();

    assert_eq!(done.attempts, 1);
    // The download waited out the spacing left by the fetch
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
}

#[tokio::test]
async fn test_cached_artifacts_skip_download() {
    let dir = TempDir::new().unwrap();
    let records = sample_records(2);
    let downloader = ArtifactDownloader::new(
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(RateLimiter::new(Duration::ZERO)),
        dir.path(),
    );
    for record in &records {
        let destination = downloader.destination_for(record).unwrap();
        write_sample_pdf(&destination, &["cached".to_string()]).unwrap();
    }

    let extractor = Arc::new(MockExtractor::new());
    let pipeline = Pipeline::new(
        Arc::new(MockMetadataSource::new(records)),
        Arc::new(downloader),
        adapter(extractor.clone()),
        PipelineOptions::default(),
    )
    .unwrap();

    // Sample records point at arxiv.org; a cache hit never touches the network
    let report = pipeline
        .run(&SearchQuery::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.stats.is_complete_success());
    assert_eq!(extractor.calls(), 2);
}
