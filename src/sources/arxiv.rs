//! arXiv metadata client: rate-limited search requests and Atom feed parsing.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{Record, RecordBuilder, SearchQuery};
use crate::sources::{MetadataSource, SourceError};
use crate::utils::{upgrade_to_https, HttpClient, RateLimiter};

/// Base URL for the arXiv query API
pub const DEFAULT_ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

/// Category searched when a query names none
const DEFAULT_CATEGORY: &str = "cs.AI";

/// MIME type of the link that points at an entry's PDF
const PDF_MIME: &str = "application/pdf";

/// arXiv search client
///
/// Every request first claims the shared rate limiter, so searches and
/// artifact downloads together never exceed the configured pace.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    http: HttpClient,
    limiter: Arc<RateLimiter>,
    base_url: String,
    category: String,
}

impl ArxivClient {
    /// Create a client against the public API
    pub fn new(http: HttpClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            limiter,
            base_url: DEFAULT_ARXIV_API_URL.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }

    /// Point the client at a different endpoint (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Category used when the query does not name one
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Build the `search_query` expression for a structured query
    ///
    /// `cat:<category>`, optionally joined with a `submittedDate` range that
    /// covers both bounding days entirely.
    pub fn build_search_query(&self, query: &SearchQuery) -> String {
        let category = query.category.as_deref().unwrap_or(&self.category);
        let mut parts = vec![format!("cat:{}", category)];

        if let Some(range) = &query.date_range {
            parts.push(range.to_filter());
        }

        parts.join(" AND ")
    }

    /// Build the full request URL
    fn build_url(&self, search_query: &str, query: &SearchQuery) -> String {
        let params = [
            ("search_query", search_query.to_string()),
            ("start", query.start.to_string()),
            ("max_results", query.clamped_max_results().to_string()),
            ("sortBy", query.sort_by.as_str().to_string()),
            ("sortOrder", query.sort_order.as_str().to_string()),
        ];

        let encoded = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.base_url, encoded)
    }

    /// Fetch records for a raw arXiv query expression
    ///
    /// `search_query` is passed through untouched (e.g. `au:LeCun AND cat:cs.AI`);
    /// paging and sorting still come from `query`.
    pub async fn fetch_with_query(
        &self,
        search_query: &str,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, SourceError> {
        self.limiter.acquire(cancel).await?;

        let url = self.build_url(search_query, query);
        tracing::debug!("arXiv request: {}", url);

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            body = self.get_text(&url) => body?,
        };

        let records = parse_feed(&body)?;
        tracing::info!(
            "arXiv returned {} records for '{}'",
            records.len(),
            search_query
        );
        Ok(records)
    }

    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .http
            .client()
            .get(url)
            .header("Accept", "application/atom+xml")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!(
                "arXiv API returned status: {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl MetadataSource for ArxivClient {
    fn id(&self) -> &str {
        "arxiv"
    }

    async fn fetch(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, SourceError> {
        let search_query = self.build_search_query(query);
        self.fetch_with_query(&search_query, query, cancel).await
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: String,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term", default)]
    term: String,
}

/// Parse an arXiv Atom feed into records, preserving document order
///
/// Entries without an identifier are skipped; every other missing field
/// defaults to empty. A document that is not well-formed yields an error and
/// no records at all.
pub fn parse_feed(xml: &str) -> Result<Vec<Record>, SourceError> {
    let feed: Feed = from_str(xml)?;

    let records = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let record = entry_to_record(entry);
            if record.is_none() {
                tracing::debug!("Skipping feed entry without an id");
            }
            record
        })
        .collect();

    Ok(records)
}

fn entry_to_record(entry: Entry) -> Option<Record> {
    let id = entry
        .id
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if id.is_empty() {
        return None;
    }

    let artifact_url = entry
        .links
        .iter()
        .find(|link| link.mime.as_deref() == Some(PDF_MIME))
        .map(|link| upgrade_to_https(link.href.trim()))
        .unwrap_or_default();

    let record = RecordBuilder::new(id)
        .title(normalize_whitespace(&entry.title))
        .authors(
            entry
                .authors
                .into_iter()
                .map(|a| normalize_whitespace(&a.name))
                .filter(|name| !name.is_empty()),
        )
        .summary(normalize_whitespace(&entry.summary))
        .categories(
            entry
                .categories
                .into_iter()
                .map(|c| c.term)
                .filter(|term| !term.is_empty()),
        )
        .published(entry.published.trim())
        .artifact_url(artifact_url)
        .build();

    Some(record)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
