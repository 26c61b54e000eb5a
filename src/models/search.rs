//! Search request models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Hard ceiling the arXiv API puts on `max_results` for a single request
pub const MAX_RESULTS_CEILING: usize = 2000;

/// Sort order for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Value of the `sortOrder` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

/// Sort field for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortBy {
    /// Value of the `sortBy` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::LastUpdatedDate => "lastUpdatedDate",
            SortBy::SubmittedDate => "submittedDate",
        }
    }
}

/// Inclusive submission date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Create a range, swapping the bounds if they are reversed
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// Parse a range from two dates in `YYYYMMDD` or `YYYY-MM-DD` form
    pub fn parse(from: &str, to: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self::new(parse_date(from)?, parse_date(to)?))
    }

    /// Render as an arXiv `submittedDate` filter covering both days entirely
    pub fn to_filter(&self) -> String {
        format!(
            "submittedDate:[{}0000 TO {}2359]",
            self.from.format("%Y%m%d"),
            self.to.format("%Y%m%d")
        )
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d").or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
}

/// Search query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Category filter; the client's configured category is used when absent
    pub category: Option<String>,

    /// Maximum number of results to return (clamped to [`MAX_RESULTS_CEILING`])
    pub max_results: usize,

    /// Pagination offset
    pub start: usize,

    /// Sort by field
    pub sort_by: SortBy,

    /// Sort order
    pub sort_order: SortOrder,

    /// Optional submission date filter
    pub date_range: Option<DateRange>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            category: None,
            max_results: 100,
            start: 0,
            sort_by: SortBy::SubmittedDate,
            sort_order: SortOrder::Descending,
            date_range: None,
        }
    }
}

impl SearchQuery {
    /// Create a new search query with default sorting (newest submissions first)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Set pagination offset
    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Set sort by
    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by = sort;
        self
    }

    /// Set sort order
    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    /// Set category filter
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restrict to papers submitted within the range
    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// `max_results` after applying the upstream ceiling
    pub fn clamped_max_results(&self) -> usize {
        self.max_results.min(MAX_RESULTS_CEILING)
    }
}
