//! Record model representing one metadata entry returned by the search API.

use serde::{Deserialize, Serialize};

/// A paper's metadata as returned by the arXiv search API
///
/// Records are created by the fetcher and never mutated afterwards; every
/// downstream stage only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// arXiv identifier (last path segment of the entry id, e.g. "2301.12345v1")
    pub id: String,

    /// Paper title, whitespace normalized
    pub title: String,

    /// Author names in document order
    pub authors: Vec<String>,

    /// Abstract text, whitespace normalized
    pub summary: String,

    /// Category terms (e.g. "cs.AI")
    pub categories: Vec<String>,

    /// Publication timestamp exactly as given by the API
    pub published: String,

    /// Direct PDF URL (always https)
    pub artifact_url: String,
}

impl Record {
    /// Create a record with only an identifier; every other field is empty
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            authors: Vec::new(),
            summary: String::new(),
            categories: Vec::new(),
            published: String::new(),
            artifact_url: String::new(),
        }
    }

    /// Check if the record points at a downloadable artifact
    pub fn has_artifact(&self) -> bool {
        !self.artifact_url.is_empty()
    }

    /// Primary category, if any
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }
}

/// Builder for constructing Record objects
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Create a new builder with the required identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            record: Record::new(id),
        }
    }

    /// Set title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.record.title = title.into();
        self
    }

    /// Set authors
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Set summary
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.record.summary = summary.into();
        self
    }

    /// Set categories
    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Set publication date
    pub fn published(mut self, published: impl Into<String>) -> Self {
        self.record.published = published.into();
        self
    }

    /// Set artifact URL
    pub fn artifact_url(mut self, url: impl Into<String>) -> Self {
        self.record.artifact_url = url.into();
        self
    }

    /// Build the Record
    pub fn build(self) -> Record {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = RecordBuilder::new("2301.12345v1")
            .title("Test Paper")
            .authors(["John Doe", "Jane Smith"])
            .categories(["cs.AI", "cs.LG"])
            .published("2023-01-15T10:00:00Z")
            .artifact_url("https://arxiv.org/pdf/2301.12345v1")
            .build();

        assert_eq!(record.id, "2301.12345v1");
        assert_eq!(record.title, "Test Paper");
        assert_eq!(record.authors, vec!["John Doe", "Jane Smith"]);
        assert_eq!(record.primary_category(), Some("cs.AI"));
        assert!(record.has_artifact());
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = Record::new("1234");
        assert!(record.title.is_empty());
        assert!(record.authors.is_empty());
        assert!(!record.has_artifact());
        assert_eq!(record.primary_category(), None);
    }
}
