//! Structured content extracted from a downloaded artifact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extraction backend that produced a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    /// Full-text extraction through the `pdf-extract` crate
    PdfExtract,
    /// Page-wise extraction through `lopdf`
    Lopdf,
    /// Stand-in extractor used by tests and dry runs
    Mock,
}

impl ParserKind {
    /// Identifier recorded in content metadata
    pub fn id(&self) -> &'static str {
        match self {
            ParserKind::PdfExtract => "pdf-extract",
            ParserKind::Lopdf => "lopdf",
            ParserKind::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ParserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A titled section of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub body: String,
    /// Heading depth, 1 for top-level sections
    pub level: u8,
}

impl Section {
    pub fn new(title: impl Into<String>, body: impl Into<String>, level: u8) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            level,
        }
    }
}

/// Content extracted from an artifact that passed every precondition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// Sections in document order
    pub sections: Vec<Section>,

    /// Full extracted text
    pub raw_text: String,

    /// Reference entries, one per citation
    pub references: Vec<String>,

    /// Backend that produced this content
    pub parser: ParserKind,

    /// Backend-specific metadata (page count, character count, ...)
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExtractedContent {
    /// Create content from raw text with no sections or references yet
    pub fn new(parser: ParserKind, raw_text: impl Into<String>) -> Self {
        Self {
            sections: Vec::new(),
            raw_text: raw_text.into(),
            references: Vec::new(),
            parser,
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of characters in the raw text
    pub fn char_count(&self) -> usize {
        self.raw_text.chars().count()
    }
}
