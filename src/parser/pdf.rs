//! PDF extraction backends.
//!
//! Both backends are synchronous libraries, so the work runs on tokio's
//! blocking pool. A panic inside a backend surfaces as
//! [`ExtractError::Task`] instead of taking the worker down.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{structure, ContentExtractor, ExtractError, ValidationReason};
use crate::models::{ExtractedContent, ParserKind};

const CONTENT_NOTE: &str = "Content extracted from PDF, metadata comes from arXiv API";

/// Extraction backend selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorBackend {
    /// `pdf-extract`: whole-document text with font decoding
    #[default]
    PdfExtract,
    /// `lopdf`: page-by-page text from content streams
    Lopdf,
}

impl std::fmt::Display for ExtractorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorBackend::PdfExtract => f.write_str("pdf-extract"),
            ExtractorBackend::Lopdf => f.write_str("lopdf"),
        }
    }
}

/// Construct the extractor for a backend
pub fn build_extractor(backend: ExtractorBackend) -> Arc<dyn ContentExtractor> {
    match backend {
        ExtractorBackend::PdfExtract => Arc::new(PdfExtractExtractor),
        ExtractorBackend::Lopdf => Arc::new(LopdfExtractor),
    }
}

/// Count the pages of a PDF by walking its page tree
pub fn count_pages(path: &Path) -> Result<usize, ValidationReason> {
    let doc = lopdf::Document::load(path).map_err(|e| ValidationReason::Unreadable(e.to_string()))?;
    Ok(doc.get_pages().len())
}

/// Turn raw text into structured content with the common metadata keys
fn build_content(parser: ParserKind, raw_text: String, pages: Option<usize>) -> ExtractedContent {
    let (sections, references) = structure(&raw_text);

    let mut content = ExtractedContent::new(parser, raw_text)
        .with_metadata("source", parser.id())
        .with_metadata("note", CONTENT_NOTE);
    let characters = content.char_count();
    content = content.with_metadata("characters", characters);
    if let Some(pages) = pages {
        content = content.with_metadata("pages", pages);
    }

    content.sections = sections;
    content.references = references;
    content
}

/// Extractor backed by the `pdf-extract` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractExtractor;

#[async_trait]
impl ContentExtractor for PdfExtractExtractor {
    fn kind(&self) -> ParserKind {
        ParserKind::PdfExtract
    }

    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError> {
        let path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await?
            .map_err(|e| ExtractError::Backend(e.to_string()))?;

        if text.trim().is_empty() {
            // Scanned or image-only documents extract to nothing
            tracing::debug!("pdf-extract returned no text");
        }

        Ok(build_content(ParserKind::PdfExtract, text, None))
    }
}

/// Extractor backed by `lopdf` content-stream decoding
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    fn extract_blocking(path: &Path) -> Result<(String, usize), ExtractError> {
        let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Backend(e.to_string()))?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut text = String::new();
        let mut failed = 0;
        for page_number in pages.keys() {
            match doc.extract_text(&[*page_number]) {
                Ok(page_text) => {
                    text.push_str(&page_text);
                    if !page_text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::debug!("lopdf could not decode page {}: {}", page_number, e);
                }
            }
        }

        if page_count > 0 && failed == page_count {
            return Err(ExtractError::Backend(format!(
                "no page of {} could be decoded",
                page_count
            )));
        }

        Ok((text, page_count))
    }
}

#[async_trait]
impl ContentExtractor for LopdfExtractor {
    fn kind(&self) -> ParserKind {
        ParserKind::Lopdf
    }

    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError> {
        let path = path.to_path_buf();
        let (text, pages) =
            tokio::task::spawn_blocking(move || Self::extract_blocking(&path)).await??;
        Ok(build_content(ParserKind::Lopdf, text, Some(pages)))
    }
}
