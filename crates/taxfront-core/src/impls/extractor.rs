//! MetadataOnlyExtractor - file facts without text extraction.
//!
//! PDF text and OCR are out of scope here; this adapter reports what can be
//! read cheaply from the bytes so the document pipeline has something to store.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Document, ProcessorError};
use crate::ports::{DocumentExtractor, Extraction};

const PAGE_MARKER: &[u8] = b"/Type /Page";
const PAGE_MARKER_COMPACT: &[u8] = b"/Type/Page";

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataOnlyExtractor;

impl MetadataOnlyExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for MetadataOnlyExtractor {
    async fn extract_pdf(&self, path: &Path) -> Result<Extraction, ProcessorError> {
        let bytes = tokio::fs::read(path).await?;
        let mut metadata = base_metadata(bytes.len());
        metadata.insert("pages".into(), Value::from(count_pages(&bytes)));
        Ok(Extraction {
            metadata,
            text: String::new(),
        })
    }

    async fn extract_image(&self, path: &Path) -> Result<Extraction, ProcessorError> {
        let len = tokio::fs::metadata(path).await?.len();
        Ok(Extraction {
            metadata: base_metadata(len as usize),
            text: String::new(),
        })
    }
}

fn base_metadata(size: usize) -> Document {
    let mut doc = Document::new();
    doc.insert("file_size".into(), Value::from(size));
    doc
}

/// Count `/Type /Page` objects, skipping the `/Type /Pages` tree nodes.
fn count_pages(bytes: &[u8]) -> usize {
    [PAGE_MARKER, PAGE_MARKER_COMPACT]
        .iter()
        .map(|marker| {
            bytes
                .windows(marker.len())
                .enumerate()
                .filter(|(i, w)| *w == *marker && bytes.get(i + marker.len()) != Some(&b's'))
                .count()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_ignores_page_tree_nodes() {
        let pdf = b"%PDF-1.4 1 0 obj << /Type /Pages /Kids [2 0 R 3 0 R] >> \
                    2 0 obj << /Type /Page >> 3 0 obj <</Type/Page>>";
        assert_eq!(count_pages(pdf), 2);
        assert_eq!(count_pages(b"not a pdf"), 0);
    }

    #[tokio::test]
    async fn reports_size_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        let body = b"%PDF-1.4 << /Type /Page >>";
        std::fs::write(&path, body).unwrap();

        let out = MetadataOnlyExtractor::new().extract_pdf(&path).await.unwrap();
        assert_eq!(out.metadata["file_size"], Value::from(body.len()));
        assert_eq!(out.metadata["pages"], Value::from(1));
        assert!(out.text.is_empty());

        let out = MetadataOnlyExtractor::new().extract_image(&path).await.unwrap();
        assert!(!out.metadata.contains_key("pages"));
    }
}
