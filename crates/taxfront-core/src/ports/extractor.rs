//! DocumentExtractor port - metadata and text extraction for downloaded documents.
//!
//! PDF parsing and OCR engines live behind this trait; the document
//! processor only decides which method to call from the MIME type.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{Document, ProcessorError};

/// Metadata and text pulled out of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub metadata: Document,
    pub text: String,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_pdf(&self, path: &Path) -> Result<Extraction, ProcessorError>;

    async fn extract_image(&self, path: &Path) -> Result<Extraction, ProcessorError>;
}
