//! KeywordAnalyzer - deterministic stand-in for the AI backend.
//!
//! Classification looks for well-known form markers in the input text;
//! optimization and deduction analysis return empty findings.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::{Document, ProcessorError};
use crate::ports::{AnalysisKind, Analyzer};

/// Checked in order; the first hit wins.
const FORM_KEYWORDS: &[(&str, &[&str])] = &[
    ("W-2", &["w-2", "w2", "wage and tax statement"]),
    ("1099", &["1099"]),
    ("1098", &["1098", "mortgage interest statement"]),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn classify(input: &Value) -> Value {
        let text = input_text(input).to_lowercase();
        let hit = FORM_KEYWORDS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| text.contains(n)));
        match hit {
            Some((form, _)) => json!({
                "document_type": form,
                "confidence": 0.9,
                "extracted_fields": {},
            }),
            None => json!({
                "document_type": "unknown",
                "confidence": 0.0,
                "extracted_fields": {},
            }),
        }
    }
}

#[async_trait]
impl Analyzer for KeywordAnalyzer {
    async fn analyze(&self, kind: AnalysisKind, input: &Value) -> Result<Document, ProcessorError> {
        let out = match kind {
            AnalysisKind::DocumentClassification => Self::classify(input),
            AnalysisKind::TaxOptimization => json!({
                "recommendations": [],
                "potential_savings": 0,
                "strategies": [],
            }),
            AnalysisKind::DeductionFinder => json!({
                "deductions": [],
                "total_amount": 0,
                "categories": {},
            }),
        };
        match out {
            Value::Object(doc) => Ok(doc),
            _ => Err(ProcessorError::External("analysis produced a non-object".into())),
        }
    }
}

/// Text to scan: the `text` field when present, otherwise the whole input.
fn input_text(input: &Value) -> String {
    match input.get("text") {
        Some(Value::String(s)) => s.clone(),
        _ => input.to_string(),
    }
}
