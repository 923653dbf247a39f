//! Analyzer port - the AI backend used by analysis tasks.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Document, ParseEnumError, ProcessorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    DocumentClassification,
    TaxOptimization,
    DeductionFinder,
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::DocumentClassification => "document_classification",
            AnalysisKind::TaxOptimization => "tax_optimization",
            AnalysisKind::DeductionFinder => "deduction_finder",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_classification" => Ok(AnalysisKind::DocumentClassification),
            "tax_optimization" => Ok(AnalysisKind::TaxOptimization),
            "deduction_finder" => Ok(AnalysisKind::DeductionFinder),
            other => Err(ParseEnumError::new("analysis type", other)),
        }
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        kind: AnalysisKind,
        input: &serde_json::Value,
    ) -> Result<Document, ProcessorError>;
}
