//! AI analysis: route the input to the analyzer and keep the result.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{Document, ProcessorError, Task, TaskType, timestamp};
use crate::ports::{AnalysisKind, Analyzer, Clock, DocumentStore};

use super::{PayloadProcessor, ProcessorContext, object};

pub const AI_ANALYSIS_COLLECTION: &str = "aiAnalysis";

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisPayload {
    pub analysis_type: String,
    pub input_data: Value,
}

pub struct AiAnalysisProcessor {
    store: Arc<dyn DocumentStore>,
    analyzer: Arc<dyn Analyzer>,
    clock: Arc<dyn Clock>,
}

impl AiAnalysisProcessor {
    pub fn new(ctx: &ProcessorContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            analyzer: Arc::clone(&ctx.analyzer),
            clock: Arc::clone(&ctx.clock),
        }
    }
}

#[async_trait]
impl PayloadProcessor for AiAnalysisProcessor {
    type Payload = AnalysisPayload;
    const TASK_TYPE: TaskType = TaskType::AiAnalysis;
    const REQUIRED_FIELDS: &'static [&'static str] = &["analysis_type", "input_data"];

    async fn handle(&self, task: &Task, payload: AnalysisPayload) -> Result<Document, ProcessorError> {
        let kind: AnalysisKind = payload
            .analysis_type
            .parse()
            .map_err(|_| ProcessorError::unsupported("analysis type", &payload.analysis_type))?;

        let result = self.analyzer.analyze(kind, &payload.input_data).await?;

        let analysis_id = task.id.as_str();
        let record = object(json!({
            "userId": task.user_id,
            "analysisType": kind.as_str(),
            "result": result,
            "createdAt": timestamp::to_value(&self.clock.now()),
        }));
        self.store.set(AI_ANALYSIS_COLLECTION, analysis_id, record).await?;

        info!(task_id = %task.id, analysis_type = %kind, "analysis stored");
        Ok(object(json!({
            "analysis_id": analysis_id,
            "analysis_type": kind.as_str(),
            "result": result,
            "success": true,
        })))
    }
}
