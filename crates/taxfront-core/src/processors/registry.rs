//! ProcessorRegistry - TaskType → processor.
//!
//! Built during initialization (mutable), shared read-only by workers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::TaskType;

use super::{
    AiAnalysisProcessor, DocumentProcessingProcessor, FormGenerationProcessor,
    NotificationProcessor, ProcessorContext, TaskProcessor, Typed,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("processor for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<TaskType, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in processors (documents, forms, AI analysis, notifications).
    pub fn standard(ctx: &ProcessorContext) -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn TaskProcessor>; 4] = [
            Arc::new(Typed(DocumentProcessingProcessor::new(ctx))),
            Arc::new(Typed(FormGenerationProcessor::new(ctx))),
            Arc::new(Typed(AiAnalysisProcessor::new(ctx))),
            Arc::new(Typed(NotificationProcessor::new(ctx))),
        ];
        for processor in builtins {
            // distinct types; cannot collide in an empty registry
            let task_type = processor.task_type();
            registry.processors.insert(task_type, processor);
        }
        registry
    }

    /// Register a processor under its own `task_type()`. Duplicates are an error.
    pub fn register(&mut self, processor: Arc<dyn TaskProcessor>) -> Result<(), RegistryError> {
        let task_type = processor.task_type();
        if self.processors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.processors.insert(task_type, processor);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(&task_type).cloned()
    }

    /// Registered types in declaration order of `TaskType`.
    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.processors.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
