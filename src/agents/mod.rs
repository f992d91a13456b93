//! Agent contract and shared task-dispatch plumbing.
//!
//! An agent is a capability-tagged participant with one job:
//! [`Agent::execute_task`]. The surrounding runtime (registration, message
//! loop, status reporting) lives in [`runtime`]; concrete agents compose a
//! [`HandlerRegistry`] that routes on the `task_type` metadata tag and
//! validates declared inputs before any handler body runs.

pub mod qa;
pub mod runtime;
pub mod text_processor;

pub use qa::RetrievalQaAgent;
pub use runtime::AgentRuntime;
pub use text_processor::TextProcessingAgent;

use crate::models::{Capability, TaskMetadata, ValueMap};
use crate::{FabricError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Work assignment delivered to an agent
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: String,
    pub description: String,
    pub metadata: TaskMetadata,
}

/// A capability-bearing worker
///
/// `execute_task` is synchronous relative to the caller: the runtime
/// awaits it and reports completed/failed from its return.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn capabilities(&self) -> Vec<Capability>;

    fn metadata(&self) -> ValueMap {
        ValueMap::new()
    }

    async fn execute_task(&self, assignment: &Assignment) -> Result<ValueMap>;
}

/// One task-type entry of a [`HandlerRegistry`]
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Metadata fields that must be present before the handler runs.
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, assignment: &Assignment) -> Result<ValueMap>;
}

/// Dispatch table keyed by the `task_type` metadata tag
///
/// Input validation happens here, against the fields each handler
/// declares, so handler bodies can assume their inputs exist.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Handler for assignments without a `task_type` tag.
    pub fn with_fallback(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub async fn dispatch(&self, assignment: &Assignment) -> Result<ValueMap> {
        let handler = match assignment.metadata.task_type() {
            Some(task_type) => {
                self.handlers
                    .get(task_type)
                    .ok_or_else(|| FabricError::TaskExecution {
                        task_id: assignment.task_id.clone(),
                        message: format!("no handler for task type '{task_type}'"),
                    })?
            }
            None => self
                .fallback
                .as_ref()
                .ok_or_else(|| FabricError::TaskExecution {
                    task_id: assignment.task_id.clone(),
                    message: "task carries no task_type and no fallback handler is set".to_string(),
                })?,
        };

        for field in handler.required_fields() {
            if !assignment.metadata.extra.contains_key(*field) {
                return Err(FabricError::TaskExecution {
                    task_id: assignment.task_id.clone(),
                    message: format!("missing required metadata field '{field}'"),
                });
            }
        }

        handler.run(assignment).await
    }
}
