use super::{Agent, Assignment, HandlerRegistry, TaskHandler};
use crate::{
    llm::LanguageModel,
    models::{Capability, ValueMap},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Text-processing agent backed by the LLM service
///
/// Dispatches on `task_type`: `summarize` and `keywords` are registered,
/// and untagged tasks fall back to summarisation of the description.
pub struct TextProcessingAgent {
    id: String,
    handlers: HandlerRegistry,
}

impl TextProcessingAgent {
    pub fn new(id: impl Into<String>, llm: Arc<dyn LanguageModel>) -> Self {
        let summarize = Arc::new(SummarizeHandler { llm: llm.clone() });
        let handlers = HandlerRegistry::new()
            .register("summarize", summarize.clone())
            .register("keywords", Arc::new(KeywordsHandler { llm }))
            .with_fallback(summarize);
        Self {
            id: id.into(),
            handlers,
        }
    }
}

#[async_trait]
impl Agent for TextProcessingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Text Processor"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextProcessing, Capability::Summarization]
    }

    async fn execute_task(&self, assignment: &Assignment) -> Result<ValueMap> {
        self.handlers.dispatch(assignment).await
    }
}

/// The text to operate on: an explicit `text` field, or the description.
fn source_text(assignment: &Assignment) -> &str {
    assignment
        .metadata
        .extra
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or(&assignment.description)
}

struct SummarizeHandler {
    llm: Arc<dyn LanguageModel>,
}

#[async_trait]
impl TaskHandler for SummarizeHandler {
    async fn run(&self, assignment: &Assignment) -> Result<ValueMap> {
        let text = source_text(assignment);
        let prompt = format!("Summarize the following text in a few sentences:\n\n{text}");
        let summary = self.llm.generate_text(&prompt).await?;

        let mut result = ValueMap::new();
        result.insert("summary".to_string(), serde_json::json!(summary));
        Ok(result)
    }
}

struct KeywordsHandler {
    llm: Arc<dyn LanguageModel>,
}

#[async_trait]
impl TaskHandler for KeywordsHandler {
    async fn run(&self, assignment: &Assignment) -> Result<ValueMap> {
        let text = source_text(assignment);
        let prompt = format!(
            "Extract the most important keywords from the following text as a comma-separated list:\n\n{text}"
        );
        let raw = self.llm.generate_text(&prompt).await?;
        let keywords: Vec<String> = raw
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let mut result = ValueMap::new();
        result.insert("keywords".to_string(), serde_json::json!(keywords));
        Ok(result)
    }
}
