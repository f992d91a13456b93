use super::{Agent, Assignment, HandlerRegistry, TaskHandler};
use crate::{
    constants::RAG_CONTEXT_BUDGET,
    llm::LanguageModel,
    models::{Capability, ValueMap},
    retrieval::{Retriever, TextChunker},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retrieval-augmented question answering agent
///
/// The task description is the user question. An `index` task type feeds
/// the chunker and vector store; everything else goes through the QA path:
/// retrieve, assemble context, prompt the model.
pub struct RetrievalQaAgent {
    id: String,
    handlers: HandlerRegistry,
}

impl RetrievalQaAgent {
    pub fn new(
        id: impl Into<String>,
        retriever: Retriever,
        chunker: TextChunker,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let retriever = Arc::new(retriever);
        let handlers = HandlerRegistry::new()
            .register(
                "index",
                Arc::new(IndexHandler {
                    retriever: retriever.clone(),
                    chunker,
                }),
            )
            .with_fallback(Arc::new(AnswerHandler { retriever, llm }));
        Self {
            id: id.into(),
            handlers,
        }
    }
}

#[async_trait]
impl Agent for RetrievalQaAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Retrieval QA"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Retrieval,
            Capability::QuestionAnswering,
            Capability::Reasoning,
        ]
    }

    async fn execute_task(&self, assignment: &Assignment) -> Result<ValueMap> {
        self.handlers.dispatch(assignment).await
    }
}

fn namespace(assignment: &Assignment) -> Option<&str> {
    assignment
        .metadata
        .extra
        .get("namespace")
        .and_then(|v| v.as_str())
}

struct IndexHandler {
    retriever: Arc<Retriever>,
    chunker: TextChunker,
}

#[async_trait]
impl TaskHandler for IndexHandler {
    fn required_fields(&self) -> &'static [&'static str] {
        &["text"]
    }

    async fn run(&self, assignment: &Assignment) -> Result<ValueMap> {
        let text = assignment.metadata.extra["text"].as_str().unwrap_or_default();
        let chunks = self.chunker.split(text);

        let mut chunk_metadata = ValueMap::new();
        chunk_metadata.insert("task_id".to_string(), serde_json::json!(assignment.task_id));
        if let Some(source) = assignment.metadata.extra.get("source") {
            chunk_metadata.insert("source".to_string(), source.clone());
        }
        let metadatas = vec![chunk_metadata; chunks.len()];

        let ids = self
            .retriever
            .store()
            .add_documents(chunks, metadatas, namespace(assignment))
            .await?;
        debug!(task_id = %assignment.task_id, indexed = ids.len(), "document indexed");

        let mut result = ValueMap::new();
        result.insert("indexed_chunks".to_string(), serde_json::json!(ids.len()));
        result.insert("document_ids".to_string(), serde_json::json!(ids));
        Ok(result)
    }
}

struct AnswerHandler {
    retriever: Arc<Retriever>,
    llm: Arc<dyn LanguageModel>,
}

#[async_trait]
impl TaskHandler for AnswerHandler {
    async fn run(&self, assignment: &Assignment) -> Result<ValueMap> {
        let question = &assignment.description;
        let rag_k = assignment
            .metadata
            .extra
            .get("rag_k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize);

        // A failed store lookup degrades to an unassisted answer rather
        // than failing the task.
        let hits = match self
            .retriever
            .retrieve(question, rag_k, namespace(assignment))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(task_id = %assignment.task_id, "retrieval failed: {}", e);
                Vec::new()
            }
        };

        let mut context = String::new();
        for hit in &hits {
            if context.len() + hit.content.len() > RAG_CONTEXT_BUDGET {
                break;
            }
            context.push_str(&hit.content);
            context.push_str("\n\n");
        }

        let prompt = if context.is_empty() {
            format!("Answer the following question:\n\n{question}")
        } else {
            format!(
                "Answer the question using only the provided context.\n\nContext:\n{context}\nQuestion: {question}"
            )
        };
        let answer = self.llm.generate_text(&prompt).await?;

        let sources: Vec<String> = hits.iter().map(|h| h.document_id.clone()).collect();
        let mut result = ValueMap::new();
        result.insert("answer".to_string(), serde_json::json!(answer));
        result.insert("sources".to_string(), serde_json::json!(sources));
        result.insert("context_chunks".to_string(), serde_json::json!(hits.len()));
        Ok(result)
    }
}
