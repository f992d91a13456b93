use anyhow::Result;
use fabric_core::{
    agents::{AgentRuntime, RetrievalQaAgent, TextProcessingAgent},
    api::ApiServer,
    bus::MessageBus,
    config::{Config, RetrieverConfig},
    controller::Controller,
    llm::{HttpLanguageModel, LanguageModel, StaticLanguageModel},
    retrieval::{InMemoryVectorStore, Retriever, TextChunker},
    sink::{EventSink, LoggingSink},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Fabric Core coordination fabric");

    let config = Config::load()?;

    let sink: Arc<dyn EventSink> = Arc::new(LoggingSink);
    let bus = MessageBus::new(config.bus.clone(), sink);
    let controller = Arc::new(Controller::new(config.controller.clone(), bus.clone()));

    let llm: Arc<dyn LanguageModel> = match HttpLanguageModel::new(config.llm.clone()) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!("falling back to the static language model: {}", e);
            Arc::new(StaticLanguageModel::new())
        }
    };

    let store = Arc::new(InMemoryVectorStore::new());
    let qa_retriever = Retriever::new(
        store,
        RetrieverConfig {
            top_k: config.agents.qa_rag_k,
            alpha: config.retriever.alpha,
            use_hybrid_search: config.agents.qa_use_hybrid_search,
        },
    );
    let chunker = TextChunker::new(&config.chunker);

    AgentRuntime::start(
        Arc::new(TextProcessingAgent::new("text-processor", llm.clone())),
        controller.clone(),
        bus.clone(),
    )
    .await?;
    AgentRuntime::start(
        Arc::new(RetrievalQaAgent::new(
            "retrieval-qa",
            qa_retriever,
            chunker,
            llm,
        )),
        controller.clone(),
        bus.clone(),
    )
    .await?;

    let api_server = ApiServer::new(config.api.clone(), controller.clone());
    let maintenance = controller.clone();

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
        _ = maintenance.run_maintenance() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    bus.shutdown().await;
    Ok(())
}
