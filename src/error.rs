use thiserror::Error;

/// Convenience type alias for Results with FabricError
pub type Result<T> = std::result::Result<T, FabricError>;

/// Main error type for Fabric Core
///
/// This enum represents all possible errors that can occur within
/// the coordination fabric, providing detailed error context for
/// debugging and error handling.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("LLM service error: {0}")]
    LlmService(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Agent error: {message}")]
    Agent { message: String },

    #[error("Task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue is full")]
    QueueFull,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
