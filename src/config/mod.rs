use crate::{constants, FabricError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

/// Full configuration for the fabric, assembled from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bus: BusConfig,
    pub controller: ControllerConfig,
    pub retriever: RetrieverConfig,
    pub chunker: ChunkerConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each worker lane's submission queue.
    pub queue_size: usize,
    /// Number of worker lanes dispatching handler invocations.
    pub workers: usize,
    pub message_topic: String,
    pub system_topic: String,
    pub task_topic: String,
    pub agent_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub task_retention_days: i64,
    pub max_active_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub alpha: f32,
    pub use_hybrid_search: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Per-agent-type defaults for the bundled agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub qa_rag_k: usize,
    pub qa_use_hybrid_search: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Absent key keeps the fabric on the offline static model.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from a .env file when present
        match dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let bus = BusConfig {
            queue_size: env_parse("FABRIC_BUS_QUEUE_SIZE", constants::DEFAULT_QUEUE_SIZE),
            workers: env_parse("FABRIC_BUS_WORKERS", constants::DEFAULT_WORKER_COUNT),
            message_topic: env_string("FABRIC_BUS_MESSAGE_TOPIC", constants::DEFAULT_MESSAGE_TOPIC),
            system_topic: env_string("FABRIC_BUS_SYSTEM_TOPIC", constants::DEFAULT_SYSTEM_TOPIC),
            task_topic: env_string("FABRIC_BUS_TASK_TOPIC", constants::DEFAULT_TASK_TOPIC),
            agent_topic: env_string("FABRIC_BUS_AGENT_TOPIC", constants::DEFAULT_AGENT_TOPIC),
        };

        let controller = ControllerConfig {
            task_retention_days: env_parse(
                "FABRIC_TASK_RETENTION_DAYS",
                constants::DEFAULT_TASK_RETENTION_DAYS,
            ),
            max_active_tasks: env_parse(
                "FABRIC_MAX_ACTIVE_TASKS",
                constants::DEFAULT_MAX_ACTIVE_TASKS,
            ),
        };

        let retriever = RetrieverConfig {
            top_k: env_parse("FABRIC_RETRIEVER_TOP_K", constants::DEFAULT_TOP_K),
            alpha: env_parse("FABRIC_RETRIEVER_ALPHA", constants::DEFAULT_HYBRID_ALPHA),
            use_hybrid_search: env_parse("FABRIC_RETRIEVER_HYBRID", true),
        };

        let chunker = ChunkerConfig {
            chunk_size: env_parse("FABRIC_CHUNK_SIZE", constants::DEFAULT_CHUNK_SIZE),
            chunk_overlap: env_parse("FABRIC_CHUNK_OVERLAP", constants::DEFAULT_CHUNK_OVERLAP),
        };

        let agents = AgentsConfig {
            qa_rag_k: env_parse("FABRIC_QA_RAG_K", constants::DEFAULT_TOP_K),
            qa_use_hybrid_search: env_parse("FABRIC_QA_HYBRID", true),
        };

        let llm = LlmConfig {
            api_key: env::var("FABRIC_LLM_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: env_string("FABRIC_LLM_BASE_URL", "https://api.anthropic.com"),
            model: env_string("FABRIC_LLM_MODEL", "claude-3-5-sonnet-20241022"),
            timeout_secs: env_parse("FABRIC_LLM_TIMEOUT_SECS", constants::DEFAULT_LLM_TIMEOUT_SECS),
        };

        let api = ApiConfig {
            host: env_string("FABRIC_API_HOST", "127.0.0.1"),
            port: env_parse("FABRIC_API_PORT", 8400u16),
            allowed_origins: env::var("FABRIC_API_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        let config = Self {
            bus,
            controller,
            retriever,
            chunker,
            agents,
            llm,
            api,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bus.queue_size == 0 {
            return Err(FabricError::Configuration(
                "FABRIC_BUS_QUEUE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.bus.workers == 0 {
            return Err(FabricError::Configuration(
                "FABRIC_BUS_WORKERS must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retriever.alpha) {
            return Err(FabricError::Configuration(format!(
                "FABRIC_RETRIEVER_ALPHA must lie in [0, 1], got {}",
                self.retriever.alpha
            )));
        }
        if self.chunker.chunk_size == 0 {
            return Err(FabricError::Configuration(
                "FABRIC_CHUNK_SIZE must be at least 1".to_string(),
            ));
        }
        if self.chunker.chunk_overlap >= self.chunker.chunk_size {
            return Err(FabricError::Configuration(format!(
                "FABRIC_CHUNK_OVERLAP ({}) must be smaller than FABRIC_CHUNK_SIZE ({})",
                self.chunker.chunk_overlap, self.chunker.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: constants::DEFAULT_QUEUE_SIZE,
            workers: constants::DEFAULT_WORKER_COUNT,
            message_topic: constants::DEFAULT_MESSAGE_TOPIC.to_string(),
            system_topic: constants::DEFAULT_SYSTEM_TOPIC.to_string(),
            task_topic: constants::DEFAULT_TASK_TOPIC.to_string(),
            agent_topic: constants::DEFAULT_AGENT_TOPIC.to_string(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            task_retention_days: constants::DEFAULT_TASK_RETENTION_DAYS,
            max_active_tasks: constants::DEFAULT_MAX_ACTIVE_TASKS,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: constants::DEFAULT_TOP_K,
            alpha: constants::DEFAULT_HYBRID_ALPHA,
            use_hybrid_search: true,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            chunk_overlap: constants::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            qa_rag_k: constants::DEFAULT_TOP_K,
            qa_use_hybrid_search: true,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
