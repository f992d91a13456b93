//! System-wide constants and configuration defaults.

/// Reserved participant id for the Controller.
pub const CONTROLLER_ID: &str = "controller";

/// Reserved receiver id that fans a message out to every direct subscription.
pub const BROADCAST_ID: &str = "broadcast";

// Message bus

/// Per-lane submission queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Worker lanes draining handler submissions.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Grace period granted to in-flight handlers on shutdown before they are aborted.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Default external log topic for messages without a dedicated stream.
pub const DEFAULT_MESSAGE_TOPIC: &str = "mcp-messages";

/// External log topic for system notifications.
pub const DEFAULT_SYSTEM_TOPIC: &str = "mcp-system";

/// External log topic for task lifecycle messages.
pub const DEFAULT_TASK_TOPIC: &str = "mcp-tasks";

/// External log topic for agent lifecycle messages.
pub const DEFAULT_AGENT_TOPIC: &str = "mcp-agents";

// Controller

/// Terminal tasks older than this many days are pruned by the maintenance loop.
pub const DEFAULT_TASK_RETENTION_DAYS: i64 = 7;

/// Upper bound on non-terminal tasks held in the registry at once.
pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 1000;

/// Interval between maintenance passes.
pub const MAINTENANCE_INTERVAL_SECS: u64 = 300;

/// Default priority for tasks created without an explicit one.
pub const DEFAULT_TASK_PRIORITY: i32 = 1;

// Retrieval

/// Default number of results returned by a retrieval query.
pub const DEFAULT_TOP_K: usize = 5;

/// Default convex-combination weight for hybrid search (0 = pure vector, 1 = pure keyword).
pub const DEFAULT_HYBRID_ALPHA: f32 = 0.5;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

// LLM service

/// Default request timeout for the LLM client.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

/// Characters of retrieved context included in a RAG prompt before truncation.
pub const RAG_CONTEXT_BUDGET: usize = 4000;
