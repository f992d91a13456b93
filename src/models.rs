use crate::constants::{BROADCAST_ID, CONTROLLER_ID, DEFAULT_TASK_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Opaque string-keyed payload carried by messages, task metadata and results.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// Closed vocabulary of work an agent can perform
///
/// Capabilities are the routing currency of the fabric: tasks declare the
/// set they require and the Controller matches them against the sets agents
/// registered with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextProcessing,
    Reasoning,
    CodeGeneration,
    Retrieval,
    Summarization,
    Planning,
    QuestionAnswering,
}

impl Capability {
    /// Every capability in the vocabulary, in declaration order.
    pub const ALL: [Capability; 7] = [
        Capability::TextProcessing,
        Capability::Reasoning,
        Capability::CodeGeneration,
        Capability::Retrieval,
        Capability::Summarization,
        Capability::Planning,
        Capability::QuestionAnswering,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TextProcessing => "text_processing",
            Capability::Reasoning => "reasoning",
            Capability::CodeGeneration => "code_generation",
            Capability::Retrieval => "retrieval",
            Capability::Summarization => "summarization",
            Capability::Planning => "planning",
            Capability::QuestionAnswering => "question_answering",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown capability: {s}"))
    }
}

/// Current status of a task in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never leave their status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    ///
    /// Allowed: pending→assigned, assigned→in_progress,
    /// in_progress→{completed, failed}, pending/assigned→failed.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Pending, TaskStatus::Assigned)
                | (TaskStatus::Assigned, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Assigned, TaskStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a registered agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Paused,
    ShuttingDown,
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Active => "active",
            AgentState::Paused => "paused",
            AgentState::ShuttingDown => "shutting_down",
            AgentState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a message, derived from its body
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TaskRequest,
    TaskAssignment,
    TaskUpdate,
    TaskResult,
    AgentRegistration,
    AgentStatus,
    SystemNotification,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::TaskRequest => "task_request",
            MessageKind::TaskAssignment => "task_assignment",
            MessageKind::TaskUpdate => "task_update",
            MessageKind::TaskResult => "task_result",
            MessageKind::AgentRegistration => "agent_registration",
            MessageKind::AgentStatus => "agent_status",
            MessageKind::SystemNotification => "system_notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant address: an agent id or one of the two reserved ids
///
/// Serialised as the literal strings `controller` / `broadcast` / the agent
/// id, matching the wire form the rest of the fabric speaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Address {
    Controller,
    Broadcast,
    Agent(String),
}

impl Address {
    pub fn agent(id: impl Into<String>) -> Self {
        Address::Agent(id.into())
    }

    /// The agent id, if this address names one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Address::Agent(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Address::Controller => CONTROLLER_ID,
            Address::Broadcast => BROADCAST_ID,
            Address::Agent(id) => id,
        }
    }

    /// True when `id` collides with one of the reserved addresses.
    pub fn is_reserved(id: &str) -> bool {
        id == CONTROLLER_ID || id == BROADCAST_ID
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        match s.as_str() {
            CONTROLLER_ID => Address::Controller,
            BROADCAST_ID => Address::Broadcast,
            _ => Address::Agent(s),
        }
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.as_str().to_string()
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::from(s.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System notification verbs understood by agent runtimes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    Shutdown,
    Pause,
    Resume,
}

/// Typed message payload, one variant per message kind
///
/// Replaces the free-form content map of looser systems with the fields
/// each kind actually carries; the `extra` maps keep room for
/// forward-compatible additions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    TaskRequest {
        description: String,
        required_capabilities: Vec<Capability>,
        priority: i32,
        #[serde(default)]
        extra: ValueMap,
    },
    TaskAssignment {
        task_id: String,
        description: String,
        metadata: TaskMetadata,
    },
    TaskUpdate {
        task_id: String,
        status: TaskStatus,
    },
    TaskResult {
        task_id: String,
        status: TaskStatus,
        result: ValueMap,
    },
    AgentRegistration {
        agent_id: String,
        name: String,
        capabilities: Vec<Capability>,
    },
    AgentStatus {
        agent_id: String,
        status: AgentState,
    },
    SystemNotification {
        notice: Notice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::TaskRequest { .. } => MessageKind::TaskRequest,
            MessageBody::TaskAssignment { .. } => MessageKind::TaskAssignment,
            MessageBody::TaskUpdate { .. } => MessageKind::TaskUpdate,
            MessageBody::TaskResult { .. } => MessageKind::TaskResult,
            MessageBody::AgentRegistration { .. } => MessageKind::AgentRegistration,
            MessageBody::AgentStatus { .. } => MessageKind::AgentStatus,
            MessageBody::SystemNotification { .. } => MessageKind::SystemNotification,
        }
    }
}

/// An immutable message routed through the fabric
///
/// Messages are created once, appended to the Controller's history and
/// published to the bus; nothing mutates them afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: Address,
    pub receiver: Address,
    pub body: MessageBody,
    /// Topic channel for topic-subscribed fan-out, orthogonal to the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Address, receiver: Address, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            receiver,
            body,
            topic: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

/// Task metadata: the required capability set plus free-form per-task data
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskMetadata {
    #[serde(default)]
    pub required_capabilities: Vec<Capability>,
    #[serde(flatten)]
    pub extra: ValueMap,
}

impl TaskMetadata {
    pub fn new(required_capabilities: Vec<Capability>) -> Self {
        Self {
            required_capabilities,
            extra: ValueMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The `task_type` tag used for handler dispatch inside agents.
    pub fn task_type(&self) -> Option<&str> {
        self.extra.get("task_type").and_then(|v| v.as_str())
    }
}

/// A unit of work flowing through the Controller
///
/// `assigned_agent_id` is populated exactly when the task has left the
/// pending state through assignment; `result` is populated on the terminal
/// statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub creator_id: String,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub priority: i32,
    pub deadline: Option<DateTime<Utc>>,
    pub metadata: TaskMetadata,
    pub result: Option<ValueMap>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>, creator_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            creator_id: creator_id.into(),
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            priority: DEFAULT_TASK_PRIORITY,
            deadline: None,
            metadata: TaskMetadata::default(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Registry entry describing an agent known to the Controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub status: AgentState,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub metadata: ValueMap,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<Capability>,
        metadata: ValueMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            capabilities,
            status: AgentState::Active,
            registered_at: now,
            last_active: now,
            metadata,
        }
    }

    /// Superset check used by capability routing.
    pub fn has_capabilities(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }
}
