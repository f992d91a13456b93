//! Central coordinator.
//!
//! The Controller owns the agent registry, the task registry, the
//! capability routing index and the message history log. Its control
//! surface is synchronous; notifications ride the message bus. Operations
//! never block beyond bus submission, and unknown ids yield false/empty
//! rather than errors.

pub mod agent_registry;
pub mod task_store;

pub use agent_registry::AgentRegistry;
pub use task_store::TaskStore;

use crate::{
    bus::{MessageBus, MessageHandler},
    config::ControllerConfig,
    constants::MAINTENANCE_INTERVAL_SECS,
    models::{
        Address, AgentDescriptor, AgentState, Capability, Message, MessageBody, MessageKind, Task,
        TaskMetadata, TaskStatus, ValueMap,
    },
    FabricError, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// The subset of Controller operations agents depend on
///
/// Agents hold the Controller through this interface rather than the
/// concrete type, which breaks the Agent ↔ Controller reference cycle.
#[async_trait]
pub trait ControllerHandle: Send + Sync {
    async fn register_agent(
        &self,
        id: &str,
        name: &str,
        capabilities: Vec<Capability>,
        metadata: ValueMap,
    ) -> bool;

    async fn unregister_agent(&self, id: &str) -> bool;

    async fn send_message(&self, sender: Address, receiver: Address, body: MessageBody) -> String;

    async fn create_task(
        &self,
        description: &str,
        creator_id: &str,
        required_capabilities: Vec<Capability>,
        priority: i32,
        deadline: Option<DateTime<Utc>>,
        extra: ValueMap,
    ) -> Result<String>;

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ValueMap>,
    ) -> bool;
}

/// Aggregate counts reported by [`Controller::system_status`]
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub agents: HashMap<AgentState, usize>,
    pub tasks: HashMap<TaskStatus, usize>,
    pub total_messages: usize,
    pub uptime_secs: f64,
}

/// The central coordinator of the fabric
#[derive(Clone)]
pub struct Controller {
    config: ControllerConfig,
    agents: AgentRegistry,
    tasks: TaskStore,
    history: Arc<RwLock<Vec<Message>>>,
    handlers: Arc<RwLock<HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>>>,
    bus: MessageBus,
    started_at: Arc<Instant>,
}

impl Controller {
    pub fn new(config: ControllerConfig, bus: MessageBus) -> Self {
        info!(
            max_active_tasks = config.max_active_tasks,
            task_retention_days = config.task_retention_days,
            "controller initialised"
        );
        Self {
            config,
            agents: AgentRegistry::new(),
            tasks: TaskStore::new(),
            history: Arc::new(RwLock::new(Vec::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            bus,
            started_at: Arc::new(Instant::now()),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Register an agent descriptor. Returns false (no state change) when
    /// the id is reserved or already registered.
    pub async fn register_agent(
        &self,
        id: &str,
        name: &str,
        capabilities: Vec<Capability>,
        metadata: ValueMap,
    ) -> bool {
        if Address::is_reserved(id) {
            warn!(agent_id = id, "rejected reserved agent id");
            return false;
        }
        self.agents
            .register(AgentDescriptor::new(id, name, capabilities, metadata))
            .await
    }

    /// Remove an agent from the registry and routing index. Tasks already
    /// assigned to it keep their status and executor.
    pub async fn unregister_agent(&self, id: &str) -> bool {
        self.agents.unregister(id).await
    }

    /// Create a task and immediately attempt assignment.
    ///
    /// The returned id is valid even when no capable agent exists; the
    /// task then simply stays pending.
    pub async fn create_task(
        &self,
        description: &str,
        creator_id: &str,
        required_capabilities: Vec<Capability>,
        priority: i32,
        deadline: Option<DateTime<Utc>>,
        extra: ValueMap,
    ) -> Result<String> {
        if self.tasks.active_count().await >= self.config.max_active_tasks {
            warn!(
                max_active_tasks = self.config.max_active_tasks,
                "task rejected: active task limit reached"
            );
            return Err(FabricError::QueueFull);
        }

        let metadata = TaskMetadata {
            required_capabilities: required_capabilities.clone(),
            extra,
        };
        let mut task = Task::new(description, creator_id)
            .with_metadata(metadata)
            .with_priority(priority);
        if let Some(deadline) = deadline {
            task = task.with_deadline(deadline);
        }
        let task_id = task.id.clone();
        self.tasks.insert(task).await;
        info!(task_id = %task_id, creator_id, "task created");

        if !self.assign_task(&task_id, &required_capabilities).await {
            debug!(task_id = %task_id, "no capable agent available, task stays pending");
        }
        Ok(task_id)
    }

    /// Assign a pending task to the first registered agent whose
    /// capability set covers all required capabilities.
    ///
    /// A non-pending task, an unknown id, or an empty candidate set all
    /// yield false without state changes.
    pub async fn assign_task(&self, task_id: &str, required: &[Capability]) -> bool {
        let Some(task) = self.tasks.get(task_id).await else {
            warn!(task_id, "assignment failed: unknown task");
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }

        let Some(agent_id) = self.agents.find_match(required).await else {
            return false;
        };
        let Some(task) = self.tasks.assign(task_id, &agent_id).await else {
            return false;
        };
        info!(task_id, agent_id = %agent_id, "task assigned");

        self.send_message(
            Address::Controller,
            Address::agent(agent_id),
            MessageBody::TaskAssignment {
                task_id: task.id,
                description: task.description,
                metadata: task.metadata,
            },
        )
        .await;
        true
    }

    /// Create and dispatch a message: append to history, publish to the
    /// bus, then synchronously run the in-process handlers for its kind.
    ///
    /// Returns the message id. Handler failures are logged and isolated.
    pub async fn send_message(
        &self,
        sender: Address,
        receiver: Address,
        body: MessageBody,
    ) -> String {
        self.dispatch(Message::new(sender, receiver, body)).await
    }

    /// Dispatch an already-built message (used for topic-tagged sends).
    pub async fn dispatch(&self, message: Message) -> String {
        let message_id = message.id.clone();

        if let Some(agent_id) = message.sender.agent_id() {
            // Any message from a registered agent counts as activity.
            self.agents.touch(agent_id).await;
        }
        if let MessageBody::AgentStatus { agent_id, status } = &message.body {
            self.agents.set_status(agent_id, *status).await;
        }

        {
            // History order and publish order stay in lockstep.
            let mut history = self.history.write().await;
            if !self.bus.publish(&message).await {
                warn!(message_id = %message_id, "bus did not accept message");
            }
            history.push(message.clone());
        }

        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(&message.kind()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            if let Err(e) = handler.handle(message.clone()).await {
                error!(message_id = %message_id, kind = %message.kind(), "message handler failed: {}", e);
            }
        }

        message_id
    }

    /// Register an in-process handler for a message kind. Handlers run in
    /// registration order within [`Controller::send_message`].
    pub async fn register_message_handler(
        &self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind).or_default().push(handler);
        debug!(kind = %kind, "message handler registered");
    }

    /// Apply a task status transition; on a terminal status the creator is
    /// notified with a `task_result` message.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ValueMap>,
    ) -> bool {
        let Some(task) = self.tasks.update_status(task_id, status, result).await else {
            return false;
        };
        info!(task_id, status = %status, "task status updated");

        if status.is_terminal() {
            self.send_message(
                Address::Controller,
                Address::from(task.creator_id.as_str()),
                MessageBody::TaskResult {
                    task_id: task.id.clone(),
                    status,
                    result: task.result.clone().unwrap_or_default(),
                },
            )
            .await;
        }
        true
    }

    pub async fn get_agents_by_capability(&self, capability: Capability) -> Vec<AgentDescriptor> {
        self.agents.by_capability(capability).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.get(agent_id).await
    }

    pub async fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.agents.all().await
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).await.map(|t| t.status)
    }

    /// Snapshot of the full message history, in publish order.
    pub async fn message_history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus {
            agents: self.agents.counts_by_state().await,
            tasks: self.tasks.counts_by_status().await,
            total_messages: self.history.read().await.len(),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Drop terminal tasks older than the configured retention window.
    pub async fn prune_expired_tasks(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.task_retention_days);
        let pruned = self.tasks.prune_terminal_before(cutoff).await;
        if pruned > 0 {
            info!(pruned, "pruned expired terminal tasks");
        }
        pruned
    }

    /// Periodic maintenance loop; runs until the surrounding task is
    /// cancelled.
    pub async fn run_maintenance(&self) {
        info!("controller maintenance loop started");
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(MAINTENANCE_INTERVAL_SECS)).await;
            self.prune_expired_tasks().await;
        }
    }

    #[doc(hidden)]
    pub fn registry(&self) -> &AgentRegistry {
        &self.agents
    }
}

#[async_trait]
impl ControllerHandle for Controller {
    async fn register_agent(
        &self,
        id: &str,
        name: &str,
        capabilities: Vec<Capability>,
        metadata: ValueMap,
    ) -> bool {
        Controller::register_agent(self, id, name, capabilities, metadata).await
    }

    async fn unregister_agent(&self, id: &str) -> bool {
        Controller::unregister_agent(self, id).await
    }

    async fn send_message(&self, sender: Address, receiver: Address, body: MessageBody) -> String {
        Controller::send_message(self, sender, receiver, body).await
    }

    async fn create_task(
        &self,
        description: &str,
        creator_id: &str,
        required_capabilities: Vec<Capability>,
        priority: i32,
        deadline: Option<DateTime<Utc>>,
        extra: ValueMap,
    ) -> Result<String> {
        Controller::create_task(
            self,
            description,
            creator_id,
            required_capabilities,
            priority,
            deadline,
            extra,
        )
        .await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ValueMap>,
    ) -> bool {
        Controller::update_task_status(self, task_id, status, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::FnHandler,
        config::{BusConfig, ControllerConfig},
        sink::MemorySink,
    };
    use tokio::sync::Mutex;

    fn controller() -> Controller {
        controller_with(ControllerConfig::default())
    }

    fn controller_with(config: ControllerConfig) -> Controller {
        let bus = MessageBus::new(BusConfig::default(), Arc::new(MemorySink::new()));
        Controller::new(config, bus)
    }

    fn assignments_to(history: &[Message], agent_id: &str) -> usize {
        history
            .iter()
            .filter(|m| {
                m.kind() == MessageKind::TaskAssignment
                    && m.receiver == Address::agent(agent_id.to_string())
            })
            .count()
    }

    #[tokio::test]
    async fn created_task_is_assigned_to_capable_agent() {
        let controller = controller();
        assert!(
            controller
                .register_agent(
                    "a1",
                    "Worker One",
                    vec![Capability::TextProcessing, Capability::Reasoning],
                    ValueMap::new(),
                )
                .await
        );

        let task_id = controller
            .create_task(
                "hello",
                "u1",
                vec![Capability::TextProcessing],
                1,
                None,
                ValueMap::new(),
            )
            .await
            .unwrap();

        let task = controller.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_agent_id.as_deref(), Some("a1"));

        // Capability superset holds at the moment of assignment.
        let agent = controller.get_agent("a1").await.unwrap();
        assert!(agent.has_capabilities(&task.metadata.required_capabilities));

        let history = controller.message_history().await;
        assert_eq!(assignments_to(&history, "a1"), 1);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn completion_notifies_the_creator() {
        let controller = controller();
        controller
            .register_agent("a1", "Worker", vec![Capability::TextProcessing], ValueMap::new())
            .await;
        let task_id = controller
            .create_task(
                "hello",
                "u1",
                vec![Capability::TextProcessing],
                1,
                None,
                ValueMap::new(),
            )
            .await
            .unwrap();

        assert!(
            controller
                .update_task_status(&task_id, TaskStatus::InProgress, None)
                .await
        );
        let mut result = ValueMap::new();
        result.insert("answer".to_string(), serde_json::json!("hi"));
        assert!(
            controller
                .update_task_status(&task_id, TaskStatus::Completed, Some(result))
                .await
        );

        let history = controller.message_history().await;
        let results: Vec<_> = history
            .iter()
            .filter(|m| m.kind() == MessageKind::TaskResult)
            .collect();
        assert_eq!(results.len(), 1);
        let message = results[0];
        assert_eq!(message.sender, Address::Controller);
        assert_eq!(message.receiver, Address::agent("u1"));
        match &message.body {
            MessageBody::TaskResult {
                task_id: id,
                status,
                result,
            } => {
                assert_eq!(id, &task_id);
                assert_eq!(*status, TaskStatus::Completed);
                assert_eq!(result["answer"], serde_json::json!("hi"));
            }
            other => panic!("unexpected body: {other:?}"),
        }
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn unmatched_task_stays_pending() {
        let controller = controller();
        controller
            .register_agent("a1", "Worker", vec![Capability::TextProcessing], ValueMap::new())
            .await;

        let task_id = controller
            .create_task(
                "generate a parser",
                "u1",
                vec![Capability::CodeGeneration],
                1,
                None,
                ValueMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            controller.get_task_status(&task_id).await,
            Some(TaskStatus::Pending)
        );
        let history = controller.message_history().await;
        assert_eq!(assignments_to(&history, "a1"), 0);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn empty_requirements_pick_first_registered_agent() {
        let controller = controller();
        controller
            .register_agent("a1", "First", vec![Capability::Planning], ValueMap::new())
            .await;
        controller
            .register_agent("a2", "Second", vec![Capability::Planning], ValueMap::new())
            .await;

        let task_id = controller
            .create_task("anything", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();

        let task = controller.get_task(&task_id).await.unwrap();
        assert_eq!(task.assigned_agent_id.as_deref(), Some("a1"));
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn assign_on_non_pending_task_is_a_noop() {
        let controller = controller();
        controller
            .register_agent("a1", "Worker", vec![Capability::Planning], ValueMap::new())
            .await;
        let task_id = controller
            .create_task("plan", "u1", vec![Capability::Planning], 1, None, ValueMap::new())
            .await
            .unwrap();
        assert_eq!(
            controller.get_task_status(&task_id).await,
            Some(TaskStatus::Assigned)
        );

        assert!(!controller.assign_task(&task_id, &[]).await);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn reserved_and_duplicate_ids_are_rejected() {
        let controller = controller();
        assert!(!controller
            .register_agent("controller", "Sneaky", vec![], ValueMap::new())
            .await);
        assert!(!controller
            .register_agent("broadcast", "Sneaky", vec![], ValueMap::new())
            .await);
        assert!(controller
            .register_agent("a1", "Worker", vec![], ValueMap::new())
            .await);
        assert!(!controller
            .register_agent("a1", "Again", vec![], ValueMap::new())
            .await);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn handlers_run_in_order_and_failures_are_isolated() {
        let controller = controller();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        controller
            .register_message_handler(
                MessageKind::SystemNotification,
                FnHandler::new(move |_| {
                    o.try_lock().unwrap().push("first");
                    Err(FabricError::Agent {
                        message: "first handler fails".to_string(),
                    })
                }),
            )
            .await;
        let o = order.clone();
        controller
            .register_message_handler(
                MessageKind::SystemNotification,
                FnHandler::new(move |_| {
                    o.try_lock().unwrap().push("second");
                    Ok(())
                }),
            )
            .await;

        controller
            .send_message(
                Address::Controller,
                Address::Broadcast,
                MessageBody::SystemNotification {
                    notice: crate::models::Notice::Resume,
                    detail: None,
                },
            )
            .await;

        assert_eq!(*order.lock().await, vec!["first", "second"]);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn active_task_limit_rejects_new_tasks() {
        let controller = controller_with(ControllerConfig {
            max_active_tasks: 1,
            ..ControllerConfig::default()
        });

        controller
            .create_task("one", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        let rejected = controller
            .create_task("two", "u1", vec![], 1, None, ValueMap::new())
            .await;
        assert!(matches!(rejected, Err(FabricError::QueueFull)));
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn inbound_agent_message_touches_last_active() {
        let controller = controller();
        controller
            .register_agent("a1", "Worker", vec![], ValueMap::new())
            .await;
        let before = controller.get_agent("a1").await.unwrap().last_active;

        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        controller
            .send_message(
                Address::agent("a1"),
                Address::Controller,
                MessageBody::AgentStatus {
                    agent_id: "a1".to_string(),
                    status: AgentState::Paused,
                },
            )
            .await;

        let after = controller.get_agent("a1").await.unwrap();
        assert!(after.last_active > before);
        assert_eq!(after.status, AgentState::Paused);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn retention_pruning_drops_only_old_terminal_tasks() {
        let controller = controller_with(ControllerConfig {
            task_retention_days: 0,
            ..ControllerConfig::default()
        });
        let done = controller
            .create_task("done", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        let open = controller
            .create_task("open", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        controller
            .update_task_status(&done, TaskStatus::Failed, None)
            .await;

        // Zero retention makes every terminal task immediately expired.
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        assert_eq!(controller.prune_expired_tasks().await, 1);
        assert!(controller.get_task(&done).await.is_none());
        assert!(controller.get_task(&open).await.is_some());
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_descriptions_yield_independent_tasks() {
        let controller = controller();
        let t1 = controller
            .create_task("same", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        let t2 = controller
            .create_task("same", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        assert_ne!(t1, t2);

        controller
            .update_task_status(&t1, TaskStatus::Failed, None)
            .await;
        assert_eq!(
            controller.get_task_status(&t2).await,
            Some(TaskStatus::Pending)
        );
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn system_status_counts_everything() {
        let controller = controller();
        controller
            .register_agent("a1", "Worker", vec![Capability::Planning], ValueMap::new())
            .await;
        controller
            .create_task("plan", "u1", vec![Capability::Planning], 1, None, ValueMap::new())
            .await
            .unwrap();

        let status = controller.system_status().await;
        assert_eq!(status.agents.get(&AgentState::Active), Some(&1));
        assert_eq!(status.tasks.get(&TaskStatus::Assigned), Some(&1));
        assert_eq!(status.total_messages, 1);
        controller.bus().shutdown().await;
    }
}
