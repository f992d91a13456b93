//! Shared agent runtime.
//!
//! Wraps an [`Agent`] implementation with the normative message loop: on
//! start it registers with the Controller and subscribes itself on the
//! bus; task assignments drive in_progress → completed/failed reporting;
//! system notifications steer the local lifecycle state.

use super::{Agent, Assignment};
use crate::{
    bus::{MessageBus, MessageHandler},
    controller::ControllerHandle,
    models::{Address, AgentState, Capability, Message, MessageBody, Notice, ValueMap},
    FabricError, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Message-driven shell around one agent
pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    controller: Arc<dyn ControllerHandle>,
    bus: MessageBus,
    state: RwLock<AgentState>,
    current_task: Mutex<Option<String>>,
}

impl AgentRuntime {
    /// Register the agent with the Controller, subscribe the runtime on
    /// the bus under the agent id, and announce the registration.
    ///
    /// Fails when the id is already registered; nothing is subscribed in
    /// that case.
    pub async fn start(
        agent: Arc<dyn Agent>,
        controller: Arc<dyn ControllerHandle>,
        bus: MessageBus,
    ) -> Result<Arc<Self>> {
        let id = agent.id().to_string();
        let registered = controller
            .register_agent(
                &id,
                agent.name(),
                agent.capabilities(),
                agent.metadata(),
            )
            .await;
        if !registered {
            return Err(FabricError::Agent {
                message: format!("agent '{id}' could not be registered"),
            });
        }

        let runtime = Arc::new(Self {
            agent: agent.clone(),
            controller: controller.clone(),
            bus: bus.clone(),
            state: RwLock::new(AgentState::Active),
            current_task: Mutex::new(None),
        });

        if !bus
            .subscribe(&id, runtime.clone() as Arc<dyn MessageHandler>)
            .await
        {
            controller.unregister_agent(&id).await;
            return Err(FabricError::Agent {
                message: format!("bus rejected subscription for agent '{id}'"),
            });
        }

        controller
            .send_message(
                Address::agent(id.clone()),
                Address::Controller,
                MessageBody::AgentRegistration {
                    agent_id: id.clone(),
                    name: agent.name().to_string(),
                    capabilities: agent.capabilities(),
                },
            )
            .await;

        info!(agent_id = %id, "agent runtime started");
        Ok(runtime)
    }

    pub fn id(&self) -> &str {
        self.agent.id()
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn current_task(&self) -> Option<String> {
        self.current_task.lock().await.clone()
    }

    /// Send a message on the agent's behalf.
    pub async fn send_message(&self, receiver: Address, body: MessageBody) -> String {
        self.controller
            .send_message(Address::agent(self.id()), receiver, body)
            .await
    }

    /// Create a task on the agent's behalf.
    pub async fn create_task(
        &self,
        description: &str,
        required_capabilities: Vec<Capability>,
        priority: i32,
        deadline: Option<DateTime<Utc>>,
        extra: ValueMap,
    ) -> Result<String> {
        self.controller
            .create_task(
                description,
                self.id(),
                required_capabilities,
                priority,
                deadline,
                extra,
            )
            .await
    }

    async fn handle_assignment(&self, assignment: Assignment) {
        let task_id = assignment.task_id.clone();
        debug!(agent_id = %self.id(), task_id = %task_id, "assignment received");
        {
            let mut current = self.current_task.lock().await;
            *current = Some(task_id.clone());
        }

        self.controller
            .update_task_status(&task_id, crate::models::TaskStatus::InProgress, None)
            .await;

        match self.agent.execute_task(&assignment).await {
            Ok(result) => {
                self.controller
                    .update_task_status(
                        &task_id,
                        crate::models::TaskStatus::Completed,
                        Some(result),
                    )
                    .await;
            }
            Err(e) => {
                warn!(agent_id = %self.id(), task_id = %task_id, "task execution failed: {}", e);
                let mut result = ValueMap::new();
                result.insert("error".to_string(), serde_json::json!(e.to_string()));
                self.controller
                    .update_task_status(&task_id, crate::models::TaskStatus::Failed, Some(result))
                    .await;
            }
        }

        let mut current = self.current_task.lock().await;
        *current = None;
    }

    async fn handle_notice(&self, notice: Notice) {
        match notice {
            Notice::Shutdown => {
                self.set_state(AgentState::Terminated).await;
                self.controller.unregister_agent(self.id()).await;
                self.bus.unsubscribe(self.id(), None).await;
                info!(agent_id = %self.id(), "agent shut down");
            }
            Notice::Pause => {
                self.set_state(AgentState::Paused).await;
            }
            Notice::Resume => {
                self.set_state(AgentState::Active).await;
            }
        }
    }

    async fn set_state(&self, state: AgentState) {
        {
            let mut current = self.state.write().await;
            *current = state;
        }
        // Report the transition so the Controller's descriptor follows.
        self.controller
            .send_message(
                Address::agent(self.id()),
                Address::Controller,
                MessageBody::AgentStatus {
                    agent_id: self.id().to_string(),
                    status: state,
                },
            )
            .await;
    }
}

#[async_trait]
impl MessageHandler for AgentRuntime {
    async fn handle(&self, message: Message) -> Result<()> {
        let addressed_to_me = match &message.receiver {
            Address::Broadcast => true,
            Address::Agent(id) => id == self.id(),
            Address::Controller => false,
        };
        if !addressed_to_me {
            warn!(
                agent_id = %self.id(),
                receiver = %message.receiver,
                message_id = %message.id,
                "dropping message addressed to another participant"
            );
            return Ok(());
        }
        if self.state().await == AgentState::Terminated {
            debug!(agent_id = %self.id(), "terminated agent ignoring message");
            return Ok(());
        }

        match message.body {
            MessageBody::TaskAssignment {
                task_id,
                description,
                metadata,
            } => {
                self.handle_assignment(Assignment {
                    task_id,
                    description,
                    metadata,
                })
                .await;
            }
            MessageBody::SystemNotification { notice, .. } => {
                self.handle_notice(notice).await;
            }
            other => {
                debug!(
                    agent_id = %self.id(),
                    kind = %other.kind(),
                    "no default handling for message kind"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::MessageBus,
        config::{BusConfig, ControllerConfig},
        controller::Controller,
        models::{TaskStatus, ValueMap},
        sink::MemorySink,
    };

    struct ScriptedAgent {
        id: String,
        fail: bool,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::TextProcessing, Capability::Reasoning]
        }

        async fn execute_task(&self, assignment: &Assignment) -> Result<ValueMap> {
            if self.fail {
                return Err(FabricError::TaskExecution {
                    task_id: assignment.task_id.clone(),
                    message: "scripted failure".to_string(),
                });
            }
            let mut result = ValueMap::new();
            result.insert("answer".to_string(), serde_json::json!("hi"));
            Ok(result)
        }
    }

    async fn fabric() -> (Controller, MessageBus) {
        let bus = MessageBus::new(BusConfig::default(), Arc::new(MemorySink::new()));
        let controller = Controller::new(ControllerConfig::default(), bus.clone());
        (controller, bus)
    }

    async fn settle() {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn assignment_runs_to_completion() {
        let (controller, bus) = fabric().await;
        let agent = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: false,
        });
        let runtime = AgentRuntime::start(agent, Arc::new(controller.clone()), bus.clone())
            .await
            .unwrap();

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
        settle().await;

        let task = controller.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["answer"], serde_json::json!("hi"));
        assert!(runtime.current_task().await.is_none());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn execution_failure_marks_the_task_failed() {
        let (controller, bus) = fabric().await;
        let agent = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: true,
        });
        AgentRuntime::start(agent, Arc::new(controller.clone()), bus.clone())
            .await
            .unwrap();

        let task_id = controller
            .create_task("hello", "u1", vec![], 1, None, ValueMap::new())
            .await
            .unwrap();
        settle().await;

        let task = controller.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.result.unwrap()["error"].clone();
        assert!(error.as_str().unwrap().contains("scripted failure"));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn notifications_steer_lifecycle_state() {
        let (controller, bus) = fabric().await;
        let agent = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: false,
        });
        let runtime = AgentRuntime::start(agent, Arc::new(controller.clone()), bus.clone())
            .await
            .unwrap();
        assert_eq!(runtime.state().await, AgentState::Active);

        controller
            .send_message(
                Address::Controller,
                Address::Broadcast,
                MessageBody::SystemNotification {
                    notice: Notice::Pause,
                    detail: None,
                },
            )
            .await;
        settle().await;
        assert_eq!(runtime.state().await, AgentState::Paused);
        assert_eq!(
            controller.get_agent("a1").await.unwrap().status,
            AgentState::Paused
        );

        controller
            .send_message(
                Address::Controller,
                Address::Broadcast,
                MessageBody::SystemNotification {
                    notice: Notice::Resume,
                    detail: None,
                },
            )
            .await;
        settle().await;
        assert_eq!(runtime.state().await, AgentState::Active);

        controller
            .send_message(
                Address::Controller,
                Address::agent("a1"),
                MessageBody::SystemNotification {
                    notice: Notice::Shutdown,
                    detail: None,
                },
            )
            .await;
        settle().await;
        assert_eq!(runtime.state().await, AgentState::Terminated);
        assert!(controller.get_agent("a1").await.is_none());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn mismatched_receiver_is_dropped() {
        let (controller, bus) = fabric().await;
        let agent = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: false,
        });
        let runtime = AgentRuntime::start(agent, Arc::new(controller.clone()), bus.clone())
            .await
            .unwrap();

        // A message for someone else reaching the handler (e.g. via a
        // topic) is dropped without touching any state.
        let stray = Message::new(
            Address::Controller,
            Address::agent("someone-else"),
            MessageBody::SystemNotification {
                notice: Notice::Shutdown,
                detail: None,
            },
        );
        runtime.handle(stray).await.unwrap();

        assert_eq!(runtime.state().await, AgentState::Active);
        assert!(controller.get_agent("a1").await.is_some());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_agent_id_fails_start() {
        let (controller, bus) = fabric().await;
        let controller = Arc::new(controller);
        let first = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: false,
        });
        let second = Arc::new(ScriptedAgent {
            id: "a1".to_string(),
            fail: false,
        });

        AgentRuntime::start(first, controller.clone(), bus.clone())
            .await
            .unwrap();
        assert!(
            AgentRuntime::start(second, controller.clone(), bus.clone())
                .await
                .is_err()
        );
        bus.shutdown().await;
    }
}
