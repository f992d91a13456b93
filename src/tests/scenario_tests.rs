//! End-to-end scenarios: full flows across Controller, Bus, agents and
//! the workflow engine.

use crate::{
    agents::{Agent, AgentRuntime, Assignment},
    bus::{MessageBus, MessageHandler},
    config::{BusConfig, ControllerConfig},
    controller::Controller,
    models::{
        Address, Capability, Message, MessageBody, MessageKind, Notice, TaskStatus, ValueMap,
    },
    sink::MemorySink,
    workflow::{node, when, WorkflowGraph, WorkflowState},
    FabricError, Result,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

fn fabric() -> (Controller, MessageBus, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let bus = MessageBus::new(BusConfig::default(), sink.clone());
    let controller = Controller::new(ControllerConfig::default(), bus.clone());
    (controller, bus, sink)
}

async fn settle() {
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
}

struct AnswerAgent;

#[async_trait]
impl Agent for AnswerAgent {
    fn id(&self) -> &str {
        "a1"
    }

    fn name(&self) -> &str {
        "Answerer"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextProcessing, Capability::Reasoning]
    }

    async fn execute_task(&self, _assignment: &Assignment) -> Result<ValueMap> {
        let mut result = ValueMap::new();
        result.insert("answer".to_string(), json!("hi"));
        Ok(result)
    }
}

/// Scenario 1 and 2: a registered agent picks up a matching task, runs it
/// and the creator receives exactly one task_result.
#[tokio::test]
async fn qa_task_flows_from_creation_to_creator_notification() {
    let (controller, bus, _sink) = fabric();
    AgentRuntime::start(Arc::new(AnswerAgent), Arc::new(controller.clone()), bus.clone())
        .await
        .unwrap();

    let mut extra = ValueMap::new();
    extra.insert("task_type".to_string(), json!("qa"));
    let task_id = controller
        .create_task(
            "hello",
            "u1",
            vec![Capability::TextProcessing],
            1,
            None,
            extra,
        )
        .await
        .unwrap();
    settle().await;

    let task = controller.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.assigned_agent_id.as_deref(), Some("a1"));

    let history = controller.message_history().await;
    let assignments: Vec<&Message> = history
        .iter()
        .filter(|m| m.kind() == MessageKind::TaskAssignment)
        .collect();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].receiver, Address::agent("a1"));

    let results: Vec<&Message> = history
        .iter()
        .filter(|m| m.kind() == MessageKind::TaskResult)
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sender, Address::Controller);
    assert_eq!(results[0].receiver, Address::agent("u1"));
    match &results[0].body {
        MessageBody::TaskResult {
            task_id: id,
            status,
            result,
        } => {
            assert_eq!(id, &task_id);
            assert_eq!(*status, TaskStatus::Completed);
            assert_eq!(result["answer"], json!("hi"));
        }
        other => panic!("unexpected body: {other:?}"),
    }
    bus.shutdown().await;
}

/// Scenario 3: no capable agent leaves the task pending with no
/// assignment traffic.
#[tokio::test]
async fn unmatched_capability_leaves_the_task_pending() {
    let (controller, bus, _sink) = fabric();
    controller
        .register_agent(
            "a1",
            "Worker",
            vec![Capability::TextProcessing],
            ValueMap::new(),
        )
        .await;

    let task_id = controller
        .create_task(
            "write a compiler",
            "u1",
            vec![Capability::CodeGeneration],
            1,
            None,
            ValueMap::new(),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        controller.get_task_status(&task_id).await,
        Some(TaskStatus::Pending)
    );
    let history = controller.message_history().await;
    assert!(history
        .iter()
        .all(|m| m.kind() != MessageKind::TaskAssignment));
    bus.shutdown().await;
}

struct CountingHandler {
    invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, message: Message) -> Result<()> {
        self.invocations.lock().await.push(message.id);
        Ok(())
    }
}

/// Scenario 4: broadcast fans out to every direct subscription exactly
/// once.
#[tokio::test]
async fn broadcast_reaches_each_subscriber_once() {
    let (_, bus, _sink) = fabric();
    let h1 = Arc::new(CountingHandler {
        invocations: Mutex::new(Vec::new()),
    });
    let h2 = Arc::new(CountingHandler {
        invocations: Mutex::new(Vec::new()),
    });
    bus.subscribe("a1", h1.clone()).await;
    bus.subscribe("a2", h2.clone()).await;

    let message = Message::new(
        Address::Controller,
        Address::Broadcast,
        MessageBody::SystemNotification {
            notice: Notice::Resume,
            detail: None,
        },
    );
    assert!(bus.publish(&message).await);
    settle().await;

    assert_eq!(h1.invocations.lock().await.len(), 1);
    assert_eq!(h2.invocations.lock().await.len(), 1);
    bus.shutdown().await;
}

/// Scenario 5: the refinement loop revisits analyse and check before the
/// terminal node.
#[tokio::test]
async fn refinement_workflow_takes_the_expected_path() {
    let mut graph = WorkflowGraph::new();
    graph
        .add_node("start", node(|_| async { Ok(json!("started")) }))
        .unwrap();
    graph
        .add_node(
            "analyse",
            node(|ctx| async move {
                let mut state = ctx.state.lock().await;
                let visits = state.get_i64("analyse_visits").unwrap_or(0) + 1;
                state.set("analyse_visits", json!(visits));
                state.set("needs_refinement", json!(visits < 2));
                Ok(json!(visits))
            }),
        )
        .unwrap();
    graph
        .add_node("check", node(|_| async { Ok(json!("checked")) }))
        .unwrap();
    graph
        .add_node("refine", node(|_| async { Ok(json!("refined")) }))
        .unwrap();
    graph
        .add_node("end", node(|_| async { Ok(json!("done")) }))
        .unwrap();
    graph.set_entry("start").unwrap();
    graph.mark_terminal("end").unwrap();
    graph.add_edge("start", "analyse").unwrap();
    graph.add_edge("analyse", "check").unwrap();
    graph
        .add_conditional_edge("check", "refine", when(|s| s.get_bool("needs_refinement")))
        .unwrap();
    graph.add_edge("check", "end").unwrap();
    graph.add_edge("refine", "analyse").unwrap();

    let mut state = WorkflowState::new();
    let report = graph.execute(&mut state).await;

    assert!(report.success);
    assert_eq!(
        report.execution_path,
        vec!["start", "analyse", "check", "refine", "analyse", "check", "end"]
    );
}

struct SlowHandler {
    entered: Notify,
    done: Mutex<bool>,
}

#[async_trait]
impl MessageHandler for SlowHandler {
    async fn handle(&self, _message: Message) -> Result<()> {
        self.entered.notify_one();
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        *self.done.lock().await = true;
        Ok(())
    }
}

/// Scenario 6: shutting down mid-handler lets the handler finish inside
/// the grace window and rejects subsequent publishes.
#[tokio::test]
async fn shutdown_drains_in_flight_handlers_and_rejects_publishes() {
    let (_, bus, _sink) = fabric();
    let slow = Arc::new(SlowHandler {
        entered: Notify::new(),
        done: Mutex::new(false),
    });
    bus.subscribe("a1", slow.clone()).await;

    let message = Message::new(
        Address::Controller,
        Address::agent("a1"),
        MessageBody::SystemNotification {
            notice: Notice::Resume,
            detail: None,
        },
    );
    assert!(bus.publish(&message).await);
    slow.entered.notified().await;

    bus.shutdown().await;

    assert!(!bus.publish(&message).await);
    assert!(!bus.queue_status().await.running);
    // The handler was inside the grace window, so it ran to completion.
    assert!(*slow.done.lock().await);
}

/// The message history length tracks successful publishes, and the
/// external sink sees every one of them.
#[tokio::test]
async fn history_and_sink_observe_every_dispatch() {
    let (controller, bus, sink) = fabric();
    controller
        .register_agent("a1", "Worker", vec![Capability::Planning], ValueMap::new())
        .await;

    for i in 0..3 {
        controller
            .send_message(
                Address::agent("a1"),
                Address::Controller,
                MessageBody::TaskUpdate {
                    task_id: format!("t{i}"),
                    status: TaskStatus::InProgress,
                },
            )
            .await;
    }
    settle().await;

    let history = controller.message_history().await;
    assert_eq!(history.len(), 3);
    // In-order by construction: the history lock spans each publish.
    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(sink.len().await, 3);
    for record in sink.records().await {
        assert!(ids.contains(&record.key.as_str()));
        assert_eq!(record.topic, "mcp-tasks");
    }
    bus.shutdown().await;
}

/// Registering then unregistering leaves the registry and routing as they
/// were before.
#[tokio::test]
async fn register_unregister_round_trip_restores_state() {
    let (controller, bus, _sink) = fabric();
    let before_agents = controller.list_agents().await.len();
    let before_routing = controller.registry().routing_view().await;

    controller
        .register_agent(
            "a1",
            "Worker",
            vec![Capability::TextProcessing, Capability::Planning],
            ValueMap::new(),
        )
        .await;
    controller.unregister_agent("a1").await;

    assert_eq!(controller.list_agents().await.len(), before_agents);
    assert_eq!(controller.registry().routing_view().await, before_routing);
    bus.shutdown().await;
}

/// A handler that errors must not stop the remaining handlers of the
/// same message kind.
#[tokio::test]
async fn failing_local_handler_is_isolated() {
    let (controller, bus, _sink) = fabric();
    let seen = Arc::new(Mutex::new(0u32));

    struct Failing;
    #[async_trait]
    impl MessageHandler for Failing {
        async fn handle(&self, _message: Message) -> Result<()> {
            Err(FabricError::Agent {
                message: "broken handler".to_string(),
            })
        }
    }

    struct Counting(Arc<Mutex<u32>>);
    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _message: Message) -> Result<()> {
            *self.0.lock().await += 1;
            Ok(())
        }
    }

    controller
        .register_message_handler(MessageKind::AgentStatus, Arc::new(Failing))
        .await;
    controller
        .register_message_handler(MessageKind::AgentStatus, Arc::new(Counting(seen.clone())))
        .await;

    controller
        .send_message(
            Address::agent("a1"),
            Address::Controller,
            MessageBody::AgentStatus {
                agent_id: "a1".to_string(),
                status: crate::models::AgentState::Active,
            },
        )
        .await;

    assert_eq!(*seen.lock().await, 1);
    bus.shutdown().await;
}
