//! Asynchronous message bus.
//!
//! Delivers messages to in-process subscribers through a bounded worker
//! pool and simultaneously forwards every message to the external durable
//! log sink. Three additive fan-out rules apply per message: direct
//! subscription on the receiver id, broadcast to every direct subscription,
//! and topic subscription for messages tagged with a topic. The publisher
//! never deduplicates handler entries.

use crate::{
    config::BusConfig,
    constants::SHUTDOWN_GRACE_SECS,
    models::{Address, Message, MessageKind},
    sink::EventSink,
    Result,
};
use async_trait::async_trait;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
    time::{timeout, Duration},
};
use tracing::{debug, error, info, warn};

/// Receiver side of a subscription
///
/// Handlers run on bus worker lanes, so they must be re-entrant and must
/// not assume delivery order across different receivers. Errors are caught
/// and logged at the invocation boundary; they never affect other handlers
/// of the same message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Adapter turning a plain closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(Message) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> Result<()> {
        (self.0)(message)
    }
}

/// One handler invocation queued for a worker lane
struct Delivery {
    handler: Arc<dyn MessageHandler>,
    message: Message,
}

/// Snapshot of the bus returned by [`MessageBus::queue_status`]
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub subscribers: usize,
    pub topics: usize,
    pub running: bool,
}

/// The asynchronous fan-out subsystem
///
/// Deliveries are sharded across the worker lanes by handler identity: a
/// given handler always lands on the same FIFO lane, which preserves the
/// per-(publisher, handler) delivery order while distinct handlers still
/// run in parallel. A full lane rejects the submission and `publish`
/// returns false; nothing already queued is dropped.
#[derive(Clone)]
pub struct MessageBus {
    config: BusConfig,
    subscriptions: Arc<RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>>,
    topics: Arc<RwLock<HashMap<String, Vec<String>>>>,
    lanes: Arc<RwLock<Vec<mpsc::Sender<Delivery>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    sink: Arc<dyn EventSink>,
}

impl MessageBus {
    /// Create the bus and spawn its worker lanes.
    pub fn new(config: BusConfig, sink: Arc<dyn EventSink>) -> Self {
        let mut lanes = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);

        for lane in 0..config.workers {
            let (tx, mut rx) = mpsc::channel::<Delivery>(config.queue_size);
            lanes.push(tx);
            workers.push(tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    let message_id = delivery.message.id.clone();
                    if let Err(e) = delivery.handler.handle(delivery.message).await {
                        warn!(lane, message_id = %message_id, "handler failed: {}", e);
                    }
                }
                debug!(lane, "bus worker lane drained");
            }));
        }

        info!(
            workers = config.workers,
            queue_size = config.queue_size,
            "message bus started"
        );

        Self {
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(RwLock::new(HashMap::new())),
            lanes: Arc::new(RwLock::new(lanes)),
            workers: Arc::new(Mutex::new(workers)),
            running: Arc::new(AtomicBool::new(true)),
            sink,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Publish a message: forward it to the durable log, then submit one
    /// invocation per matching handler to the worker lanes.
    ///
    /// Returns true once all submissions are accepted, not once handlers
    /// complete. Returns false when the bus is shut down or a lane is full.
    pub async fn publish(&self, message: &Message) -> bool {
        if !self.is_running() {
            warn!(message_id = %message.id, "publish rejected: bus is shut down");
            return false;
        }

        self.forward_to_sink(message);

        let handlers = self.route(message).await;
        if handlers.is_empty() {
            warn!(
                message_id = %message.id,
                receiver = %message.receiver,
                "no subscribers matched message"
            );
            return true;
        }

        let lanes = self.lanes.read().await;
        if lanes.is_empty() {
            return false;
        }
        for handler in handlers {
            let lane = &lanes[lane_index(&handler, lanes.len())];
            let delivery = Delivery {
                handler,
                message: message.clone(),
            };
            match lane.try_send(delivery) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        message_id = %message.id,
                        "submission queue full, rejecting publish"
                    );
                    return false;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    /// Register a handler under a direct subscription key.
    ///
    /// Returns false after shutdown.
    pub async fn subscribe(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut subs = self.subscriptions.write().await;
        subs.entry(agent_id.to_string()).or_default().push(handler);
        debug!(agent_id, "direct subscription added");
        true
    }

    /// Remove one handler, or with `None` every handler for the agent along
    /// with its topic memberships.
    pub async fn unsubscribe(
        &self,
        agent_id: &str,
        handler: Option<&Arc<dyn MessageHandler>>,
    ) -> bool {
        let mut subs = self.subscriptions.write().await;
        match handler {
            Some(target) => {
                let Some(handlers) = subs.get_mut(agent_id) else {
                    return false;
                };
                let before = handlers.len();
                handlers.retain(|h| !Arc::ptr_eq(h, target));
                let removed = handlers.len() < before;
                if handlers.is_empty() {
                    subs.remove(agent_id);
                }
                removed
            }
            None => {
                let removed = subs.remove(agent_id).is_some();
                drop(subs);
                let mut topics = self.topics.write().await;
                for members in topics.values_mut() {
                    members.retain(|id| id != agent_id);
                }
                topics.retain(|_, members| !members.is_empty());
                if removed {
                    debug!(agent_id, "all subscriptions removed");
                }
                removed
            }
        }
    }

    /// Subscribe an agent to a named topic. Returns false after shutdown.
    pub async fn subscribe_to_topic(&self, agent_id: &str, topic: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(agent_id.to_string());
        debug!(agent_id, topic, "topic subscription added");
        true
    }

    pub async fn unsubscribe_from_topic(&self, agent_id: &str, topic: &str) -> bool {
        let mut topics = self.topics.write().await;
        let Some(members) = topics.get_mut(topic) else {
            return false;
        };
        let before = members.len();
        members.retain(|id| id != agent_id);
        let removed = members.len() < before;
        if members.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    pub async fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            subscribers: self.subscriptions.read().await.len(),
            topics: self.topics.read().await.len(),
            running: self.is_running(),
        }
    }

    /// Stop accepting submissions, drain in-flight work within the grace
    /// period, then abort whatever is still running.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down message bus");

        // Dropping the lane senders lets each worker drain its queue and exit.
        self.lanes.write().await.clear();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        let drained = timeout(
            Duration::from_secs(SHUTDOWN_GRACE_SECS),
            futures::future::join_all(workers),
        )
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE_SECS,
                "grace period elapsed, aborting remaining bus workers"
            );
            for handle in abort_handles {
                handle.abort();
            }
        }
        info!("message bus shut down");
    }

    /// Resolve the additive fan-out rules into a flat handler list.
    async fn route(&self, message: &Message) -> Vec<Arc<dyn MessageHandler>> {
        let subs = self.subscriptions.read().await;
        let mut out = Vec::new();

        match &message.receiver {
            Address::Broadcast => {
                for handlers in subs.values() {
                    out.extend(handlers.iter().cloned());
                }
            }
            receiver => {
                if let Some(handlers) = subs.get(receiver.as_str()) {
                    out.extend(handlers.iter().cloned());
                }
            }
        }

        if let Some(topic) = &message.topic {
            let topics = self.topics.read().await;
            if let Some(members) = topics.get(topic) {
                for agent_id in members {
                    if let Some(handlers) = subs.get(agent_id) {
                        out.extend(handlers.iter().cloned());
                    }
                }
            }
        }

        out
    }

    /// Hand the message to the durable log without waiting for the ack.
    fn forward_to_sink(&self, message: &Message) {
        let payload = match serde_json::to_string(message) {
            Ok(p) => p,
            Err(e) => {
                error!(message_id = %message.id, "failed to serialise message for sink: {}", e);
                return;
            }
        };
        let sink = self.sink.clone();
        let topic = self.sink_topic(message.kind()).to_string();
        let key = message.id.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(&topic, &key, payload).await {
                warn!(key = %key, topic = %topic, "durable log sink failed: {}", e);
            }
        });
    }

    /// Stream topic for the durable log record of a message kind.
    fn sink_topic(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::SystemNotification => &self.config.system_topic,
            MessageKind::TaskAssignment | MessageKind::TaskUpdate | MessageKind::TaskResult => {
                &self.config.task_topic
            }
            MessageKind::AgentRegistration | MessageKind::AgentStatus => &self.config.agent_topic,
            MessageKind::TaskRequest => &self.config.message_topic,
        }
    }
}

/// Stable lane assignment from handler identity.
fn lane_index(handler: &Arc<dyn MessageHandler>, lanes: usize) -> usize {
    let ptr = Arc::as_ptr(handler) as *const () as u64;
    ((ptr.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) % lanes as u64) as usize
}
