use crate::models::{AgentDescriptor, AgentState, Capability};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Insertion-ordered agent registry with the capability routing index
///
/// The descriptor map, the registration order and the per-capability
/// routing lists live under one lock so every (agent, capability) pair is
/// observed in both views or neither.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, AgentDescriptor>,
    order: Vec<String>,
    routing: HashMap<Capability, Vec<String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails without side effects when the id is taken.
    pub async fn register(&self, descriptor: AgentDescriptor) -> bool {
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&descriptor.id) {
            warn!(agent_id = %descriptor.id, "agent already registered");
            return false;
        }

        let id = descriptor.id.clone();
        for capability in &descriptor.capabilities {
            inner
                .routing
                .entry(*capability)
                .or_default()
                .push(id.clone());
        }
        inner.order.push(id.clone());
        info!(
            agent_id = %id,
            name = %descriptor.name,
            capabilities = descriptor.capabilities.len(),
            "agent registered"
        );
        inner.agents.insert(id, descriptor);
        true
    }

    /// Remove an agent from the registry and every routing list it appears in.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.agents.remove(agent_id).is_none() {
            return false;
        }
        inner.order.retain(|id| id != agent_id);
        for members in inner.routing.values_mut() {
            members.retain(|id| id != agent_id);
        }
        inner.routing.retain(|_, members| !members.is_empty());
        info!(agent_id, "agent unregistered");
        true
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.inner.read().await.agents.get(agent_id).cloned()
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.inner.read().await.agents.contains_key(agent_id)
    }

    /// Agents advertising a capability, in registration order.
    pub async fn by_capability(&self, capability: Capability) -> Vec<AgentDescriptor> {
        let inner = self.inner.read().await;
        inner
            .routing
            .get(&capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.agents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First agent (by registration order) whose capability set covers
    /// every required capability.
    pub async fn find_match(&self, required: &[Capability]) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .find(|id| {
                inner
                    .agents
                    .get(*id)
                    .is_some_and(|agent| agent.has_capabilities(required))
            })
            .cloned()
    }

    /// Stamp `last_active` on a registered agent.
    pub async fn touch(&self, agent_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.agents.get_mut(agent_id) {
            agent.last_active = Utc::now();
        }
    }

    pub async fn set_status(&self, agent_id: &str, status: AgentState) -> bool {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(agent_id) {
            Some(agent) => {
                debug!(agent_id, status = %status, "agent status updated");
                agent.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn all(&self) -> Vec<AgentDescriptor> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    pub async fn counts_by_state(&self) -> HashMap<AgentState, usize> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for agent in inner.agents.values() {
            *counts.entry(agent.status).or_insert(0) += 1;
        }
        counts
    }

    /// Copy of the capability routing index, for status surfaces and
    /// consistency checks.
    pub async fn routing_view(&self) -> HashMap<Capability, Vec<String>> {
        self.inner.read().await.routing.clone()
    }
}
