use crate::models::{Task, TaskStatus, ValueMap};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Task registry enforcing the lifecycle transition rules
///
/// Every mutation of a task happens under the store's write lock, so
/// status and `assigned_agent_id` are always observed coherently.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: Task) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.clone(), task);
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Move a pending task to assigned, recording the executor.
    ///
    /// Returns the updated task, or `None` when the task is unknown or no
    /// longer pending.
    pub async fn assign(&self, task_id: &str, agent_id: &str) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            debug!(task_id, status = %task.status, "assignment skipped: task is not pending");
            return None;
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent_id.to_string());
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// Apply a status transition, storing the result map when provided.
    ///
    /// Illegal transitions (anything outside the lifecycle, including
    /// leaving a terminal status) are rejected and leave the task
    /// untouched.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ValueMap>,
    ) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id)?;
        if !task.status.can_transition(status) {
            warn!(
                task_id,
                from = %task.status,
                to = %status,
                "rejected illegal task transition"
            );
            return None;
        }
        task.status = status;
        if let Some(result) = result {
            task.result = Some(result);
        }
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// Number of tasks not yet in a terminal status.
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.values().filter(|t| !t.status.is_terminal()).count()
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn counts_by_status(&self) -> HashMap<TaskStatus, usize> {
        let tasks = self.tasks.read().await;
        let mut counts = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Drop terminal tasks last updated before the cutoff. Active tasks are
    /// never pruned regardless of age.
    pub async fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.status.is_terminal() || task.updated_at >= cutoff);
        before - tasks.len()
    }
}
