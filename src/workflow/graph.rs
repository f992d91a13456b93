use super::WorkflowState;
use crate::{models::ValueMap, FabricError, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared handles a node function receives
///
/// `state` is the caller's workflow state, mutated in place. `scratch` is
/// a per-execution key/value store cleared at the start of every
/// [`WorkflowGraph::execute`] call.
#[derive(Clone)]
pub struct WorkflowContext {
    pub state: Arc<Mutex<WorkflowState>>,
    pub scratch: Arc<Mutex<ValueMap>>,
}

/// A node function: reads and writes state, returns its output value.
pub type NodeFn = Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// An edge predicate evaluated against the current state.
pub type EdgePredicate = Arc<dyn Fn(&WorkflowState) -> Result<bool> + Send + Sync>;

/// Wrap an async closure as a [`NodeFn`].
pub fn node<F, Fut>(f: F) -> NodeFn
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an infallible closure as an [`EdgePredicate`].
pub fn when<F>(f: F) -> EdgePredicate
where
    F: Fn(&WorkflowState) -> bool + Send + Sync + 'static,
{
    Arc::new(move |state| Ok(f(state)))
}

/// The always-true predicate used by unconditional edges.
pub fn always() -> EdgePredicate {
    Arc::new(|_| Ok(true))
}

struct Node {
    name: String,
    func: NodeFn,
    terminal: bool,
}

struct Edge {
    target: usize,
    predicate: EdgePredicate,
}

/// Outcome of one graph execution
///
/// `execution_path` lists nodes in visit order, including a node that
/// failed mid-run; `node_outputs` holds the latest output per node name.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub success: bool,
    pub execution_path: Vec<String>,
    pub node_outputs: HashMap<String, Value>,
    pub error_message: Option<String>,
}

/// Predicate-edged directed graph of named nodes
///
/// Nodes live in a flat array; the name→index map is only consulted while
/// the graph is being built, so successor selection during execution is a
/// plain indexed scan in edge insertion order. Exactly one entry node and
/// at least one terminal node are required before execution.
#[derive(Default)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<Edge>>,
    entry: Option<usize>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, func: NodeFn) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(FabricError::Validation(format!(
                "node '{name}' is already defined"
            )));
        }
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(Node {
            name,
            func,
            terminal: false,
        });
        self.edges.push(Vec::new());
        Ok(())
    }

    /// Declare the single entry node.
    pub fn set_entry(&mut self, name: &str) -> Result<()> {
        let index = self.resolve(name)?;
        if let Some(existing) = self.entry {
            if existing != index {
                return Err(FabricError::Validation(format!(
                    "entry node is already set to '{}'",
                    self.nodes[existing].name
                )));
            }
        }
        self.entry = Some(index);
        Ok(())
    }

    /// Mark a node as terminal; reaching it ends the execution.
    pub fn mark_terminal(&mut self, name: &str) -> Result<()> {
        let index = self.resolve(name)?;
        self.nodes[index].terminal = true;
        Ok(())
    }

    /// Unconditional edge; shorthand for an always-true predicate.
    pub fn add_edge(&mut self, source: &str, target: &str) -> Result<()> {
        self.add_conditional_edge(source, target, always())
    }

    /// Conditional edge. Both endpoints must already be added; edges from
    /// one source are evaluated in insertion order.
    pub fn add_conditional_edge(
        &mut self,
        source: &str,
        target: &str,
        predicate: EdgePredicate,
    ) -> Result<()> {
        let source = self.resolve(source)?;
        let target = self.resolve(target)?;
        self.edges[source].push(Edge { target, predicate });
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FabricError::Validation(format!("unknown node '{name}'")))
    }

    fn validate(&self) -> Result<usize> {
        let entry = self
            .entry
            .ok_or_else(|| FabricError::Validation("no entry node set".to_string()))?;
        if !self.nodes.iter().any(|n| n.terminal) {
            return Err(FabricError::Validation(
                "graph has no terminal node".to_string(),
            ));
        }
        Ok(entry)
    }

    /// Run the graph against `state`, mutating it in place.
    ///
    /// Execution walks from the entry node, running each node and taking
    /// the first outgoing edge whose predicate holds. No matching edge
    /// ends the run successfully at a non-terminal node; a node or
    /// predicate error ends it with a failure report carrying the partial
    /// path and outputs. The engine enforces no iteration cap: bounded
    /// refinement loops are the caller's responsibility, via a counter
    /// kept in state.
    pub async fn execute(&self, state: &mut WorkflowState) -> WorkflowReport {
        let entry = match self.validate() {
            Ok(entry) => entry,
            Err(e) => {
                return WorkflowReport {
                    success: false,
                    execution_path: Vec::new(),
                    node_outputs: HashMap::new(),
                    error_message: Some(e.to_string()),
                }
            }
        };

        let shared = Arc::new(Mutex::new(std::mem::take(state)));
        let scratch = Arc::new(Mutex::new(ValueMap::new()));
        let mut execution_path = Vec::new();
        let mut node_outputs = HashMap::new();
        let mut error_message = None;
        let mut current = entry;

        loop {
            let node = &self.nodes[current];
            execution_path.push(node.name.clone());
            debug!(node = %node.name, "executing workflow node");

            let ctx = WorkflowContext {
                state: shared.clone(),
                scratch: scratch.clone(),
            };
            match (node.func)(ctx).await {
                Ok(output) => {
                    node_outputs.insert(node.name.clone(), output);
                }
                Err(e) => {
                    warn!(node = %node.name, "workflow node failed: {}", e);
                    error_message = Some(format!("node '{}' failed: {e}", node.name));
                    break;
                }
            }
            if node.terminal {
                break;
            }

            let mut next = None;
            {
                let state_view = shared.lock().await;
                for edge in &self.edges[current] {
                    match (edge.predicate)(&state_view) {
                        Ok(true) => {
                            next = Some(edge.target);
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            error_message = Some(format!(
                                "predicate on edge from '{}' failed: {e}",
                                node.name
                            ));
                            break;
                        }
                    }
                }
            }
            if error_message.is_some() {
                break;
            }
            match next {
                Some(target) => current = target,
                // No edge held: early termination, reported as success.
                None => break,
            }
        }

        *state = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        WorkflowReport {
            success: error_message.is_none(),
            execution_path,
            node_outputs,
            error_message,
        }
    }
}
