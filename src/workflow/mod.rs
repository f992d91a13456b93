//! Workflow graph engine.
//!
//! A typed, state-carrying directed graph: named nodes, predicate edges
//! evaluated in insertion order, a single entry and one or more terminal
//! nodes. Composite jobs sequence agent invocations through it, with
//! conditional branching and caller-bounded refinement loops.

pub mod graph;
pub mod state;

pub use graph::{
    always, node, when, EdgePredicate, NodeFn, WorkflowContext, WorkflowGraph, WorkflowReport,
};
pub use state::{HistoryEntry, WorkflowState};
