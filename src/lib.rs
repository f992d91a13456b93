//! # Fabric Core
//!
//! Fabric Core is a multi-agent coordination fabric: a central Controller
//! registers capability-tagged Agents, accepts Tasks and dispatches each
//! one to a capability-matching Agent, routes Messages through an
//! asynchronous Message Bus, and drives composite jobs through a directed
//! Workflow Graph with conditional branching and bounded refinement loops.
//!
//! ## Architecture
//!
//! The system consists of:
//! - **Controller**: agent/task registries, capability routing, message history
//! - **Message Bus**: direct, broadcast and topic fan-out over a bounded worker pool,
//!   mirrored to an external durable log
//! - **Agent runtime**: registration, assignment execution and lifecycle notifications
//! - **Workflow Graph**: predicate-edged node graph sequencing agent work
//!
//! External collaborators (durable log sink, vector store, document
//! chunker, LLM service) are trait contracts with in-process default
//! implementations, so the fabric runs end to end out of the box.

/// Agent contract, runtime and bundled agents
pub mod agents;
/// HTTP API server and endpoints
pub mod api;
/// Asynchronous message bus
pub mod bus;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Central coordinator: registries, routing, task lifecycle
pub mod controller;
/// Error types and handling
pub mod error;
/// LLM text-generation service
pub mod llm;
/// Core data models
pub mod models;
/// Vector store, retrieval and chunking
pub mod retrieval;
/// External durable log sink
pub mod sink;
/// Workflow graph engine
pub mod workflow;

#[cfg(test)]
mod tests;

pub use error::{FabricError, Result};
