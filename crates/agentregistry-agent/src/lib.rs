//! Master-agent runtime for the agentregistry control plane.
//!
//! This crate has no Kubernetes dependency: it is the in-memory side of the
//! system — the bounded event hub, the concurrent world state, the batch
//! triager, and the LLM tool loop with its built-in and MCP-discovered
//! tools. The operator crate owns its lifecycle and surfaces its state into
//! the `MasterAgentConfig` record.

pub mod a2a;
pub mod conversation;
pub mod error;
pub mod events;
pub mod llm;
pub mod mcp;
pub mod pipeline;
pub mod tools;
pub mod triage;
pub mod world;

pub use error::{AgentError, Result};
pub use events::{EventHub, InfraEvent, Severity};
pub use pipeline::{MasterAgentPipeline, PipelineConfig, SchedulingMode};
pub use world::{Incident, IncidentState, WorldState, WorldStatus};
