//! Durable work queue and worker coordination (`spec.md` §4.5).
//!
//! Three pieces: [`model`] (data types and the `AgentTask` state machine),
//! [`store`] (the persistence + claim-exclusivity contract), and [`workers`]
//! (worker liveness tracking and the watch-mode dispatch loop).

pub mod model;
pub mod store;
pub mod workers;

pub use model::{AgentTask, AgentTaskState, Codebase, CodebaseStatus, Worker, WorkerStatus};
pub use store::{AgentTaskFilter, AgentTaskStore, InMemoryAgentTaskStore, SharedAgentTaskStore};
pub use workers::WorkerCoordinator;
