//! The persisted data model (§3).
//!
//! Every entity here is a plain struct round-tripped through [`crate::store`];
//! there is no event-sourced replay layer — a `WorkflowInstance` row's
//! `status` field is authoritative, not reconstructed from history.

mod definition;
mod instance;
mod lock;
mod node_instance;
mod schedule;

pub use definition::{
    ErrorHandling, InputSpec, JoinType, NodeDefinition, NodeType, OutputSpec, SubprocessSpec,
    WorkflowDefinition,
};
pub use instance::{WorkflowInstance, WorkflowStatus};
pub use lock::{DistributedLock, EngineInstance, LockType};
pub use node_instance::{ExecutionLog, LogLevel, NodeInstance, NodeStatus};
pub use schedule::{Schedule, ScheduleExecution, ScheduleExecutionStatus};
