//! # Stratix Durable Workflow Engine
//!
//! A PostgreSQL-backed durable workflow orchestration engine: status-driven
//! instances advance through a graph of nodes (simple, parallel, loop,
//! subprocess), coordinated across engine replicas purely through database
//! rows — a distributed lock table for mutual exclusion, a heartbeat column
//! for liveness.
//!
//! ## Features
//!
//! - **Status-driven instances**: `WorkflowInstance.status` is the single
//!   source of truth, application-enforced through a state machine — no
//!   event-sourced replay.
//! - **Pluggable node executors**: simple/task, parallel (join `all`/`any`/`none`),
//!   loop (static count or dynamic source expression), subprocess
//!   (parent/child instance composition).
//! - **Distributed coordination**: row-backed leases (`DistributedLockManager`)
//!   guard instance ownership, business-key mutual exclusion, and scheduler
//!   leadership — no external coordination service.
//! - **Cron scheduling**: `Scheduler` mints instances on a cron cadence,
//!   respecting per-schedule concurrency caps and mutex keys.
//! - **Crash recovery**: `RecoveryService` reclaims instances abandoned by a
//!   dead engine replica via heartbeat expiry.
//! - **Automatic retries**: per-node `RetryPolicy` with exponential backoff
//!   and jitter, reused across the reliability layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowEngine                         │
//! │  (drives instance state machines, dispatches node executors) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowStore                           │
//! │   (PostgreSQL: workflow_definitions, instances, node_instances,│
//! │    execution_logs, schedules, distributed_locks)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!         Scheduler    RecoveryService   DistributedLockManager
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use stratix_durable::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
//!     let executors = Arc::new(ExecutorRegistry::new());
//!     let events = Arc::new(EventBus::new(1000));
//!     let engine = Arc::new(WorkflowEngine::new(store, executors, events, EngineConfig::default()));
//!
//!     let instance_id = engine.start_instance(new_instance).await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod bench;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod lock;
pub mod model;
pub mod recovery;
pub mod reliability;
pub mod scheduler;
pub mod store;
pub mod template;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::WorkflowEngine;
    pub use crate::error::EngineError;
    pub use crate::event_bus::{Event, EventBus, EventType};
    pub use crate::executor::{
        AnyExecutor, ExecutionContext, ExecutionResult, Executor, ExecutorError, ExecutorRegistry,
    };
    pub use crate::lock::{DistributedLockManager, LockError, LockGuard};
    pub use crate::model::{
        DistributedLock, EngineInstance, ExecutionLog, NodeDefinition, NodeInstance, NodeStatus,
        NodeType, Schedule, ScheduleExecution, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
    };
    pub use crate::recovery::{RecoveryError, RecoveryService};
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::{Scheduler, SchedulerError};
    pub use crate::store::{
        InMemoryWorkflowStore, NewInstance, PostgresWorkflowStore, StoreError, WorkflowStore,
    };
    pub use crate::template::TemplateError;
}

// Re-export key types at crate root, mirroring the teacher's flat top-level surface.
pub use config::EngineConfig;
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use event_bus::{Event, EventBus, EventType};
pub use executor::{AnyExecutor, ExecutionContext, ExecutionResult, Executor, ExecutorError, ExecutorRegistry};
pub use lock::{DistributedLockManager, LockError, LockGuard};
pub use recovery::{RecoveryError, RecoveryService};
pub use scheduler::{Scheduler, SchedulerError};
pub use store::{InMemoryWorkflowStore, NewInstance, PostgresWorkflowStore, StoreError, WorkflowStore};
