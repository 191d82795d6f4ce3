//! Persistence layer (§4.1): a thin, object-safe trait over the data model,
//! with a Postgres-backed implementation and an in-memory test double.
//!
//! Grounded on the teacher's `WorkflowEventStore` trait split — one
//! `async_trait` interface, one `InMemory*` implementation used throughout
//! the crate's unit tests, one `Postgres*` implementation using raw
//! `sqlx::query` (never the compile-time `query!` macro, since this crate
//! owns no `DATABASE_URL` at compile time).

mod memory;
mod postgres;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{
    DistributedLock, EngineInstance, ExecutionLog, LockType, NodeInstance, NodeStatus, Schedule,
    ScheduleExecution, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(i64),

    #[error("node instance not found: {0}")]
    NodeInstanceNotFound(i64),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("conflict: external_id {0} already exists")]
    DuplicateExternalId(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Fields accepted when minting a new [`WorkflowInstance`]; everything else
/// (`id`, timestamps, lock fields) is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub workflow_definition_id: i64,
    pub name: String,
    pub external_id: Option<String>,
    pub input_data: Value,
    pub context_data: Value,
    pub business_key: Option<String>,
    pub mutex_key: Option<String>,
    pub priority: i32,
    pub max_retries: u32,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<WorkflowStatus>,
    pub workflow_definition_id: Option<i64>,
    pub business_key: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size as u64)
        }
    }

    pub fn has_next(&self) -> bool {
        (self.page as u64) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// The persistence contract shared by the Engine, Scheduler, Lock Manager,
/// and Recovery Service.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // --- Definitions ---
    async fn create_definition(&self, def: WorkflowDefinition) -> Result<WorkflowDefinition, StoreError>;
    async fn get_definition(&self, id: i64) -> Result<WorkflowDefinition, StoreError>;
    async fn get_definition_by_name_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<WorkflowDefinition, StoreError>;
    async fn list_definitions(&self, name: Option<&str>) -> Result<Vec<WorkflowDefinition>, StoreError>;

    // --- Instances ---
    async fn create_instance(&self, new: NewInstance) -> Result<WorkflowInstance, StoreError>;
    async fn get_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError>;
    async fn find_with_filters(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<WorkflowInstance>, StoreError>;

    /// Conditional status update: fails with `IllegalTransition` if the
    /// current status cannot move to `new_status` (§4.5, §4.1 "refuse
    /// disallowed transitions at the application layer").
    async fn update_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        error_message: Option<String>,
        error_details: Option<Value>,
    ) -> Result<WorkflowInstance, StoreError>;

    async fn update_context(
        &self,
        id: i64,
        context_data: Value,
        current_node_id: Option<String>,
        checkpoint_data: Option<Value>,
    ) -> Result<(), StoreError>;

    async fn set_output(&self, id: i64, output_data: Value) -> Result<(), StoreError>;

    async fn acquire_instance_ownership(
        &self,
        id: i64,
        engine_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn heartbeat_instance(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Bulk status update, single statement semantics; callers pass at most
    /// 500 ids (§4.1).
    async fn bulk_update_status(
        &self,
        ids: &[i64],
        new_status: WorkflowStatus,
    ) -> Result<u64, StoreError>;

    async fn find_stale_running(
        &self,
        heartbeat_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    // --- Node instances ---
    async fn create_node_instance(&self, node: NodeInstance) -> Result<NodeInstance, StoreError>;
    async fn update_node_instance(
        &self,
        id: i64,
        status: NodeStatus,
        output_data: Option<Value>,
        error_message: Option<String>,
    ) -> Result<NodeInstance, StoreError>;
    /// Bump `retryCount` by one ahead of a re-dispatch (§4.5 step 7).
    async fn increment_node_retry_count(&self, id: i64) -> Result<NodeInstance, StoreError>;
    async fn list_node_instances(&self, workflow_instance_id: i64) -> Result<Vec<NodeInstance>, StoreError>;
    async fn get_node_instance_by_node_id(
        &self,
        workflow_instance_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError>;

    // --- Execution logs ---
    async fn append_log(&self, log: ExecutionLog) -> Result<(), StoreError>;
    async fn list_logs(
        &self,
        workflow_instance_id: i64,
        pagination: Pagination,
    ) -> Result<Page<ExecutionLog>, StoreError>;

    // --- Schedules ---
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError>;
    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StoreError>;
    async fn update_schedule_fire(
        &self,
        id: i64,
        last_fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    async fn record_schedule_execution(&self, exec: ScheduleExecution) -> Result<(), StoreError>;
    async fn count_non_terminal_instances_for_schedule(&self, schedule_id: i64) -> Result<u32, StoreError>;

    // --- Distributed locks ---
    async fn acquire_lock(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn renew_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool, StoreError>;
    async fn force_release_lock(&self, key: &str) -> Result<bool, StoreError>;
    async fn cleanup_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn get_lock(&self, key: &str) -> Result<Option<DistributedLock>, StoreError>;

    // --- Engine registry (best-effort; default no-ops for stores that don't track this) ---
    async fn register_engine(&self, _engine: EngineInstance) -> Result<(), StoreError> {
        Ok(())
    }
    async fn heartbeat_engine(&self, _instance_id: uuid::Uuid, _now: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(())
    }
    async fn list_engines(&self) -> Result<Vec<EngineInstance>, StoreError> {
        Ok(Vec::new())
    }
}
