//! In-memory [`WorkflowStore`], used by every in-crate unit test.
//!
//! Mirrors the teacher's `InMemoryWorkflowEventStore`: a `parking_lot`-guarded
//! set of maps behind one struct, good enough to exercise every state
//! transition and lock interaction without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{
    DistributedLock, EngineInstance, ExecutionLog, LockType, NodeInstance, NodeStatus, Schedule,
    ScheduleExecution, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

use super::{InstanceFilter, NewInstance, Page, Pagination, StoreError, WorkflowStore};

#[derive(Default)]
struct State {
    definitions: HashMap<i64, WorkflowDefinition>,
    next_definition_id: i64,
    instances: HashMap<i64, WorkflowInstance>,
    next_instance_id: i64,
    node_instances: HashMap<i64, NodeInstance>,
    next_node_instance_id: i64,
    logs: Vec<ExecutionLog>,
    next_log_id: i64,
    schedules: HashMap<i64, Schedule>,
    next_schedule_id: i64,
    schedule_executions: Vec<ScheduleExecution>,
    locks: HashMap<String, DistributedLock>,
    engines: HashMap<uuid::Uuid, EngineInstance>,
}

pub struct InMemoryWorkflowStore {
    state: RwLock<State>,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_definition(&self, mut def: WorkflowDefinition) -> Result<WorkflowDefinition, StoreError> {
        let mut state = self.state.write();
        state.next_definition_id += 1;
        def.id = state.next_definition_id;
        state.definitions.insert(def.id, def.clone());
        Ok(def)
    }

    async fn get_definition(&self, id: i64) -> Result<WorkflowDefinition, StoreError> {
        self.state
            .read()
            .definitions
            .get(&id)
            .cloned()
            .ok_or(StoreError::DefinitionNotFound(id.to_string()))
    }

    async fn get_definition_by_name_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<WorkflowDefinition, StoreError> {
        self.state
            .read()
            .definitions
            .values()
            .find(|d| d.name == name && d.version == version)
            .cloned()
            .ok_or_else(|| StoreError::DefinitionNotFound(format!("{name}@{version}")))
    }

    async fn list_definitions(&self, name: Option<&str>) -> Result<Vec<WorkflowDefinition>, StoreError> {
        Ok(self
            .state
            .read()
            .definitions
            .values()
            .filter(|d| name.is_none_or(|n| d.name == n))
            .cloned()
            .collect())
    }

    async fn create_instance(&self, new: NewInstance) -> Result<WorkflowInstance, StoreError> {
        let mut state = self.state.write();
        if let Some(ext) = &new.external_id {
            if state.instances.values().any(|i| i.external_id.as_deref() == Some(ext.as_str())) {
                return Err(StoreError::DuplicateExternalId(ext.clone()));
            }
        }
        state.next_instance_id += 1;
        let now = Utc::now();
        let instance = WorkflowInstance {
            id: state.next_instance_id,
            workflow_definition_id: new.workflow_definition_id,
            name: new.name,
            external_id: new.external_id,
            status: WorkflowStatus::Pending,
            input_data: new.input_data,
            output_data: None,
            context_data: new.context_data,
            current_node_id: None,
            checkpoint_data: None,
            business_key: new.business_key,
            mutex_key: new.mutex_key,
            priority: new.priority,
            retry_count: 0,
            max_retries: new.max_retries,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            interrupted_at: None,
            error_message: None,
            error_details: None,
            lock_owner: None,
            lock_acquired_at: None,
            last_heartbeat: None,
            assigned_engine_id: None,
            created_at: now,
            updated_at: now,
            created_by: new.created_by,
        };
        state.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError> {
        self.state
            .read()
            .instances
            .get(&id)
            .cloned()
            .ok_or(StoreError::InstanceNotFound(id))
    }

    async fn find_with_filters(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<WorkflowInstance>, StoreError> {
        let state = self.state.read();
        let mut matching: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.workflow_definition_id.is_none_or(|d| i.workflow_definition_id == d))
            .filter(|i| {
                filter
                    .business_key
                    .as_ref()
                    .is_none_or(|k| i.business_key.as_deref() == Some(k.as_str()))
            })
            .filter(|i| filter.created_after.is_none_or(|t| i.created_at >= t))
            .filter(|i| filter.created_before.is_none_or(|t| i.created_at <= t))
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.id);

        let total = matching.len() as u64;
        let start = ((pagination.page.saturating_sub(1)) * pagination.page_size) as usize;
        let end = (start + pagination.page_size as usize).min(matching.len());
        let items = if start < matching.len() {
            matching[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn update_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        error_message: Option<String>,
        error_details: Option<Value>,
    ) -> Result<WorkflowInstance, StoreError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;

        if instance.status.is_terminal() {
            return Err(StoreError::IllegalTransition {
                from: instance.status,
                to: new_status,
            });
        }
        if !instance.status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: instance.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        instance.status = new_status;
        instance.updated_at = now;
        if error_message.is_some() {
            instance.error_message = error_message;
            instance.error_details = error_details;
        }
        match new_status {
            WorkflowStatus::Running if instance.started_at.is_none() => {
                instance.started_at = Some(now);
            }
            WorkflowStatus::Completed | WorkflowStatus::Cancelled | WorkflowStatus::Failed => {
                if new_status.is_terminal() {
                    instance.completed_at = Some(now);
                }
            }
            WorkflowStatus::Interrupted => {
                instance.interrupted_at = Some(now);
            }
            _ => {}
        }
        Ok(instance.clone())
    }

    async fn update_context(
        &self,
        id: i64,
        context_data: Value,
        current_node_id: Option<String>,
        checkpoint_data: Option<Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;
        instance.context_data = context_data;
        instance.current_node_id = current_node_id;
        instance.checkpoint_data = checkpoint_data;
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn set_output(&self, id: i64, output_data: Value) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;
        instance.output_data = Some(output_data);
        Ok(())
    }

    async fn acquire_instance_ownership(
        &self,
        id: i64,
        engine_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;
        instance.assigned_engine_id = Some(engine_id);
        instance.last_heartbeat = Some(now);
        Ok(())
    }

    async fn heartbeat_instance(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;
        instance.last_heartbeat = Some(now);
        Ok(())
    }

    async fn bulk_update_status(
        &self,
        ids: &[i64],
        new_status: WorkflowStatus,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let mut count = 0;
        for id in ids {
            if let Some(instance) = state.instances.get_mut(id) {
                if instance.status.can_transition_to(new_status) {
                    instance.status = new_status;
                    instance.updated_at = Utc::now();
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn find_stale_running(
        &self,
        heartbeat_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .filter(|i| matches!(i.status, WorkflowStatus::Running | WorkflowStatus::Interrupted))
            .filter(|i| match i.last_heartbeat {
                Some(hb) => now - hb > heartbeat_timeout,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create_node_instance(&self, mut node: NodeInstance) -> Result<NodeInstance, StoreError> {
        let mut state = self.state.write();
        state.next_node_instance_id += 1;
        node.id = state.next_node_instance_id;
        state.node_instances.insert(node.id, node.clone());
        Ok(node)
    }

    async fn update_node_instance(
        &self,
        id: i64,
        status: NodeStatus,
        output_data: Option<Value>,
        error_message: Option<String>,
    ) -> Result<NodeInstance, StoreError> {
        let mut state = self.state.write();
        let node = state
            .node_instances
            .get_mut(&id)
            .ok_or(StoreError::NodeInstanceNotFound(id))?;
        node.status = status;
        if output_data.is_some() {
            node.output_data = output_data;
        }
        if error_message.is_some() {
            node.error_message = error_message;
        }
        if status.is_terminal() {
            node.completed_at = Some(Utc::now());
        }
        Ok(node.clone())
    }

    async fn increment_node_retry_count(&self, id: i64) -> Result<NodeInstance, StoreError> {
        let mut state = self.state.write();
        let node = state
            .node_instances
            .get_mut(&id)
            .ok_or(StoreError::NodeInstanceNotFound(id))?;
        node.retry_count += 1;
        Ok(node.clone())
    }

    async fn list_node_instances(&self, workflow_instance_id: i64) -> Result<Vec<NodeInstance>, StoreError> {
        let mut nodes: Vec<NodeInstance> = self
            .state
            .read()
            .node_instances
            .values()
            .filter(|n| n.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn get_node_instance_by_node_id(
        &self,
        workflow_instance_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError> {
        Ok(self
            .state
            .read()
            .node_instances
            .values()
            .find(|n| n.workflow_instance_id == workflow_instance_id && n.node_id == node_id)
            .cloned())
    }

    async fn append_log(&self, mut log: ExecutionLog) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.next_log_id += 1;
        log.id = state.next_log_id;
        state.logs.push(log);
        Ok(())
    }

    async fn list_logs(
        &self,
        workflow_instance_id: i64,
        pagination: Pagination,
    ) -> Result<Page<ExecutionLog>, StoreError> {
        let state = self.state.read();
        let matching: Vec<ExecutionLog> = state
            .logs
            .iter()
            .filter(|l| l.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let start = ((pagination.page.saturating_sub(1)) * pagination.page_size) as usize;
        let end = (start + pagination.page_size as usize).min(matching.len());
        let items = if start < matching.len() {
            matching[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn create_schedule(&self, mut schedule: Schedule) -> Result<Schedule, StoreError> {
        let mut state = self.state.write();
        state.next_schedule_id += 1;
        schedule.id = state.next_schedule_id;
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self
            .state
            .read()
            .schedules
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn update_schedule_fire(
        &self,
        id: i64,
        last_fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(StoreError::ScheduleNotFound(id))?;
        schedule.last_fired_at = Some(last_fired_at);
        schedule.next_fire_at = next_fire_at;
        Ok(())
    }

    async fn record_schedule_execution(&self, exec: ScheduleExecution) -> Result<(), StoreError> {
        self.state.write().schedule_executions.push(exec);
        Ok(())
    }

    async fn count_non_terminal_instances_for_schedule(&self, schedule_id: i64) -> Result<u32, StoreError> {
        let state = self.state.read();
        let instance_ids: Vec<i64> = state
            .schedule_executions
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .filter_map(|e| e.workflow_instance_id)
            .collect();
        Ok(instance_ids
            .into_iter()
            .filter_map(|id| state.instances.get(&id))
            .filter(|i| !i.status.is_terminal())
            .count() as u32)
    }

    async fn acquire_lock(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        if let Some(existing) = state.locks.get(key) {
            if existing.is_alive(now) {
                return Ok(false);
            }
        }
        state.locks.insert(
            key.to_string(),
            DistributedLock {
                lock_key: key.to_string(),
                owner: owner.to_string(),
                lock_type,
                acquired_at: now,
                expires_at: now + ttl,
                renewed_at: None,
                metadata: None,
            },
        );
        Ok(true)
    }

    async fn renew_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        match state.locks.get_mut(key) {
            Some(lock) if lock.owner == owner && lock.is_alive(now) => {
                lock.expires_at = now + ttl;
                lock.renewed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        match state.locks.get(key) {
            Some(lock) if lock.owner == owner => {
                state.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release_lock(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.state.write().locks.remove(key).is_some())
    }

    async fn cleanup_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.is_alive(now));
        Ok((before - state.locks.len()) as u64)
    }

    async fn get_lock(&self, key: &str) -> Result<Option<DistributedLock>, StoreError> {
        Ok(self.state.read().locks.get(key).cloned())
    }

    async fn register_engine(&self, engine: EngineInstance) -> Result<(), StoreError> {
        self.state.write().engines.insert(engine.instance_id, engine);
        Ok(())
    }

    async fn heartbeat_engine(&self, instance_id: uuid::Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(engine) = self.state.write().engines.get_mut(&instance_id) {
            engine.last_heartbeat = now;
        }
        Ok(())
    }

    async fn list_engines(&self) -> Result<Vec<EngineInstance>, StoreError> {
        Ok(self.state.read().engines.values().cloned().collect())
    }
}
