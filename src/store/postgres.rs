//! PostgreSQL-backed [`WorkflowStore`] (§6.3).
//!
//! Raw `sqlx::query` + `.bind()`/`.try_get()` throughout, never the
//! compile-time `query!`/`query_as!` macros — this crate has no
//! `DATABASE_URL` available at build time, matching the teacher's own
//! `PostgresWorkflowEventStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::model::{
    DistributedLock, EngineInstance, ExecutionLog, LockType, LogLevel, NodeDefinition, NodeInstance,
    NodeStatus, NodeType, Schedule, ScheduleExecution, ScheduleExecutionStatus, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};

use super::{InstanceFilter, NewInstance, Page, Pagination, StoreError, WorkflowStore};

fn db_err(e: sqlx::Error) -> StoreError {
    error!(error = %e, "database error");
    StoreError::Database(e.to_string())
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn parse_status(s: &str) -> Result<WorkflowStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn status_str(status: WorkflowStatus) -> String {
    status.to_string()
}

#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the crate's embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn row_to_definition(row: &sqlx::postgres::PgRow) -> Result<WorkflowDefinition, StoreError> {
        let nodes_json: serde_json::Value = row.try_get("nodes").map_err(db_err)?;
        let inputs_json: serde_json::Value = row.try_get("inputs").map_err(db_err)?;
        let outputs_json: serde_json::Value = row.try_get("outputs").map_err(db_err)?;
        Ok(WorkflowDefinition {
            id: row.try_get("id").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            version: row.try_get("version").map_err(db_err)?,
            nodes: serde_json::from_value::<Vec<NodeDefinition>>(nodes_json).map_err(ser_err)?,
            inputs: serde_json::from_value(inputs_json).map_err(ser_err)?,
            outputs: serde_json::from_value(outputs_json).map_err(ser_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }

    fn row_to_instance(row: &sqlx::postgres::PgRow) -> Result<WorkflowInstance, StoreError> {
        let status_str: String = row.try_get("status").map_err(db_err)?;
        Ok(WorkflowInstance {
            id: row.try_get("id").map_err(db_err)?,
            workflow_definition_id: row.try_get("workflow_definition_id").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            external_id: row.try_get("external_id").map_err(db_err)?,
            status: parse_status(&status_str)?,
            input_data: row.try_get("input_data").map_err(db_err)?,
            output_data: row.try_get("output_data").map_err(db_err)?,
            context_data: row.try_get("context_data").map_err(db_err)?,
            current_node_id: row.try_get("current_node_id").map_err(db_err)?,
            checkpoint_data: row.try_get("checkpoint_data").map_err(db_err)?,
            business_key: row.try_get("business_key").map_err(db_err)?,
            mutex_key: row.try_get("mutex_key").map_err(db_err)?,
            priority: row.try_get("priority").map_err(db_err)?,
            retry_count: row.try_get::<i32, _>("retry_count").map_err(db_err)? as u32,
            max_retries: row.try_get::<i32, _>("max_retries").map_err(db_err)? as u32,
            scheduled_at: row.try_get("scheduled_at").map_err(db_err)?,
            started_at: row.try_get("started_at").map_err(db_err)?,
            completed_at: row.try_get("completed_at").map_err(db_err)?,
            interrupted_at: row.try_get("interrupted_at").map_err(db_err)?,
            error_message: row.try_get("error_message").map_err(db_err)?,
            error_details: row.try_get("error_details").map_err(db_err)?,
            lock_owner: row.try_get("lock_owner").map_err(db_err)?,
            lock_acquired_at: row.try_get("lock_acquired_at").map_err(db_err)?,
            last_heartbeat: row.try_get("last_heartbeat").map_err(db_err)?,
            assigned_engine_id: row.try_get("assigned_engine_id").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
            created_by: row.try_get("created_by").map_err(db_err)?,
        })
    }

    fn row_to_node_instance(row: &sqlx::postgres::PgRow) -> Result<NodeInstance, StoreError> {
        let node_type: String = row.try_get("node_type").map_err(db_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        Ok(NodeInstance {
            id: row.try_get("id").map_err(db_err)?,
            workflow_instance_id: row.try_get("workflow_instance_id").map_err(db_err)?,
            node_id: row.try_get("node_id").map_err(db_err)?,
            parent_node_instance_id: row.try_get("parent_node_instance_id").map_err(db_err)?,
            node_type: serde_json::from_value(serde_json::Value::String(node_type)).map_err(ser_err)?,
            status: serde_json::from_value(serde_json::Value::String(status)).map_err(ser_err)?,
            input_data: row.try_get("input_data").map_err(db_err)?,
            output_data: row.try_get("output_data").map_err(db_err)?,
            error_message: row.try_get("error_message").map_err(db_err)?,
            retry_count: row.try_get::<i32, _>("retry_count").map_err(db_err)? as u32,
            started_at: row.try_get("started_at").map_err(db_err)?,
            completed_at: row.try_get("completed_at").map_err(db_err)?,
        })
    }

    fn row_to_lock(row: &sqlx::postgres::PgRow) -> Result<DistributedLock, StoreError> {
        let lock_type: String = row.try_get("lock_type").map_err(db_err)?;
        Ok(DistributedLock {
            lock_key: row.try_get("lock_key").map_err(db_err)?,
            owner: row.try_get("owner").map_err(db_err)?,
            lock_type: serde_json::from_value(serde_json::Value::String(lock_type)).map_err(ser_err)?,
            acquired_at: row.try_get("acquired_at").map_err(db_err)?,
            expires_at: row.try_get("expires_at").map_err(db_err)?,
            renewed_at: row.try_get("renewed_at").map_err(db_err)?,
            metadata: row.try_get("metadata").map_err(db_err)?,
        })
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, def))]
    async fn create_definition(&self, def: WorkflowDefinition) -> Result<WorkflowDefinition, StoreError> {
        let nodes = serde_json::to_value(&def.nodes).map_err(ser_err)?;
        let inputs = serde_json::to_value(&def.inputs).map_err(ser_err)?;
        let outputs = serde_json::to_value(&def.outputs).map_err(ser_err)?;
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (name, version, nodes, inputs, outputs, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id, name, version, nodes, inputs, outputs, created_at
            "#,
        )
        .bind(&def.name)
        .bind(def.version)
        .bind(&nodes)
        .bind(&inputs)
        .bind(&outputs)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_definition(&row)
    }

    #[instrument(skip(self))]
    async fn get_definition(&self, id: i64) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, version, nodes, inputs, outputs, created_at FROM workflow_definitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::DefinitionNotFound(id.to_string()))?;
        Self::row_to_definition(&row)
    }

    #[instrument(skip(self))]
    async fn get_definition_by_name_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, version, nodes, inputs, outputs, created_at FROM workflow_definitions \
             WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::DefinitionNotFound(format!("{name}@{version}")))?;
        Self::row_to_definition(&row)
    }

    #[instrument(skip(self))]
    async fn list_definitions(&self, name: Option<&str>) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, version, nodes, inputs, outputs, created_at FROM workflow_definitions \
             WHERE $1::text IS NULL OR name = $1 ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_definition).collect()
    }

    #[instrument(skip(self, new))]
    async fn create_instance(&self, new: NewInstance) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_instances (
                workflow_definition_id, name, external_id, status, input_data, context_data,
                business_key, mutex_key, priority, max_retries, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, now(), now())
            RETURNING *
            "#,
        )
        .bind(new.workflow_definition_id)
        .bind(&new.name)
        .bind(&new.external_id)
        .bind(&new.input_data)
        .bind(&new.context_data)
        .bind(&new.business_key)
        .bind(&new.mutex_key)
        .bind(new.priority)
        .bind(new.max_retries as i32)
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return StoreError::DuplicateExternalId(
                        new.external_id.clone().unwrap_or_default(),
                    );
                }
            }
            db_err(e)
        })?;
        Self::row_to_instance(&row)
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::InstanceNotFound(id))?;
        Self::row_to_instance(&row)
    }

    #[instrument(skip(self, filter))]
    async fn find_with_filters(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<WorkflowInstance>, StoreError> {
        let status = filter.status.map(status_str);
        let offset = ((pagination.page.saturating_sub(1)) * pagination.page_size) as i64;

        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_instances
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::bigint IS NULL OR workflow_definition_id = $2)
              AND ($3::text IS NULL OR business_key = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY id
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(&status)
        .bind(filter.workflow_definition_id)
        .bind(&filter.business_key)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(pagination.page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = sqlx::query(
            r#"
            SELECT count(*) as count FROM workflow_instances
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::bigint IS NULL OR workflow_definition_id = $2)
              AND ($3::text IS NULL OR business_key = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            "#,
        )
        .bind(&status)
        .bind(filter.workflow_definition_id)
        .bind(&filter.business_key)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_get("count")
        .map_err(db_err)?;

        let items = rows.iter().map(Self::row_to_instance).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    #[instrument(skip(self, error_details))]
    async fn update_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        error_message: Option<String>,
        error_details: Option<serde_json::Value>,
    ) -> Result<WorkflowInstance, StoreError> {
        let current = self.get_instance(id).await?;
        if !current.status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: current.status,
                to: new_status,
            });
        }

        let row = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET status = $2,
                error_message = COALESCE($3, error_message),
                error_details = COALESCE($4, error_details),
                started_at = CASE WHEN $2 = 'running' AND started_at IS NULL THEN now() ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END,
                interrupted_at = CASE WHEN $2 = 'interrupted' THEN now() ELSE interrupted_at END,
                updated_at = now()
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_str(new_status))
        .bind(&error_message)
        .bind(&error_details)
        .bind(status_str(current.status))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::IllegalTransition {
            from: current.status,
            to: new_status,
        })?;
        Self::row_to_instance(&row)
    }

    #[instrument(skip(self, context_data, checkpoint_data))]
    async fn update_context(
        &self,
        id: i64,
        context_data: serde_json::Value,
        current_node_id: Option<String>,
        checkpoint_data: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_instances SET context_data = $2, current_node_id = $3, \
             checkpoint_data = $4, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(&context_data)
        .bind(&current_node_id)
        .bind(&checkpoint_data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, output_data))]
    async fn set_output(&self, id: i64, output_data: serde_json::Value) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflow_instances SET output_data = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(&output_data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_instance_ownership(
        &self,
        id: i64,
        engine_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_instances SET assigned_engine_id = $2, last_heartbeat = $3, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(engine_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn heartbeat_instance(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflow_instances SET last_heartbeat = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, ids))]
    async fn bulk_update_status(&self, ids: &[i64], new_status: WorkflowStatus) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET status = $2, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status_str(new_status))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_stale_running(
        &self,
        heartbeat_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let cutoff = now - heartbeat_timeout;
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances WHERE status IN ('running', 'interrupted') \
             AND (last_heartbeat IS NULL OR last_heartbeat < $1)",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    #[instrument(skip(self, node))]
    async fn create_node_instance(&self, node: NodeInstance) -> Result<NodeInstance, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO node_instances (
                workflow_instance_id, node_id, parent_node_instance_id, node_type, status,
                input_data, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(node.workflow_instance_id)
        .bind(&node.node_id)
        .bind(node.parent_node_instance_id)
        .bind(node_type_str(node.node_type))
        .bind(node_status_str(node.status))
        .bind(&node.input_data)
        .bind(node.retry_count as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_node_instance(&row)
    }

    #[instrument(skip(self, output_data))]
    async fn update_node_instance(
        &self,
        id: i64,
        status: NodeStatus,
        output_data: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> Result<NodeInstance, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE node_instances
            SET status = $2,
                output_data = COALESCE($3, output_data),
                error_message = COALESCE($4, error_message),
                completed_at = CASE WHEN $5 THEN now() ELSE completed_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(node_status_str(status))
        .bind(&output_data)
        .bind(&error_message)
        .bind(status.is_terminal())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::NodeInstanceNotFound(id))?;
        Self::row_to_node_instance(&row)
    }

    #[instrument(skip(self))]
    async fn increment_node_retry_count(&self, id: i64) -> Result<NodeInstance, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE node_instances
            SET retry_count = retry_count + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::NodeInstanceNotFound(id))?;
        Self::row_to_node_instance(&row)
    }

    #[instrument(skip(self))]
    async fn list_node_instances(&self, workflow_instance_id: i64) -> Result<Vec<NodeInstance>, StoreError> {
        let rows = sqlx::query("SELECT * FROM node_instances WHERE workflow_instance_id = $1 ORDER BY id")
            .bind(workflow_instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_node_instance).collect()
    }

    #[instrument(skip(self))]
    async fn get_node_instance_by_node_id(
        &self,
        workflow_instance_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM node_instances WHERE workflow_instance_id = $1 AND node_id = $2",
        )
        .bind(workflow_instance_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(Self::row_to_node_instance).transpose()
    }

    #[instrument(skip(self, log))]
    async fn append_log(&self, log: ExecutionLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (workflow_instance_id, node_instance_id, level, message, data, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.workflow_instance_id)
        .bind(log.node_instance_id)
        .bind(log_level_str(log.level))
        .bind(&log.message)
        .bind(&log.data)
        .bind(log.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_logs(
        &self,
        workflow_instance_id: i64,
        pagination: Pagination,
    ) -> Result<Page<ExecutionLog>, StoreError> {
        let offset = ((pagination.page.saturating_sub(1)) * pagination.page_size) as i64;
        let rows = sqlx::query(
            "SELECT * FROM execution_logs WHERE workflow_instance_id = $1 ORDER BY id \
             LIMIT $2 OFFSET $3",
        )
        .bind(workflow_instance_id)
        .bind(pagination.page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = sqlx::query("SELECT count(*) as count FROM execution_logs WHERE workflow_instance_id = $1")
            .bind(workflow_instance_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?
            .try_get("count")
            .map_err(db_err)?;

        let items = rows
            .iter()
            .map(|row| {
                let level: String = row.try_get("level").map_err(db_err)?;
                Ok(ExecutionLog {
                    id: row.try_get("id").map_err(db_err)?,
                    workflow_instance_id: row.try_get("workflow_instance_id").map_err(db_err)?,
                    node_instance_id: row.try_get("node_instance_id").map_err(db_err)?,
                    level: serde_json::from_value(serde_json::Value::String(level)).map_err(ser_err)?,
                    message: row.try_get("message").map_err(db_err)?,
                    data: row.try_get("data").map_err(db_err)?,
                    timestamp: row.try_get("timestamp").map_err(db_err)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Page {
            items,
            total: total as u64,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    #[instrument(skip(self, schedule))]
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO schedules (
                name, workflow_definition_id, executor_name, cron_expression, timezone, enabled,
                max_instances, input_data, context_data, business_key, mutex_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(&schedule.name)
        .bind(schedule.workflow_definition_id)
        .bind(&schedule.executor_name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.enabled)
        .bind(schedule.max_instances as i32)
        .bind(&schedule.input_data)
        .bind(&schedule.context_data)
        .bind(&schedule.business_key)
        .bind(&schedule.mutex_key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_schedule(&row)
    }

    #[instrument(skip(self))]
    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE enabled = true ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self))]
    async fn update_schedule_fire(
        &self,
        id: i64,
        last_fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedules SET last_fired_at = $2, next_fire_at = $3 WHERE id = $1")
            .bind(id)
            .bind(last_fired_at)
            .bind(next_fire_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, exec))]
    async fn record_schedule_execution(&self, exec: ScheduleExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schedule_executions (schedule_id, workflow_instance_id, fired_at, status, error)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(exec.schedule_id)
        .bind(exec.workflow_instance_id)
        .bind(exec.fired_at)
        .bind(schedule_exec_status_str(exec.status))
        .bind(&exec.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_non_terminal_instances_for_schedule(&self, schedule_id: i64) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query(
            r#"
            SELECT count(*) as count
            FROM schedule_executions se
            JOIN workflow_instances wi ON wi.id = se.workflow_instance_id
            WHERE se.schedule_id = $1
              AND wi.status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_get("count")
        .map_err(db_err)?;
        Ok(count as u32)
    }

    #[instrument(skip(self))]
    async fn acquire_lock(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let expires_at = now + ttl;
        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_key, owner, lock_type, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (lock_key) DO UPDATE
              SET owner = EXCLUDED.owner, lock_type = EXCLUDED.lock_type,
                  acquired_at = EXCLUDED.acquired_at, expires_at = EXCLUDED.expires_at,
                  renewed_at = NULL
              WHERE distributed_locks.expires_at <= $4
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(lock_type_str(lock_type))
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn renew_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE distributed_locks SET expires_at = $4, renewed_at = $3 \
             WHERE lock_key = $1 AND owner = $2 AND expires_at > $3",
        )
        .bind(key)
        .bind(owner)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn force_release_lock(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn cleanup_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_lock(&self, key: &str) -> Result<Option<DistributedLock>, StoreError> {
        let row = sqlx::query("SELECT * FROM distributed_locks WHERE lock_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_lock).transpose()
    }

    #[instrument(skip(self, engine))]
    async fn register_engine(&self, engine: EngineInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO engine_instances (instance_id, hostname, status, last_heartbeat, active_workflows, cpu_usage, memory_usage)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (instance_id) DO UPDATE
              SET hostname = EXCLUDED.hostname, status = EXCLUDED.status,
                  last_heartbeat = EXCLUDED.last_heartbeat, active_workflows = EXCLUDED.active_workflows,
                  cpu_usage = EXCLUDED.cpu_usage, memory_usage = EXCLUDED.memory_usage
            "#,
        )
        .bind(engine.instance_id)
        .bind(&engine.hostname)
        .bind(&engine.status)
        .bind(engine.last_heartbeat)
        .bind(engine.active_workflows as i32)
        .bind(engine.cpu_usage)
        .bind(engine.memory_usage)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn heartbeat_engine(&self, instance_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE engine_instances SET last_heartbeat = $2 WHERE instance_id = $1")
            .bind(instance_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_engines(&self) -> Result<Vec<EngineInstance>, StoreError> {
        let rows = sqlx::query("SELECT * FROM engine_instances ORDER BY instance_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(EngineInstance {
                    instance_id: row.try_get("instance_id").map_err(db_err)?,
                    hostname: row.try_get("hostname").map_err(db_err)?,
                    status: row.try_get("status").map_err(db_err)?,
                    last_heartbeat: row.try_get("last_heartbeat").map_err(db_err)?,
                    active_workflows: row.try_get::<i32, _>("active_workflows").map_err(db_err)? as u32,
                    cpu_usage: row.try_get("cpu_usage").map_err(db_err)?,
                    memory_usage: row.try_get("memory_usage").map_err(db_err)?,
                })
            })
            .collect()
    }
}

impl PostgresWorkflowStore {
    fn row_to_schedule(row: &sqlx::postgres::PgRow) -> Result<Schedule, StoreError> {
        Ok(Schedule {
            id: row.try_get("id").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            workflow_definition_id: row.try_get("workflow_definition_id").map_err(db_err)?,
            executor_name: row.try_get("executor_name").map_err(db_err)?,
            cron_expression: row.try_get("cron_expression").map_err(db_err)?,
            timezone: row.try_get("timezone").map_err(db_err)?,
            enabled: row.try_get("enabled").map_err(db_err)?,
            max_instances: row.try_get::<i32, _>("max_instances").map_err(db_err)? as u32,
            input_data: row.try_get("input_data").map_err(db_err)?,
            context_data: row.try_get("context_data").map_err(db_err)?,
            business_key: row.try_get("business_key").map_err(db_err)?,
            mutex_key: row.try_get("mutex_key").map_err(db_err)?,
            last_fired_at: row.try_get("last_fired_at").map_err(db_err)?,
            next_fire_at: row.try_get("next_fire_at").map_err(db_err)?,
        })
    }
}

fn node_type_str(t: NodeType) -> &'static str {
    match t {
        NodeType::Simple => "simple",
        NodeType::Parallel => "parallel",
        NodeType::Loop => "loop",
        NodeType::Subprocess => "subprocess",
    }
}

fn node_status_str(s: NodeStatus) -> &'static str {
    match s {
        NodeStatus::Pending => "pending",
        NodeStatus::Running => "running",
        NodeStatus::Completed => "completed",
        NodeStatus::Failed => "failed",
        NodeStatus::Skipped => "skipped",
        NodeStatus::Cancelled => "cancelled",
    }
}

fn log_level_str(l: LogLevel) -> &'static str {
    match l {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn lock_type_str(t: LockType) -> &'static str {
    match t {
        LockType::Workflow => "workflow",
        LockType::Resource => "resource",
        LockType::Mutex => "mutex",
        LockType::Business => "business",
    }
}

fn schedule_exec_status_str(s: ScheduleExecutionStatus) -> &'static str {
    match s {
        ScheduleExecutionStatus::Success => "success",
        ScheduleExecutionStatus::Failed => "failed",
        ScheduleExecutionStatus::Timeout => "timeout",
        ScheduleExecutionStatus::Running => "running",
    }
}
