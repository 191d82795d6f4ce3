//! Node dispatch: runnable-node determination, template resolution, retry,
//! and the four node executor kinds (§4.5 "Node executors").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::event_bus::{Event, EventType};
use crate::executor::{ExecutionContext, ExecutorError};
use crate::model::{
    ErrorHandling, ExecutionLog, JoinType, LogLevel, NodeDefinition, NodeInstance, NodeStatus,
    NodeType, WorkflowInstance, WorkflowStatus,
};
use crate::reliability::RetryPolicy;
use crate::store::NewInstance;
use crate::template;

use super::{RunState, WorkflowEngine, DEFAULT_NODE_TIMEOUT};

/// Drive `instance_id` through repeated rounds of runnable-node dispatch
/// until it reaches a terminal status.
pub(crate) async fn run_to_completion(
    engine: &Arc<WorkflowEngine>,
    instance_id: i64,
    cancel: CancellationToken,
) -> Result<WorkflowStatus, EngineError> {
    loop {
        let instance = engine.store.get_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(instance.status);
        }
        if instance.status == WorkflowStatus::Cancelled {
            return Ok(WorkflowStatus::Cancelled);
        }
        if cancel.is_cancelled() {
            engine
                .store
                .update_status(instance_id, WorkflowStatus::Cancelled, None, None)
                .await?;
            return Ok(WorkflowStatus::Cancelled);
        }

        match advance_once(engine, &instance, cancel.clone()).await? {
            Advancement::Progressed => continue,
            Advancement::Terminal(status) => return Ok(status),
        }
    }
}

pub(crate) enum Advancement {
    Progressed,
    Terminal(WorkflowStatus),
}

/// One round: compute the runnable node set, dispatch it, and fold the
/// results back into the instance. Returns whether the instance reached a
/// terminal state this round.
pub(crate) async fn advance_once(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    cancel: CancellationToken,
) -> Result<Advancement, EngineError> {
    let def = engine.store.get_definition(instance.workflow_definition_id).await?;
    let existing = engine.store.list_node_instances(instance.id).await?;

    let mut statuses: std::collections::HashMap<String, NodeStatus> =
        existing.iter().map(|n| (n.node_id.clone(), n.status)).collect();
    let run_state = RunState {
        node_statuses: statuses.clone(),
    };

    let context = merged_context(instance);
    let mut runnable = Vec::new();
    for node in &def.nodes {
        if statuses.contains_key(&node.node_id) {
            continue;
        }
        if !run_state.dependencies_satisfied(&node.depends_on) {
            continue;
        }
        if let Some(cond) = &node.condition {
            if !evaluate_condition(cond, &context)? {
                skip_node(engine, instance.id, node).await?;
                statuses.insert(node.node_id.clone(), NodeStatus::Skipped);
                continue;
            }
        }
        runnable.push(node);
    }

    if runnable.is_empty() {
        if all_reachable_terminal(&def, &statuses) {
            let failed = statuses.values().any(|s| *s == NodeStatus::Failed);
            let final_status = if failed {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Completed
            };
            engine
                .store
                .update_status(instance.id, final_status, None, None)
                .await?;
            if final_status == WorkflowStatus::Completed {
                engine.store.set_output(instance.id, context.clone()).await?;
            }
            return Ok(Advancement::Terminal(final_status));
        }
        return Err(EngineError::Internal(format!(
            "no runnable node for instance {} but graph is not fully resolved",
            instance.id
        )));
    }

    let futures = runnable
        .into_iter()
        .map(|node| dispatch_node(engine, instance, node, cancel.clone()));
    let outcomes = futures::future::join_all(futures).await;
    for outcome in outcomes {
        outcome?;
    }

    Ok(Advancement::Progressed)
}

fn merged_context(instance: &WorkflowInstance) -> Value {
    let mut merged = instance.context_data.clone();
    if let (Value::Object(base), Value::Object(extra)) = (&mut merged, &instance.input_data) {
        for (k, v) in extra {
            base.entry(k.clone()).or_insert_with(|| v.clone());
        }
    } else if merged.is_null() {
        merged = instance.input_data.clone();
    }
    merged
}

fn evaluate_condition(expr: &str, context: &Value) -> Result<bool, EngineError> {
    let resolved = template::resolve(&Value::String(format!("${{{expr}}}")), context);
    Ok(match resolved.value {
        Value::Bool(b) => b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

async fn skip_node(
    engine: &Arc<WorkflowEngine>,
    instance_id: i64,
    node: &NodeDefinition,
) -> Result<(), EngineError> {
    engine
        .store
        .create_node_instance(NodeInstance {
            id: 0,
            workflow_instance_id: instance_id,
            node_id: node.node_id.clone(),
            parent_node_instance_id: None,
            node_type: node.node_type,
            status: NodeStatus::Skipped,
            input_data: Value::Null,
            output_data: None,
            error_message: None,
            retry_count: 0,
            started_at: None,
            completed_at: Some(Utc::now()),
        })
        .await?;
    Ok(())
}

fn all_reachable_terminal(
    def: &crate::model::WorkflowDefinition,
    statuses: &std::collections::HashMap<String, NodeStatus>,
) -> bool {
    def.nodes.len() == statuses.len() && statuses.values().all(|s| s.is_terminal())
}

/// Dispatch a single runnable node: create its NodeInstance, resolve its
/// input, invoke the appropriate node executor kind, and fold results back
/// into the instance's `contextData` (§4.5 steps 5-8).
#[instrument(skip(engine, node, cancel))]
async fn dispatch_node(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node: &NodeDefinition,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    let context = merged_context(instance);
    let raw_input: Value = serde_json::to_value(&node.input_data).unwrap_or(Value::Null);
    let resolved_input = template::resolve(&raw_input, &context).value;

    let node_instance = engine
        .store
        .create_node_instance(NodeInstance {
            id: 0,
            workflow_instance_id: instance.id,
            node_id: node.node_id.clone(),
            parent_node_instance_id: None,
            node_type: node.node_type,
            status: NodeStatus::Running,
            input_data: resolved_input.clone(),
            output_data: None,
            error_message: None,
            retry_count: 0,
            started_at: Some(Utc::now()),
            completed_at: None,
        })
        .await?;

    engine
        .events
        .emit(Event::new(EventType::NodeStarted, Value::Null).for_instance(instance.id).for_node(node_instance.id));

    let retry_policy = RetryPolicy::exponential().with_max_attempts(node.max_retries + 1);
    let timeout = node
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_NODE_TIMEOUT);

    let mut attempt = 1u32;
    let outcome = loop {
        let attempt_result = run_node_kind(engine, instance, &node_instance, node, &resolved_input, timeout, cancel.clone()).await;
        match attempt_result {
            Ok(output) => break Ok(output),
            Err(err) if err.should_retry() && attempt <= node.max_retries => {
                let delay = retry_policy.delay_for_attempt(attempt + 1);
                warn!(node_id = %node.node_id, attempt, error = %err, "node failed, retrying");
                engine.store.increment_node_retry_count(node_instance.id).await?;
                log_execution(
                    engine,
                    instance.id,
                    Some(node_instance.id),
                    LogLevel::Warn,
                    format!("node {} failed on attempt {attempt}, retrying", node.node_id),
                    Some(serde_json::json!({"error": err.to_string(), "attempt": attempt})),
                )
                .await;
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok(output) => {
            engine
                .store
                .update_node_instance(node_instance.id, NodeStatus::Completed, Some(output.clone()), None)
                .await?;
            merge_output(engine, instance.id, &node.node_id, &output).await?;
            log_execution(
                engine,
                instance.id,
                Some(node_instance.id),
                LogLevel::Info,
                format!("node {} completed", node.node_id),
                None,
            )
            .await;
            engine.events.emit(
                Event::new(EventType::NodeCompleted, Value::Null)
                    .for_instance(instance.id)
                    .for_node(node_instance.id),
            );
            Ok(())
        }
        Err(err) => {
            engine
                .store
                .update_node_instance(node_instance.id, NodeStatus::Failed, None, Some(err.to_string()))
                .await?;
            log_execution(
                engine,
                instance.id,
                Some(node_instance.id),
                LogLevel::Error,
                format!("node {} failed", node.node_id),
                Some(serde_json::json!({"error": err.to_string()})),
            )
            .await;
            engine.events.emit(
                Event::new(EventType::NodeFailed, Value::Null)
                    .for_instance(instance.id)
                    .for_node(node_instance.id),
            );
            match node.error_handling {
                ErrorHandling::Stop | ErrorHandling::Retry => {
                    engine
                        .store
                        .update_status(
                            instance.id,
                            WorkflowStatus::Failed,
                            Some(err.to_string()),
                            None,
                        )
                        .await
                        .ok();
                    Ok(())
                }
                ErrorHandling::Continue => {
                    info!(node_id = %node.node_id, "node failed, continuing per errorHandling=continue");
                    Ok(())
                }
            }
        }
    }
}

/// §7: append an observability-only record of an engine-boundary event.
/// Never consulted by the decision path — a store write failure here is
/// logged and swallowed rather than propagated.
async fn log_execution(
    engine: &Arc<WorkflowEngine>,
    instance_id: i64,
    node_instance_id: Option<i64>,
    level: LogLevel,
    message: impl Into<String>,
    data: Option<Value>,
) {
    let log = ExecutionLog {
        id: 0,
        workflow_instance_id: instance_id,
        node_instance_id,
        level,
        message: message.into(),
        data,
        timestamp: Utc::now(),
    };
    if let Err(e) = engine.store.append_log(log).await {
        warn!(error = %e, "failed to append execution log");
    }
}

async fn merge_output(
    engine: &Arc<WorkflowEngine>,
    instance_id: i64,
    node_id: &str,
    output: &Value,
) -> Result<(), EngineError> {
    let instance = engine.store.get_instance(instance_id).await?;
    let mut context = instance.context_data.clone();
    if !context.is_object() {
        context = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = &mut context {
        map.insert(node_id.to_string(), output.clone());
    }
    engine
        .store
        .update_context(instance_id, context, Some(node_id.to_string()), None)
        .await?;
    Ok(())
}

async fn run_node_kind(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node_instance: &NodeInstance,
    node: &NodeDefinition,
    resolved_input: &Value,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Value, ExecutorError> {
    match node.node_type {
        NodeType::Simple => run_simple(engine, instance, node_instance, node, resolved_input, timeout, cancel).await,
        NodeType::Parallel => run_parallel(engine, instance, node, timeout, cancel).await,
        NodeType::Loop => run_loop(engine, instance, node, resolved_input, timeout, cancel).await,
        NodeType::Subprocess => run_subprocess(engine, instance, node, resolved_input).await,
    }
}

async fn run_simple(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node_instance: &NodeInstance,
    node: &NodeDefinition,
    resolved_input: &Value,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Value, ExecutorError> {
    let name = node
        .executor
        .as_deref()
        .ok_or_else(|| ExecutorError::InvalidConfig(format!("node {} has no executor", node.node_id)))?;

    let ctx = ExecutionContext {
        workflow_instance: Arc::new(instance.clone()),
        node_instance: Arc::new(node_instance.clone()),
        node_definition: Arc::new(node.clone()),
        previous_output: None,
        config: resolved_input.clone(),
        progress: None,
        cancellation: cancel.clone(),
    };

    tokio::select! {
        result = engine.executors.execute(name, &ctx, resolved_input.clone()) => result,
        _ = tokio::time::sleep(timeout) => Err(ExecutorError::Timeout),
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
    }
}

/// Branches of a `parallel` node and iterations of a `loop` node are not
/// separately persisted — only the parent node gets a `NodeInstance` row
/// (created in `dispatch_node`). Executors invoked for a branch/iteration
/// still need *some* `ExecutionContext.node_instance`, so they get this
/// unpersisted stand-in scoped to the parent's workflow instance.
fn ephemeral_branch_node_instance(workflow_instance_id: i64, node: &NodeDefinition) -> NodeInstance {
    NodeInstance {
        id: 0,
        workflow_instance_id,
        node_id: node.node_id.clone(),
        parent_node_instance_id: None,
        node_type: node.node_type,
        status: NodeStatus::Running,
        input_data: Value::Null,
        output_data: None,
        error_message: None,
        retry_count: 0,
        started_at: Some(Utc::now()),
        completed_at: None,
    }
}

/// `parallel` node: each branch dispatched concurrently, bounded by
/// `maxConcurrency`, joined per `joinType` (§4.5 "Node executors").
async fn run_parallel(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node: &NodeDefinition,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Value, ExecutorError> {
    let join_type = node.join_type.unwrap_or(JoinType::All);
    let concurrency = node.max_concurrency.unwrap_or(node.branches.len().max(1));
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
    let branch_cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for branch in &node.branches {
        let engine = engine.clone();
        let instance = instance.clone();
        let branch = branch.clone();
        let semaphore = semaphore.clone();
        let parent_cancel = cancel.clone();
        let branch_cancel = branch_cancel.clone();
        let node_id = branch.node_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let resolved = template::resolve(
                &serde_json::to_value(&branch.input_data).unwrap_or(Value::Null),
                &instance.context_data,
            )
            .value;
            let combined = parent_cancel.child_token();
            let branch_node_instance = ephemeral_branch_node_instance(instance.id, &branch);
            tokio::select! {
                result = run_simple(&engine, &instance, &branch_node_instance, &branch, &resolved, timeout, combined) => Some(result),
                _ = branch_cancel.cancelled() => None,
            }
        });
        handles.push((node_id, handle));
    }

    // Completion order, not declaration order: a `JoinType::Any` node must
    // resolve as soon as the fastest branch succeeds, regardless of where
    // that branch appears in `node.branches`.
    let mut pending: futures::stream::FuturesUnordered<_> = handles
        .into_iter()
        .map(|(node_id, handle)| async move { (node_id, handle.await) })
        .collect();

    let mut outputs = serde_json::Map::new();
    let mut any_success = false;
    let mut first_error = None;
    while let Some((node_id, outcome)) = pending.next().await {
        match outcome {
            Ok(Some(Ok(value))) => {
                outputs.insert(node_id, value);
                any_success = true;
                if join_type == JoinType::Any {
                    branch_cancel.cancel();
                    break;
                }
            }
            Ok(Some(Err(e))) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            _ => {}
        }
    }

    match join_type {
        JoinType::Any => {
            if any_success {
                Ok(Value::Object(outputs))
            } else {
                Err(first_error.unwrap_or(ExecutorError::failed("all parallel branches failed")))
            }
        }
        JoinType::All | JoinType::None => {
            if let Some(e) = first_error {
                Err(e)
            } else {
                Ok(Value::Object(outputs))
            }
        }
    }
}

/// `loop` node: fixed `loopCount` or dynamic `sourceExpression` array,
/// iterations dispatched bounded by `maxConcurrency` (§4.5 "Node executors").
async fn run_loop(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node: &NodeDefinition,
    resolved_input: &Value,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Value, ExecutorError> {
    let body = node
        .loop_body
        .as_deref()
        .ok_or_else(|| ExecutorError::InvalidConfig(format!("loop node {} has no body", node.node_id)))?;

    let items: Vec<Value> = if let Some(expr) = &node.source_expression {
        let resolved = template::resolve(&Value::String(format!("${{{expr}}}")), &instance.context_data).value;
        match resolved {
            Value::Array(items) => items,
            other => vec![other],
        }
    } else {
        let count = node.loop_count.unwrap_or(0);
        (0..count).map(|i| serde_json::json!(i)).collect()
    };

    let concurrency = node.max_concurrency.unwrap_or(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let engine = engine.clone();
        let instance = instance.clone();
        let body = body.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let mut iter_input = resolved_input.clone();
        if let Value::Object(map) = &mut iter_input {
            map.insert("item".to_string(), item);
            map.insert("index".to_string(), serde_json::json!(index));
        }
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let iter_node_instance = ephemeral_branch_node_instance(instance.id, &body);
            Some(run_simple(&engine, &instance, &iter_node_instance, &body, &iter_input, timeout, cancel).await)
        }));
    }

    let mut outputs = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Some(Ok(value))) => outputs.push(value),
            Ok(Some(Err(e))) => match body.error_handling {
                ErrorHandling::Continue => outputs.push(Value::Null),
                _ => return Err(e),
            },
            _ => {}
        }
    }
    Ok(Value::Array(outputs))
}

/// `subprocess` node: creates a child [`WorkflowInstance`] and, if
/// `waitForCompletion`, polls until it reaches a terminal status (§4.5).
async fn run_subprocess(
    engine: &Arc<WorkflowEngine>,
    instance: &WorkflowInstance,
    node: &NodeDefinition,
    resolved_input: &Value,
) -> Result<Value, ExecutorError> {
    let spec = node
        .subprocess
        .as_ref()
        .ok_or_else(|| ExecutorError::InvalidConfig(format!("subprocess node {} has no spec", node.node_id)))?;

    let definition = if let Some(version) = spec.workflow_definition_version {
        engine
            .store
            .get_definition_by_name_version(&spec.workflow_definition_name, version)
            .await
    } else {
        engine
            .store
            .list_definitions(Some(&spec.workflow_definition_name))
            .await
            .and_then(|mut defs| {
                defs.sort_by_key(|d| d.version);
                defs.pop().ok_or_else(|| {
                    crate::store::StoreError::DefinitionNotFound(spec.workflow_definition_name.clone())
                })
            })
    }
    .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;

    let mut child_input = serde_json::Map::new();
    if let Value::Object(resolved) = resolved_input {
        for (source, target) in &spec.input_mapping {
            if let Some(v) = resolved.get(source) {
                child_input.insert(target.clone(), v.clone());
            }
        }
    }

    let child = engine
        .store
        .create_instance(NewInstance {
            workflow_definition_id: definition.id,
            name: format!("{}/{}", instance.name, node.node_id),
            external_id: None,
            input_data: Value::Object(child_input),
            context_data: Value::Null,
            business_key: None,
            mutex_key: None,
            priority: instance.priority,
            max_retries: 0,
            created_by: instance.created_by.clone(),
        })
        .await
        .map_err(|e| ExecutorError::Failed {
            message: e.to_string(),
            should_retry: e.is_retryable(),
        })?;

    engine.spawn_advancement(child.id);

    if !spec.wait_for_completion {
        return Ok(serde_json::json!({"childInstanceId": child.id}));
    }

    loop {
        let updated = engine
            .store
            .get_instance(child.id)
            .await
            .map_err(|e| ExecutorError::Failed {
                message: e.to_string(),
                should_retry: e.is_retryable(),
            })?;
        if updated.status.is_terminal() {
            let mut out = serde_json::Map::new();
            for (source, target) in &spec.output_mapping {
                if let Some(Value::Object(data)) = &updated.output_data {
                    if let Some(v) = data.get(source) {
                        out.insert(target.clone(), v.clone());
                    }
                }
            }
            return if updated.status == WorkflowStatus::Completed {
                Ok(Value::Object(out))
            } else {
                Err(ExecutorError::failed(format!(
                    "subprocess {} ended in {}",
                    child.id, updated.status
                )))
            };
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
