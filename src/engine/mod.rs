//! Workflow Engine: the status-based state machine that advances instances
//! node by node (§4.5).
//!
//! Grounded on the teacher's `WorkflowExecutor` shape (bounded worker pool,
//! `tokio::sync::Semaphore`-gated concurrency, `RetryPolicy`/timeout reuse)
//! generalized from single-activity dispatch to graph traversal.

mod dispatch;
mod heartbeat;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::event_bus::{Event, EventBus, EventType};
use crate::executor::ExecutorRegistry;
use crate::lock::DistributedLockManager;
use crate::model::{NodeStatus, WorkflowStatus};
use crate::store::{NewInstance, WorkflowStore};

pub use dispatch::advance_once;

/// Handle shared by every worker task: store, locks, executors, event bus,
/// and this engine replica's identity.
pub struct WorkflowEngine {
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) locks: Arc<DistributedLockManager>,
    pub(crate) executors: Arc<ExecutorRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) config: EngineConfig,
    pub(crate) engine_id: Uuid,
    semaphore: Arc<Semaphore>,
    cancellations: dashmap::DashMap<i64, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executors: Arc<ExecutorRegistry>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let engine_id = Uuid::now_v7();
        let locks = Arc::new(DistributedLockManager::new(store.clone(), engine_id.to_string()));
        let worker_pool_size = config.worker_pool_size;
        Self {
            store,
            locks,
            executors,
            events,
            config,
            engine_id,
            semaphore: Arc::new(Semaphore::new(worker_pool_size)),
            cancellations: dashmap::DashMap::new(),
        }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    /// Create a new instance of `definition_id` and spawn it for advancement.
    #[instrument(skip(self, new))]
    pub async fn start_instance(self: &Arc<Self>, new: NewInstance) -> Result<i64, crate::error::EngineError> {
        let instance = self.store.create_instance(new).await?;
        self.spawn_advancement(instance.id);
        Ok(instance.id)
    }

    /// Request cancellation of a running instance. Races the owning
    /// worker's next status read (§5 "Cancellation semantics").
    #[instrument(skip(self))]
    pub async fn cancel_instance(&self, instance_id: i64) -> Result<(), crate::error::EngineError> {
        self.store
            .update_status(instance_id, WorkflowStatus::Cancelled, None, None)
            .await?;
        if let Some(token) = self.cancellations.get(&instance_id) {
            token.cancel();
        }
        self.events.emit(
            Event::new(EventType::WorkflowCancelled, Value::Null).for_instance(instance_id),
        );
        Ok(())
    }

    /// Spawn a bounded worker task that drives `instance_id` through the
    /// advancement loop to a terminal state (§4.5).
    pub fn spawn_advancement(self: &Arc<Self>, instance_id: i64) {
        let engine = self.clone();
        tokio::spawn(async move {
            let permit = match engine.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if let Err(e) = engine.run_instance(instance_id).await {
                warn!(%instance_id, error = %e, "instance advancement failed");
            }
            drop(permit);
        });
    }

    /// The full advancement loop, steps 1-10 of §4.5.
    #[instrument(skip(self))]
    async fn run_instance(self: &Arc<Self>, instance_id: i64) -> Result<(), crate::error::EngineError> {
        let lock_key = DistributedLockManager::instance_key(instance_id);
        let guard = self
            .locks
            .acquire(&lock_key, crate::model::LockType::Workflow, self.config.instance_lock_ttl)
            .await?;
        let Some(guard) = guard else {
            info!(%instance_id, "instance already owned by another engine, skipping");
            return Ok(());
        };

        let token = CancellationToken::new();
        self.cancellations.insert(instance_id, token.clone());

        let instance = self.store.get_instance(instance_id).await?;
        if instance.status != WorkflowStatus::Running {
            self.store
                .update_status(instance_id, WorkflowStatus::Running, None, None)
                .await?;
        }
        self.store
            .acquire_instance_ownership(instance_id, self.engine_id, Utc::now())
            .await?;
        self.events
            .emit(Event::new(EventType::WorkflowStarted, Value::Null).for_instance(instance_id));

        let heartbeat_handle = heartbeat::spawn(
            self.store.clone(),
            self.locks.clone(),
            instance_id,
            lock_key.clone(),
            self.config.heartbeat_interval,
            self.config.instance_lock_ttl,
            token.clone(),
        );

        let outcome = dispatch::run_to_completion(self, instance_id, token.clone()).await;

        heartbeat_handle.abort();
        self.cancellations.remove(&instance_id);
        guard.release().await.ok();

        match &outcome {
            Ok(WorkflowStatus::Completed) => {
                self.events.emit(
                    Event::new(EventType::WorkflowCompleted, Value::Null).for_instance(instance_id),
                );
            }
            Ok(WorkflowStatus::Failed) => {
                self.events
                    .emit(Event::new(EventType::WorkflowFailed, Value::Null).for_instance(instance_id));
            }
            _ => {}
        }
        outcome.map(|_| ())
    }
}

/// Snapshot used by [`dispatch`] to decide which nodes are runnable (§4.5 step 4).
pub(crate) struct RunState {
    pub node_statuses: HashMap<String, NodeStatus>,
}

impl RunState {
    pub fn dependencies_satisfied(&self, depends_on: &[String]) -> bool {
        depends_on.iter().all(|dep| {
            self.node_statuses
                .get(dep)
                .is_some_and(|s| s.satisfies_dependency())
        })
    }
}

pub(crate) const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::sleep;

    use crate::executor::{AnyExecutor, ExecutionContext, ExecutorError, ExecutorRegistry};
    use crate::model::{JoinType, NodeDefinition, NodeStatus, NodeType, WorkflowDefinition};
    use crate::store::{InMemoryWorkflowStore, NewInstance, WorkflowStore};

    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl AnyExecutor for EchoExecutor {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "returns {out: config.msg}"
        }
        fn version(&self) -> &'static str {
            "1"
        }
        fn validate_config(&self, _config: &Value) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn execute_json(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, ExecutorError> {
            Ok(json!({ "out": input.get("msg").cloned().unwrap_or(Value::Null) }))
        }
        async fn health_check(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    /// Fails `fail_times` attempts with a retryable error, then succeeds.
    struct FlakyExecutor {
        fail_times: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl AnyExecutor for FlakyExecutor {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn description(&self) -> &'static str {
            "fails a fixed number of times before succeeding"
        }
        fn version(&self) -> &'static str {
            "1"
        }
        fn validate_config(&self, _config: &Value) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn execute_json(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value, ExecutorError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                Err(ExecutorError::failed("transient failure"))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
        async fn health_check(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    /// Sleeps for `input.delay_ms` (default 1000ms), then succeeds.
    struct SleepExecutor;

    #[async_trait]
    impl AnyExecutor for SleepExecutor {
        fn name(&self) -> &'static str {
            "sleeper"
        }
        fn description(&self) -> &'static str {
            "sleeps for input.delay_ms then succeeds"
        }
        fn version(&self) -> &'static str {
            "1"
        }
        fn validate_config(&self, _config: &Value) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn execute_json(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, ExecutorError> {
            let delay_ms = input.get("delay_ms").and_then(Value::as_u64).unwrap_or(1000);
            sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!({ "slept_ms": delay_ms }))
        }
        async fn health_check(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    async fn build_engine(registry: ExecutorRegistry) -> (Arc<WorkflowEngine>, Arc<dyn WorkflowStore>) {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let events = Arc::new(EventBus::new(256));
        let config = EngineConfig::default().with_worker_pool_size(4);
        let engine = Arc::new(WorkflowEngine::new(store.clone(), Arc::new(registry), events, config));
        (engine, store)
    }

    async fn await_terminal(store: &Arc<dyn WorkflowStore>, instance_id: i64) -> crate::model::WorkflowInstance {
        // Generous bound: the exponential retry backoff in `dispatch_node`
        // means S2-shaped tests can legitimately take several seconds.
        for _ in 0..1000 {
            let instance = store.get_instance(instance_id).await.unwrap();
            if instance.status.is_terminal() {
                return instance;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("instance {instance_id} did not reach a terminal status in time");
    }

    /// S1: a two-node sequential chain completes, and each node's output is
    /// folded into the instance's context under its node id.
    #[tokio::test]
    async fn s1_simple_happy_path_completes_with_chained_context() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor)).unwrap();
        let (engine, store) = build_engine(registry).await;

        let definition = store
            .create_definition(WorkflowDefinition {
                id: 0,
                name: "s1-chain".into(),
                version: 1,
                nodes: vec![
                    NodeDefinition::simple("a", "echo").with_input("msg", json!("${greeting}")),
                    NodeDefinition::simple("b", "echo")
                        .with_depends_on(["a"])
                        .with_input("msg", json!("${a.out}")),
                ],
                inputs: vec![],
                outputs: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let instance_id = engine
            .start_instance(NewInstance {
                workflow_definition_id: definition.id,
                name: "s1".into(),
                external_id: None,
                input_data: json!({ "greeting": "hi" }),
                context_data: json!({}),
                business_key: None,
                mutex_key: None,
                priority: 0,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let instance = await_terminal(&store, instance_id).await;
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.context_data["a"]["out"], json!("hi"));
        assert_eq!(instance.context_data["b"]["out"], json!("hi"));

        let nodes = store.list_node_instances(instance_id).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.status == NodeStatus::Completed));
    }

    /// S2: a node that fails twice with a retryable error still completes,
    /// and its final retry count is recorded.
    #[tokio::test]
    async fn s2_retries_a_retryable_failure_until_it_succeeds() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(Arc::new(FlakyExecutor {
                fail_times: 2,
                attempts: AtomicU32::new(0),
            }))
            .unwrap();
        let (engine, store) = build_engine(registry).await;

        let definition = store
            .create_definition(WorkflowDefinition {
                id: 0,
                name: "s2-retry".into(),
                version: 1,
                nodes: vec![NodeDefinition::simple("a", "flaky").with_max_retries(3)],
                inputs: vec![],
                outputs: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let instance_id = engine
            .start_instance(NewInstance {
                workflow_definition_id: definition.id,
                name: "s2".into(),
                external_id: None,
                input_data: json!({}),
                context_data: json!({}),
                business_key: None,
                mutex_key: None,
                priority: 0,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let instance = await_terminal(&store, instance_id).await;
        assert_eq!(instance.status, WorkflowStatus::Completed);

        let nodes = store.list_node_instances(instance_id).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].retry_count, 2);
        assert_eq!(nodes[0].status, NodeStatus::Completed);

        // §7: two retry-warning entries plus the final completion entry.
        let logs = store
            .list_logs(instance_id, crate::store::Pagination::default())
            .await
            .unwrap();
        assert_eq!(logs.items.len(), 3);
    }

    /// S3: cancelling mid-flight short-circuits a long-sleeping node and the
    /// instance lands in `Cancelled`, not `Failed`.
    #[tokio::test]
    async fn s3_cancel_mid_flight_lands_in_cancelled() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(SleepExecutor)).unwrap();
        let (engine, store) = build_engine(registry).await;

        let definition = store
            .create_definition(WorkflowDefinition {
                id: 0,
                name: "s3-cancel".into(),
                version: 1,
                nodes: vec![NodeDefinition::simple("a", "sleeper").with_input("delay_ms", json!(5000))],
                inputs: vec![],
                outputs: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let instance_id = engine
            .start_instance(NewInstance {
                workflow_definition_id: definition.id,
                name: "s3".into(),
                external_id: None,
                input_data: json!({}),
                context_data: json!({}),
                business_key: None,
                mutex_key: None,
                priority: 0,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        engine.cancel_instance(instance_id).await.unwrap();

        let instance = await_terminal(&store, instance_id).await;
        assert_eq!(instance.status, WorkflowStatus::Cancelled);
    }

    /// S6: a `parallel` node with `joinType: any` completes as soon as its
    /// fastest branch succeeds, without waiting on its slower siblings.
    #[tokio::test]
    async fn s6_parallel_any_join_does_not_wait_for_slow_branches() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(SleepExecutor)).unwrap();
        let (engine, store) = build_engine(registry).await;

        let parallel_node = NodeDefinition {
            node_type: NodeType::Parallel,
            executor: None,
            // Slow branches declared *before* the fast one: completion order
            // must drive the `any` join, not declaration order.
            branches: vec![
                NodeDefinition::simple("slow-1", "sleeper").with_input("delay_ms", json!(5000)),
                NodeDefinition::simple("slow-2", "sleeper").with_input("delay_ms", json!(5000)),
                NodeDefinition::simple("fast", "sleeper").with_input("delay_ms", json!(5)),
            ],
            join_type: Some(JoinType::Any),
            max_concurrency: Some(3),
            ..NodeDefinition::simple("fan-out", "unused")
        };

        let definition = store
            .create_definition(WorkflowDefinition {
                id: 0,
                name: "s6-parallel".into(),
                version: 1,
                nodes: vec![parallel_node],
                inputs: vec![],
                outputs: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let instance_id = engine
            .start_instance(NewInstance {
                workflow_definition_id: definition.id,
                name: "s6".into(),
                external_id: None,
                input_data: json!({}),
                context_data: json!({}),
                business_key: None,
                mutex_key: None,
                priority: 0,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let start = std::time::Instant::now();
        let instance = await_terminal(&store, instance_id).await;
        assert_eq!(instance.status, WorkflowStatus::Completed);
        // The slow branches sleep 5s; an `any` join must not wait for them.
        assert!(start.elapsed() < Duration::from_millis(500));

        let nodes = store.list_node_instances(instance_id).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].status, NodeStatus::Completed);
    }
}
