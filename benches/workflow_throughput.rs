//! Workflow throughput benchmark
//!
//! Tests the target scenario: thousands of parallel instances, each walking
//! a chain of sequential nodes end to end (the S1 happy-path shape, at load).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::runtime::Runtime;

use stratix_durable::bench::{BenchmarkMetrics, BenchmarkReport, ReportConfig};
use stratix_durable::executor::{AnyExecutor, ExecutionContext, ExecutorError, ExecutorRegistry};
use stratix_durable::model::{NodeDefinition, WorkflowDefinition};
use stratix_durable::store::{InMemoryWorkflowStore, NewInstance, WorkflowStore};
use stratix_durable::{EngineConfig, Event, EventBus, EventType, WorkflowEngine};

const EXECUTOR_NAME: &str = "throughput_step";

/// A single-step activity. Each workflow invokes it once per node in its
/// chain, so per-node latency is attributed to `execution`, while the
/// instance's total walk time is attributed to `end_to_end`.
struct StepExecutor {
    simulate_execution: bool,
    metrics: Arc<BenchmarkMetrics>,
}

#[async_trait]
impl AnyExecutor for StepExecutor {
    fn name(&self) -> &'static str {
        EXECUTOR_NAME
    }

    fn description(&self) -> &'static str {
        "synthetic sequential-chain step"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn validate_config(&self, _config: &Value) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn execute_json(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value, ExecutorError> {
        let exec_start = Instant::now();
        if self.simulate_execution {
            let duration = Duration::from_micros(1000 + rand::random::<u64>() % 9000);
            tokio::time::sleep(duration).await;
        }
        self.metrics.execution.record(exec_start.elapsed());
        Ok(serde_json::json!({ "ok": true }))
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn chained_definition(steps: u64) -> Vec<NodeDefinition> {
    let mut nodes = Vec::with_capacity(steps as usize);
    for i in 0..steps {
        let node = NodeDefinition::simple(format!("step-{i}"), EXECUTOR_NAME);
        let node = if i == 0 {
            node
        } else {
            node.with_depends_on([format!("step-{}", i - 1)])
        };
        nodes.push(node);
    }
    nodes
}

struct WorkflowScenario {
    store: Arc<dyn WorkflowStore>,
    engine: Arc<WorkflowEngine>,
    definition_id: i64,
    instance_count: u64,
    worker_count: usize,
    enqueue_times: Arc<parking_lot::Mutex<HashMap<i64, Instant>>>,
    completed: Arc<AtomicU64>,
}

impl WorkflowScenario {
    async fn new(
        instance_count: u64,
        steps_per_workflow: u64,
        worker_count: usize,
        simulate_execution: bool,
        metrics: &Arc<BenchmarkMetrics>,
    ) -> Self {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());

        let mut registry = ExecutorRegistry::new();
        registry
            .register(Arc::new(StepExecutor {
                simulate_execution,
                metrics: metrics.clone(),
            }))
            .unwrap();

        let events = Arc::new(EventBus::new(4096));
        let completed = Arc::new(AtomicU64::new(0));
        let enqueue_times = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let enqueue_times_for_events = enqueue_times.clone();
        let metrics_for_events = metrics.clone();
        let completed_for_events = completed.clone();
        events
            .subscribe(EventType::WorkflowCompleted, move |event: &Event| {
                if let Some(instance_id) = event.workflow_instance_id {
                    if let Some(enqueue_time) = enqueue_times_for_events.lock().remove(&instance_id) {
                        metrics_for_events.end_to_end.record(enqueue_time.elapsed());
                    }
                }
                metrics_for_events.tasks_completed.increment();
                completed_for_events.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        let config = EngineConfig::default().with_worker_pool_size(worker_count);
        let engine = Arc::new(WorkflowEngine::new(store.clone(), Arc::new(registry), events, config));

        let definition = store
            .create_definition(WorkflowDefinition {
                id: 0,
                name: "benchmark-chain".to_string(),
                version: 1,
                nodes: chained_definition(steps_per_workflow),
                inputs: vec![],
                outputs: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        Self {
            store,
            engine,
            definition_id: definition.id,
            instance_count,
            worker_count,
            enqueue_times,
            completed,
        }
    }

    async fn start_workflows(&self) {
        for i in 0..self.instance_count {
            let enqueue_time = Instant::now();
            let instance_id = self
                .store
                .create_instance(NewInstance {
                    workflow_definition_id: self.definition_id,
                    name: format!("instance-{i}"),
                    external_id: None,
                    input_data: serde_json::json!({}),
                    context_data: serde_json::json!({}),
                    business_key: None,
                    mutex_key: None,
                    priority: 0,
                    max_retries: 0,
                    created_by: Some("bench".to_string()),
                })
                .await
                .unwrap()
                .id;
            self.enqueue_times.lock().insert(instance_id, enqueue_time);
            self.engine.spawn_advancement(instance_id);
        }
    }

    async fn run(&self, pb: &ProgressBar) -> (u64, Duration) {
        let start = Instant::now();
        while self.completed.load(Ordering::Relaxed) < self.instance_count {
            pb.set_position(self.completed.load(Ordering::Relaxed));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pb.set_position(self.instance_count);
        (self.completed.load(Ordering::Relaxed), start.elapsed())
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Run a workflow throughput test
async fn run_workflow_test(
    name: &str,
    workflow_count: u64,
    steps_per_workflow: u64,
    worker_count: usize,
    simulate_execution: bool,
) -> Arc<BenchmarkMetrics> {
    let metrics = Arc::new(BenchmarkMetrics::new(name));
    let total_tasks = workflow_count * steps_per_workflow;

    println!("\nRunning: {}", name);
    println!(
        "   Workflows: {}, Steps/workflow: {}, Workers: {}",
        workflow_count, steps_per_workflow, worker_count
    );
    println!("   Total tasks: {}", total_tasks);

    let scenario = WorkflowScenario::new(workflow_count, steps_per_workflow, worker_count, simulate_execution, &metrics).await;

    let pb = ProgressBar::new(workflow_count);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("=>-"),
    );

    let metrics_clone = metrics.clone();
    let sampling_handle = tokio::spawn(async move {
        loop {
            metrics_clone.sample();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    scenario.start_workflows().await;
    let (completed_workflows, elapsed) = scenario.run(&pb).await;

    sampling_handle.abort();
    metrics.sample();
    pb.finish_and_clear();

    let e2e = metrics.end_to_end.summary();
    let exec = metrics.execution.summary();

    println!(
        "Completed {} workflows in {:.2}s ({} workers)",
        completed_workflows,
        elapsed.as_secs_f64(),
        scenario.worker_count()
    );
    println!(
        "   Workflow throughput: {:.1} workflows/sec    (end-to-end workflow completion)",
        completed_workflows as f64 / elapsed.as_secs_f64()
    );
    println!(
        "   Per-step execution:  P50={:.2}ms P99={:.2}ms",
        exec.p50.as_secs_f64() * 1000.0,
        exec.p99.as_secs_f64() * 1000.0
    );
    println!(
        "   End-to-End (chain):  P50={:.2}ms P99={:.2}ms    (full instance walk latency)",
        e2e.p50.as_secs_f64() * 1000.0,
        e2e.p99.as_secs_f64() * 1000.0
    );

    metrics
}

fn main() {
    let rt = Runtime::new().unwrap();

    println!("================================================================");
    println!("         Workflow Throughput Benchmark");
    println!("================================================================");
    println!("\nThis benchmark simulates the target scenario:");
    println!("  - Thousands of parallel instances");
    println!("  - Each instance walks a chain of sequential nodes");
    println!("  - A bounded worker pool dispatches node executors as deps clear");

    let small = rt.block_on(run_workflow_test("small_10wf_10steps", 10, 10, 10, false));
    let medium = rt.block_on(run_workflow_test("medium_100wf_50steps", 100, 50, 50, false));
    let target = rt.block_on(run_workflow_test("target_1000wf_100steps", 1000, 100, 100, false));
    let target_exec = rt.block_on(run_workflow_test("target_1000wf_100steps_exec", 1000, 100, 100, true));
    let high_parallel = rt.block_on(run_workflow_test("parallel_5000wf_20steps", 5000, 20, 200, false));
    let deep = rt.block_on(run_workflow_test("deep_100wf_500steps", 100, 500, 50, false));

    println!("\n================================================================");
    println!("                    Summary");
    println!("================================================================");
    println!("\nMetric definitions:");
    println!("  WF/sec:  Workflow completion rate (end-to-end)");
    println!("  P50/P99: End-to-end chain-walk latency percentiles");

    println!("\n{:<30} {:>14} {:>12} {:>12}", "Scenario", "WF/sec", "P50 E2E", "P99 E2E");
    println!("{:-<30} {:->14} {:->12} {:->12}", "", "", "", "");

    for (name, m, wf_count) in [
        ("small_10wf_10steps", &small, 10u64),
        ("medium_100wf_50steps", &medium, 100),
        ("target_1000wf_100steps", &target, 1000),
        ("target_1000wf_100steps_exec", &target_exec, 1000),
        ("parallel_5000wf_20steps", &high_parallel, 5000),
        ("deep_100wf_500steps", &deep, 100),
    ] {
        let wf_throughput = wf_count as f64 / m.elapsed().as_secs_f64();
        let e2e = m.end_to_end.summary();
        println!(
            "{:<30} {:>12.1}/s {:>10.2}ms {:>10.2}ms",
            name,
            wf_throughput,
            e2e.p50.as_secs_f64() * 1000.0,
            e2e.p99.as_secs_f64() * 1000.0
        );
    }

    println!("\nGenerating HTML reports...");

    let report_config = ReportConfig {
        output_dir: "target/benchmark-reports".to_string(),
        title: "Workflow Throughput Benchmark".to_string(),
        include_raw_data: false,
    };

    for (name, m) in [
        ("target_1000wf_100steps", &target),
        ("target_1000wf_100steps_exec", &target_exec),
        ("parallel_5000wf_20steps", &high_parallel),
    ] {
        let report = BenchmarkReport::new(report_config.clone());
        match report.generate(m) {
            Ok(path) => println!("   {}: {}", name, path),
            Err(e) => println!("   {}: {}", name, e),
        }
    }

    println!("\n================================================================");
}
