//! The task scheduler.
//!
//! `submit` mints a task id and enqueues; a single consumer worker pops
//! the head, routes it by kind (agents for code/research/documentation/
//! analysis, the workflow engine for workflow tasks), and records a
//! terminal `TaskRecord`. Cancellation succeeds only while a task is
//! still queued.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_config::SchedulerConfig;
use conductor_contracts::{
    mint_task_id, AgentError, AgentInput, AgentResult, EventKind, TaskKind, TaskRecord,
    TaskRequest, TaskStatus, TriggerKind,
};
use conductor_events::EventBus;
use conductor_orchestration::WorkflowEngine;
use conductor_runtime::AgentRegistry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::queue::{QueuedTask, TaskQueue};

struct HistoryCore {
    order: VecDeque<String>,
    records: HashMap<String, TaskRecord>,
    bound: usize,
}

impl HistoryCore {
    fn insert(&mut self, record: TaskRecord) {
        if self.order.len() == self.bound {
            if let Some(evicted) = self.order.pop_front() {
                self.records.remove(&evicted);
            }
        }
        self.order.push_back(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }
}

/// Sliding window of task outcomes for the health aggregator.
struct OutcomeWindow {
    samples: VecDeque<(DateTime<Utc>, bool)>,
}

impl OutcomeWindow {
    fn window() -> chrono::Duration {
        chrono::Duration::hours(1)
    }

    fn record(&mut self, success: bool) {
        self.samples.push_back((Utc::now(), success));
        let cutoff = Utc::now() - Self::window();
        while let Some((at, _)) = self.samples.front() {
            if *at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> f64 {
        let cutoff = Utc::now() - Self::window();
        let mut total = 0usize;
        let mut failed = 0usize;
        for (at, success) in &self.samples {
            if *at >= cutoff {
                total += 1;
                if !success {
                    failed += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

/// Cumulative scheduler counters and current pressure.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queue_bound: usize,
    pub error_rate_last_hour: f64,
}

pub struct TaskScheduler {
    queue: Arc<TaskQueue>,
    bus: EventBus,
    registry: Arc<AgentRegistry>,
    workflows: Arc<WorkflowEngine>,
    routes: RwLock<HashMap<TaskKind, String>>,
    active: DashMap<String, DateTime<Utc>>,
    history: Mutex<HistoryCore>,
    outcomes: Mutex<OutcomeWindow>,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    cancelled_total: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    drain_grace: Duration,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        bus: EventBus,
        registry: Arc<AgentRegistry>,
        workflows: Arc<WorkflowEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(TaskQueue::new(config.queue_bound)),
            bus,
            registry,
            workflows,
            routes: RwLock::new(config.routes),
            active: DashMap::new(),
            history: Mutex::new(HistoryCore {
                order: VecDeque::new(),
                records: HashMap::new(),
                bound: config.history_bound.max(1),
            }),
            outcomes: Mutex::new(OutcomeWindow {
                samples: VecDeque::new(),
            }),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            cancelled_total: AtomicU64::new(0),
            worker: Mutex::new(None),
            drain_grace: Duration::from_millis(config.drain_grace_ms),
        })
    }

    /// Spawn the single consumer worker. Idempotent.
    pub fn start(self: Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let scheduler = Arc::clone(&self);
        *worker = Some(tokio::spawn(async move {
            info!("task scheduler worker started");
            while let Some(task) = scheduler.queue.pop_wait().await {
                scheduler.process(task).await;
            }
            info!("task scheduler worker drained and stopped");
        }));
    }

    /// Accept a submission: mint an id, queue it, publish
    /// `taskSubmitted`.
    pub fn submit(&self, request: TaskRequest) -> Result<String, AgentError> {
        let id = mint_task_id();
        let priority = request.priority.unwrap_or_default();
        let queued = QueuedTask {
            id: id.clone(),
            priority,
            submitted_at: Utc::now(),
            request,
        };
        let kind = queued.request.kind;
        self.queue.push(queued)?;
        self.bus.emit(
            EventKind::TaskSubmitted,
            &id,
            json!({
                "taskId": id,
                "kind": kind,
                "priority": priority,
                "queueDepth": self.queue.depth(),
            }),
        );
        Ok(id)
    }

    /// Cancel a task that is still queued. Active tasks are not
    /// cancellable at this layer.
    pub fn cancel(&self, id: &str) -> bool {
        match self.queue.cancel(id) {
            Some(cancelled) => {
                let now = Utc::now();
                self.history.lock().insert(TaskRecord {
                    id: id.to_string(),
                    status: TaskStatus::Cancelled,
                    result: None,
                    error: None,
                    started_at: cancelled.submitted_at,
                    finished_at: now,
                    duration_ms: 0,
                });
                self.cancelled_total.fetch_add(1, Ordering::Relaxed);
                self.bus
                    .emit(EventKind::TaskCancelled, id, json!({ "taskId": id }));
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &str) -> TaskStatus {
        if self.queue.contains(id) {
            return TaskStatus::Queued;
        }
        if self.active.contains_key(id) {
            return TaskStatus::Active;
        }
        self.history
            .lock()
            .records
            .get(id)
            .map(|record| record.status)
            .unwrap_or(TaskStatus::NotFound)
    }

    pub fn result(&self, id: &str) -> Option<TaskRecord> {
        self.history.lock().records.get(id).cloned()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn queue_bound(&self) -> usize {
        self.queue.bound()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Task error rate over the sliding one-hour window.
    pub fn error_rate_last_hour(&self) -> f64 {
        self.outcomes.lock().error_rate()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.depth(),
            active: self.active.len(),
            completed: self.completed_total.load(Ordering::Relaxed),
            failed: self.failed_total.load(Ordering::Relaxed),
            cancelled: self.cancelled_total.load(Ordering::Relaxed),
            queue_bound: self.queue.bound(),
            error_rate_last_hour: self.error_rate_last_hour(),
        }
    }

    /// Hot-reload the queue bound. Future submissions only.
    pub fn set_queue_bound(&self, bound: usize) {
        self.queue.set_bound(bound);
    }

    /// Hot-reload the kind -> agent route table.
    pub fn set_routes(&self, routes: HashMap<TaskKind, String>) {
        *self.routes.write() = routes;
    }

    /// Stop intake, then wait up to the grace deadline for the worker to
    /// drain what is already queued or active.
    pub async fn shutdown(&self) {
        self.queue.close();
        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.drain_grace, &mut handle)
                .await
                .is_err()
            {
                warn!("drain grace deadline reached, aborting scheduler worker");
                handle.abort();
            }
        }
    }

    async fn process(&self, task: QueuedTask) {
        let id = task.id.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        self.active.insert(id.clone(), started_at);
        self.bus.emit(
            EventKind::TaskStarted,
            &id,
            json!({
                "taskId": id,
                "kind": task.request.kind,
                "queuedForMs": (started_at - task.submitted_at).num_milliseconds(),
            }),
        );

        let expired = task
            .request
            .deadline
            .map(|deadline| deadline <= Utc::now())
            .unwrap_or(false);
        let outcome: AgentResult = if expired {
            Err(AgentError::timeout(
                "task deadline expired before dispatch",
            ))
        } else {
            self.dispatch(&task).await
        };

        let finished_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;
        let record = match outcome {
            Ok(output) => TaskRecord {
                id: id.clone(),
                status: TaskStatus::Completed,
                result: Some(output),
                error: None,
                started_at,
                finished_at,
                duration_ms,
            },
            Err(err) => TaskRecord {
                id: id.clone(),
                status: TaskStatus::Failed,
                result: None,
                error: Some(err),
                started_at,
                finished_at,
                duration_ms,
            },
        };

        let succeeded = record.status == TaskStatus::Completed;
        if succeeded {
            self.completed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.active.remove(&id);
        self.outcomes.lock().record(succeeded);
        let event_payload = match (&record.result, &record.error) {
            (Some(_), _) => json!({ "taskId": id, "durationMs": duration_ms }),
            (_, Some(err)) => json!({
                "taskId": id,
                "durationMs": duration_ms,
                "code": err.code,
                "category": err.category.as_str(),
            }),
            _ => json!({ "taskId": id }),
        };
        self.history.lock().insert(record);
        self.bus.emit(
            if succeeded {
                EventKind::TaskCompleted
            } else {
                EventKind::TaskFailed
            },
            &id,
            event_payload,
        );
    }

    /// Route one task by kind.
    async fn dispatch(&self, task: &QueuedTask) -> AgentResult {
        match task.request.kind {
            TaskKind::Workflow => {
                let workflow_id = task
                    .request
                    .input
                    .get("workflowId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AgentError::validation(
                            "missing_workflow_id",
                            "workflow tasks require a workflowId input field",
                        )
                    })?;
                let workflow_input: Map<String, Value> = match task.request.input.get("input") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => {
                        let mut map = task.request.input.clone();
                        map.remove("workflowId");
                        map
                    }
                };
                self.workflows
                    .execute(workflow_id, workflow_input, TriggerKind::Task)
                    .await
            }
            kind => {
                let agent_name = {
                    match self.routes.read().get(&kind) {
                        Some(name) => name.clone(),
                        None => {
                            return Err(AgentError::validation(
                                "no_route_for_kind",
                                format!("no agent route configured for {kind:?} tasks"),
                            ))
                        }
                    }
                };
                let mut input = AgentInput::new(task.request.input.clone());
                input.metadata = task.request.metadata.clone();
                self.registry.delegate(&agent_name, input).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_config::{EnvelopeConfig, WorkflowConfig};
    use conductor_contracts::{
        Agent, AgentOutput, ErrorCategory, ExecutionContext, TaskPriority, TaskType,
        WorkflowDefinition, WorkflowStep,
    };
    use conductor_events::EventCollector;
    use conductor_resilience::BreakerConfig;
    use conductor_runtime::ExecutionEnvelope;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records the order in which it is invoked.
    struct RecordingAgent {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Agent for RecordingAgent {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        async fn execute(&self, input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
            let marker = input
                .field("marker")
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();
            self.log.lock().push(marker.clone());
            if self.fail.load(Ordering::SeqCst) {
                Err(AgentError::execution("task_failed", "deliberate failure"))
            } else {
                Ok(AgentOutput::new(json!({ "handled": marker })))
            }
        }
    }

    struct Fixture {
        scheduler: Arc<TaskScheduler>,
        bus: EventBus,
        log: Arc<Mutex<Vec<String>>>,
        agent: Arc<RecordingAgent>,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new();
        let defaults = Arc::new(RwLock::new(EnvelopeConfig::default()));
        let envelope = ExecutionEnvelope::new(bus.clone(), defaults);
        let registry = Arc::new(AgentRegistry::new(
            bus.clone(),
            envelope,
            Arc::new(RwLock::new(BreakerConfig::default())),
            100,
        ));
        let log = Arc::new(Mutex::new(Vec::new()));
        let agent = Arc::new(RecordingAgent {
            name: "analysis-agent".into(),
            log: Arc::clone(&log),
            fail: AtomicBool::new(false),
        });
        registry.register_agent(Arc::clone(&agent) as Arc<dyn Agent>).unwrap();

        let workflows = Arc::new(WorkflowEngine::new(
            Arc::clone(&registry),
            bus.clone(),
            WorkflowConfig::default(),
        ));
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default(),
            bus.clone(),
            registry,
            workflows,
        );
        Fixture {
            scheduler,
            bus,
            log,
            agent,
        }
    }

    fn analysis_request(marker: &str, priority: TaskPriority) -> TaskRequest {
        let mut input = Map::new();
        input.insert("marker".into(), Value::from(marker));
        TaskRequest::new(TaskKind::Analysis, input).with_priority(priority)
    }

    #[tokio::test]
    async fn priority_fifo_dispatch_order() {
        use TaskPriority::{Critical, Low, Medium};
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);

        // submit before starting the worker so ordering is queue-driven
        f.scheduler.submit(analysis_request("low-1", Low)).unwrap();
        f.scheduler
            .submit(analysis_request("critical-2", Critical))
            .unwrap();
        f.scheduler
            .submit(analysis_request("medium-3", Medium))
            .unwrap();
        f.scheduler
            .submit(analysis_request("critical-4", Critical))
            .unwrap();
        f.scheduler.submit(analysis_request("low-5", Low)).unwrap();

        Arc::clone(&f.scheduler).start();
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 5, Duration::from_secs(5))
                .await
        );
        assert_eq!(
            &*f.log.lock(),
            &["critical-2", "critical-4", "medium-3", "low-1", "low-5"]
        );
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn completed_task_has_record_and_events() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);
        Arc::clone(&f.scheduler).start();

        let id = f
            .scheduler
            .submit(analysis_request("solo", TaskPriority::High))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 1, Duration::from_secs(5))
                .await
        );

        assert_eq!(f.scheduler.status(&id), TaskStatus::Completed);
        let record = f.scheduler.result(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.unwrap().data["handled"], "solo");
        assert_eq!(collector.count(EventKind::TaskSubmitted), 1);
        assert_eq!(collector.count(EventKind::TaskStarted), 1);
        assert!(id.starts_with("task_"));
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn failed_task_is_recorded_and_worker_survives() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);
        f.agent.fail.store(true, Ordering::SeqCst);
        Arc::clone(&f.scheduler).start();

        let id = f
            .scheduler
            .submit(analysis_request("boom", TaskPriority::Medium))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskFailed, 1, Duration::from_secs(5))
                .await
        );
        assert_eq!(f.scheduler.status(&id), TaskStatus::Failed);
        let record = f.scheduler.result(&id).unwrap();
        assert_eq!(record.error.unwrap().code, "task_failed");
        assert!(f.scheduler.error_rate_last_hour() > 0.99);

        // the worker keeps serving after a failure
        f.agent.fail.store(false, Ordering::SeqCst);
        f.scheduler
            .submit(analysis_request("after", TaskPriority::Medium))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 1, Duration::from_secs(5))
                .await
        );
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_succeeds_only_while_queued() {
        let f = fixture();
        // worker not started: everything stays queued
        let id = f
            .scheduler
            .submit(analysis_request("parked", TaskPriority::Low))
            .unwrap();
        assert_eq!(f.scheduler.status(&id), TaskStatus::Queued);
        assert!(f.scheduler.cancel(&id));
        assert_eq!(f.scheduler.status(&id), TaskStatus::Cancelled);
        // a second cancel finds nothing
        assert!(!f.scheduler.cancel(&id));
    }

    #[tokio::test]
    async fn stats_track_terminal_counts() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);
        Arc::clone(&f.scheduler).start();

        f.scheduler
            .submit(analysis_request("one", TaskPriority::Medium))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 1, Duration::from_secs(5))
                .await
        );

        f.agent.fail.store(true, Ordering::SeqCst);
        f.scheduler
            .submit(analysis_request("two", TaskPriority::Medium))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskFailed, 1, Duration::from_secs(5))
                .await
        );

        f.agent.fail.store(false, Ordering::SeqCst);
        let stats = f.scheduler.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_bound, 10_000);
        assert!((stats.error_rate_last_hour - 0.5).abs() < 1e-9);
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let f = fixture();
        assert_eq!(f.scheduler.status("task_0_zzz"), TaskStatus::NotFound);
        assert!(f.scheduler.result("task_0_zzz").is_none());
    }

    #[tokio::test]
    async fn overflow_refuses_submission() {
        let f = fixture();
        f.scheduler.set_queue_bound(1);
        f.scheduler
            .submit(analysis_request("first", TaskPriority::Medium))
            .unwrap();
        let err = f
            .scheduler
            .submit(analysis_request("second", TaskPriority::Medium))
            .unwrap_err();
        assert_eq!(err.code, "queue_full");
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn workflow_tasks_route_through_the_engine() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);
        Arc::clone(&f.scheduler).start();

        // a one-step workflow over the recording agent
        let workflows = {
            // fixture keeps the engine inside the scheduler; register here
            // through a second handle
            Arc::clone(&f.scheduler.workflows)
        };
        workflows
            .register_workflow(WorkflowDefinition {
                id: "wf-1".into(),
                name: "single step".into(),
                description: String::new(),
                steps: vec![WorkflowStep {
                    id: "s1".into(),
                    agent_name: "analysis-agent".into(),
                    task_type: TaskType::CodeAnalysis,
                    prompt: "inspect".into(),
                }],
            })
            .unwrap();

        let mut input = Map::new();
        input.insert("workflowId".into(), Value::from("wf-1"));
        let mut inner = Map::new();
        inner.insert("marker".into(), Value::from("via-workflow"));
        input.insert("input".into(), Value::Object(inner));

        let id = f
            .scheduler
            .submit(TaskRequest::new(TaskKind::Workflow, input))
            .unwrap();
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 1, Duration::from_secs(5))
                .await
        );
        let record = f.scheduler.result(&id).unwrap();
        let output = record.result.unwrap();
        assert_eq!(output.metadata["workflowId"], "wf-1");
        assert_eq!(collector.count(EventKind::WorkflowCompleted), 1);
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_dispatch() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);

        let request = analysis_request("late", TaskPriority::Medium)
            .with_deadline(Utc::now() - chrono::Duration::seconds(5));
        let id = f.scheduler.submit(request).unwrap();
        Arc::clone(&f.scheduler).start();

        assert!(
            collector
                .wait_for(EventKind::TaskFailed, 1, Duration::from_secs(5))
                .await
        );
        let record = f.scheduler.result(&id).unwrap();
        assert_eq!(record.error.unwrap().category, ErrorCategory::Timeout);
        // the agent never ran
        assert!(f.log.lock().is_empty());
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_intake_and_drains() {
        let f = fixture();
        let mut collector = EventCollector::attach(&f.bus);
        Arc::clone(&f.scheduler).start();
        f.scheduler
            .submit(analysis_request("draining", TaskPriority::Medium))
            .unwrap();
        f.scheduler.shutdown().await;

        let err = f
            .scheduler
            .submit(analysis_request("rejected", TaskPriority::Medium))
            .unwrap_err();
        assert_eq!(err.code, "scheduler_stopped");
        // the queued task was drained before the worker stopped
        assert!(
            collector
                .wait_for(EventKind::TaskCompleted, 1, Duration::from_secs(1))
                .await
        );
    }
}
