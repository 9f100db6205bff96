use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use muster_core::events::{CrewEvent, EventSink};
use muster_core::ids::{ProjectId, WorkerId};
use muster_core::provider::ModelClient;
use muster_core::worker::{Worker, WorkerStatus, WorkerSummary};

use muster_registry::CrewRegistry;

use crate::error::EngineError;
use crate::prompts;
use crate::registry::ToolRegistry;
use crate::runner::{AgentRunner, StepResult, StepRunner};
use crate::sandbox::RuntimeFactory;

/// How dependency waits treat a dependency that fails or is cancelled.
/// Muster has exactly one policy, kept as a named type so the behavior is
/// visible at the call site and in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// A settled dependency releases its waiters no matter how it settled;
    /// ids that are not tracked count as already satisfied.
    #[default]
    BestEffort,
}

/// Configuration for worker execution.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Iteration cap for each worker's loop.
    pub max_iterations: u32,
    pub dependency_policy: DependencyPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            dependency_policy: DependencyPolicy::BestEffort,
        }
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

struct PoolState {
    next_id: u64,
    order: Vec<WorkerId>,
}

struct PoolShared {
    client: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    runtime_factory: Arc<dyn RuntimeFactory>,
    registry: CrewRegistry,
    project: ProjectId,
    target: String,
    events: Arc<dyn EventSink>,
    config: WorkerConfig,
    state: Mutex<PoolState>,
    handles: DashMap<WorkerId, WorkerHandle>,
}

/// Manages concurrent execution of worker agents for one project. The
/// in-process task table only tracks live executions; worker state itself
/// always lives in the registry.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        runtime_factory: Arc<dyn RuntimeFactory>,
        registry: CrewRegistry,
        project: ProjectId,
        target: impl Into<String>,
        events: Arc<dyn EventSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                client,
                tools,
                runtime_factory,
                registry,
                project,
                target: target.into(),
                events,
                config,
                state: Mutex::new(PoolState {
                    next_id: 0,
                    order: Vec::new(),
                }),
                handles: DashMap::new(),
            }),
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.shared.project
    }

    /// Spawn a new worker. Returns immediately with the fresh id — the
    /// execution runs as an independent task and does not wait for its
    /// dependencies to exist or resolve.
    #[instrument(skip(self, task, depends_on), fields(project = %self.shared.project))]
    pub async fn spawn(
        &self,
        task: &str,
        priority: i32,
        depends_on: Vec<WorkerId>,
    ) -> Result<WorkerId, EngineError> {
        let shared = Arc::clone(&self.shared);
        let (worker, cancel, done_tx) = {
            let mut state = shared.state.lock();
            let worker_id = WorkerId::from_index(state.next_id);
            state.next_id += 1;
            state.order.push(worker_id.clone());

            let worker = Worker::new(worker_id.clone(), task, priority, depends_on);
            shared.registry.set_worker(&shared.project, &worker)?;

            shared.events.emit(CrewEvent::WorkerSpawn {
                worker_id: worker_id.clone(),
                task: task.to_string(),
            });

            let cancel = CancellationToken::new();
            let (done_tx, done_rx) = watch::channel(false);
            shared.handles.insert(
                worker_id.clone(),
                WorkerHandle {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
            (worker, cancel, done_tx)
        };

        let id = worker.id.clone();
        tokio::spawn(run_worker(shared, worker, cancel, done_tx));
        Ok(id)
    }

    /// Wait for the named executions (or all tracked ones), tolerating
    /// their individual failures, then read the authoritative state from
    /// the registry. Correct even if the in-process task table is gone and
    /// only the registry remains.
    pub async fn wait_for(
        &self,
        ids: Option<Vec<WorkerId>>,
    ) -> Result<BTreeMap<WorkerId, WorkerSummary>, EngineError> {
        let ids = ids.unwrap_or_else(|| self.shared.state.lock().order.clone());

        let mut results = BTreeMap::new();
        for id in ids {
            let done = self.shared.handles.get(&id).map(|h| h.done.clone());
            if let Some(mut done) = done {
                let _ = done.wait_for(|settled| *settled).await;
            }

            if let Some(worker) = self.shared.registry.get_worker(&self.shared.project, &id)? {
                results.insert(id, worker.summary());
            }
        }
        Ok(results)
    }

    /// Authoritative status of one worker.
    pub fn get_status(&self, id: &WorkerId) -> Result<Option<Worker>, EngineError> {
        Ok(self.shared.registry.get_worker(&self.shared.project, id)?)
    }

    /// Authoritative status of every worker in the project.
    pub fn get_all_status(&self) -> Result<Vec<Worker>, EngineError> {
        Ok(self.shared.registry.all_workers(&self.shared.project)?)
    }

    /// Results from every worker that produced one.
    pub fn get_results(&self) -> Result<BTreeMap<WorkerId, String>, EngineError> {
        let mut results = BTreeMap::new();
        for worker in self.shared.registry.all_workers(&self.shared.project)? {
            if let Some(result) = worker.result {
                results.insert(worker.id, result);
            }
        }
        Ok(results)
    }

    /// Cooperatively cancel one in-flight execution. Returns once the
    /// worker has fully settled — its sandbox teardown included. False when
    /// the id is unknown or already done.
    pub async fn cancel(&self, id: &WorkerId) -> bool {
        let handle = self
            .shared
            .handles
            .get(id)
            .map(|h| (h.cancel.clone(), h.done.clone()));

        match handle {
            Some((cancel, mut done)) => {
                if *done.borrow() {
                    return false;
                }
                cancel.cancel();
                let _ = done.wait_for(|settled| *settled).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight execution and wait for all of them to settle.
    pub async fn cancel_all(&self) {
        let handles: Vec<(CancellationToken, watch::Receiver<bool>)> = self
            .shared
            .handles
            .iter()
            .map(|entry| (entry.value().cancel.clone(), entry.value().done.clone()))
            .collect();

        for (cancel, _) in &handles {
            cancel.cancel();
        }
        for (_, mut done) in handles {
            let _ = done.wait_for(|settled| *settled).await;
        }
    }

    /// Clear every worker record and the pool's internal id state,
    /// returning it to a freshly constructed pool.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.shared.registry.clear_project(&self.shared.project)?;
        self.shared.handles.clear();
        let mut state = self.shared.state.lock();
        state.next_id = 0;
        state.order.clear();
        Ok(())
    }

    /// Number of executions still tracked in-process.
    pub fn tracked_count(&self) -> usize {
        self.shared.handles.len()
    }
}

async fn wait_for_dependencies(shared: &PoolShared, depends_on: &[WorkerId]) {
    match shared.config.dependency_policy {
        DependencyPolicy::BestEffort => {
            for dep in depends_on {
                let done = shared.handles.get(dep).map(|h| h.done.clone());
                if let Some(mut done) = done {
                    // A dropped sender settles the wait too — the
                    // dependency is gone, which is good enough.
                    let _ = done.wait_for(|settled| *settled).await;
                } else {
                    debug!(dependency = %dep, "dependency not tracked — treated as satisfied");
                }
            }
        }
    }
}

fn persist(shared: &PoolShared, worker: &Worker) {
    if let Err(e) = shared.registry.set_worker(&shared.project, worker) {
        warn!(error = %e, worker = %worker.id, "registry write failed");
    }
}

#[instrument(skip_all, fields(worker = %worker.id))]
async fn run_worker(
    shared: Arc<PoolShared>,
    mut worker: Worker,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
) {
    wait_for_dependencies(&shared, &worker.depends_on).await;

    worker.transition(WorkerStatus::Running);
    worker.started_at = Some(Utc::now());
    persist(&shared, &worker);
    shared.events.emit(CrewEvent::WorkerStatus {
        worker_id: worker.id.clone(),
        status: WorkerStatus::Running,
    });

    // Isolated sandbox, torn down in every exit path below.
    let sandbox = shared.runtime_factory.provision();
    if let Err(e) = sandbox.start().await {
        worker.error = Some(e.to_string());
        worker.transition(WorkerStatus::Error);
        worker.completed_at = Some(Utc::now());
        persist(&shared, &worker);
        shared.events.emit(CrewEvent::WorkerError {
            worker_id: worker.id.clone(),
            error: e.to_string(),
        });
        let _ = done_tx.send(true);
        return;
    }

    let system_prompt =
        prompts::worker_prompt(&shared.target, &sandbox.environment(), &shared.tools);
    let step = StepRunner::new(
        Arc::clone(&shared.client),
        Arc::clone(&shared.tools),
        shared.registry.clone(),
        Arc::clone(&sandbox),
        Arc::clone(&shared.events),
        "worker",
        system_prompt,
    );
    let runner = AgentRunner::new(step, shared.config.max_iterations);

    let task = worker.task.clone();
    let worker_id = worker.id.clone();
    let mut last_intermediate = false;

    let outcome = {
        let on_step = |step: &StepResult| {
            for execution in &step.executions {
                if worker.record_tool(&execution.tool_name) {
                    shared.events.emit(CrewEvent::WorkerTool {
                        worker_id: worker_id.clone(),
                        tool: execution.tool_name.clone(),
                    });
                }
            }

            // Usage is counted once per logical thinking step: an
            // intermediate message counts and marks the step open; the
            // tool-bearing continuation of an open step does not count
            // again.
            if let Some(usage) = &step.usage {
                let should_count = if step.metadata.intermediate {
                    last_intermediate = true;
                    true
                } else if step.has_tool_calls {
                    let count = !last_intermediate;
                    last_intermediate = false;
                    count
                } else {
                    last_intermediate = false;
                    true
                };
                let total = usage.total();
                if should_count && total > 0 {
                    shared.events.emit(CrewEvent::WorkerTokens {
                        worker_id: worker_id.clone(),
                        tokens: total,
                    });
                }
            }

            persist(&shared, &worker);
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            result = runner.run(&task, &cancel, on_step) => Some(result),
        }
    };

    // Best-effort sandbox release, on success, failure and cancellation
    // alike.
    if let Err(e) = sandbox.stop().await {
        debug!(error = %e, worker = %worker.id, "sandbox teardown failed");
    }

    match outcome {
        None => {
            worker.transition(WorkerStatus::Cancelled);
            worker.completed_at = Some(Utc::now());
            persist(&shared, &worker);
            shared.events.emit(CrewEvent::WorkerCancelled {
                worker_id: worker.id.clone(),
            });
        }
        Some(Err(e)) => {
            worker.error = Some(e.to_string());
            worker.transition(WorkerStatus::Error);
            worker.completed_at = Some(Utc::now());
            persist(&shared, &worker);
            shared.events.emit(CrewEvent::WorkerError {
                worker_id: worker.id.clone(),
                error: e.to_string(),
            });
        }
        Some(Ok(outcome)) => {
            // Plan-step history beats the chat summary: steps carry
            // already-labeled statuses a free-text answer would discard.
            let plan_summary = sandbox.plan().and_then(|plan| plan.render());
            let final_text = if outcome.final_text.is_empty() {
                None
            } else {
                Some(outcome.final_text)
            };
            worker.result = Some(
                plan_summary
                    .or(final_text)
                    .unwrap_or_else(|| "No findings.".to_string()),
            );
            worker.completed_at = Some(Utc::now());

            let status = if outcome.infeasible {
                worker.error = Some("Task determined infeasible".to_string());
                WorkerStatus::Failed
            } else if outcome.hit_iteration_cap {
                WorkerStatus::Warning
            } else {
                WorkerStatus::Complete
            };
            worker.transition(status);
            persist(&shared, &worker);

            let summary: String = worker
                .result
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            shared.events.emit(CrewEvent::WorkerComplete {
                worker_id: worker.id.clone(),
                status,
                summary,
            });
        }
    }

    let _ = done_tx.send(true);
}
