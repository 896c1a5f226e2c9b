//! Coordinator: dispatches a batch of agent tasks level by level.
//!
//! Tasks are partitioned into dependency levels. Each level runs to
//! completion, with at most `max_parallel_agents` executions in flight,
//! before the next level starts. A failing task does not abort its level or
//! skip its dependents; the caller decides what a failure means.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::{AgentExecutor, AgentTask};
use crate::error::{Error, Result};
use crate::swarm::find_cycle;

/// Options for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum simultaneous executions. Zero is treated as one.
    pub max_parallel_agents: usize,
}

impl DispatchOptions {
    pub fn new(max_parallel_agents: usize) -> Self {
        Self {
            max_parallel_agents,
        }
    }
}

/// Outcome of a single task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub task_id: String,
    pub success: bool,
    /// Agent output text; empty on failure.
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
}

/// A task execution that failed inside a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub task_id: String,
    pub message: String,
}

/// Result of dispatching a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Per-task outcomes, keyed by task id.
    pub results: HashMap<String, ExecutionOutput>,
    /// Failed executions, in completion order.
    pub errors: Vec<TaskError>,
    /// Number of dependency levels executed.
    pub levels: usize,
    /// Highest number of executions observed in flight at once.
    pub max_parallelism: usize,
}

impl DispatchResult {
    /// Output text of a successful task.
    pub fn output(&self, task_id: &str) -> Option<&str> {
        self.results
            .get(task_id)
            .filter(|r| r.success)
            .map(|r| r.output.as_str())
    }

    /// Returns true when every task succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Partitions tasks into dependency levels.
///
/// Level 0 holds tasks with no dependency inside the batch; level k holds
/// tasks whose in-batch dependencies all sit in levels below k. Dependencies
/// on ids outside the batch are ignored. Input order is kept within a level.
pub fn compute_levels(tasks: &[AgentTask]) -> Result<Vec<Vec<AgentTask>>> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(Error::Config(format!("duplicate task id {} in batch", task.id)));
        }
    }

    let mut levels: Vec<Vec<AgentTask>> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::with_capacity(tasks.len());
    let mut remaining: Vec<&AgentTask> = tasks.iter().collect();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&AgentTask>, Vec<&AgentTask>) =
            remaining.into_iter().partition(|t| {
                t.dependencies
                    .iter()
                    .filter(|dep| ids.contains(dep.as_str()))
                    .all(|dep| placed.contains(dep.as_str()))
            });

        if ready.is_empty() {
            let deps: HashMap<&str, Vec<&str>> = blocked
                .iter()
                .map(|t| {
                    (
                        t.id.as_str(),
                        t.dependencies.iter().map(String::as_str).collect(),
                    )
                })
                .collect();
            let cycle = find_cycle(&deps).unwrap_or_else(|| {
                blocked
                    .iter()
                    .map(|t| t.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            });
            return Err(Error::DependencyCycle(cycle));
        }

        placed.extend(ready.iter().map(|t| t.id.as_str()));
        levels.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    Ok(levels)
}

/// Dispatches task batches to an agent executor.
#[derive(Clone)]
pub struct Coordinator {
    executor: Arc<dyn AgentExecutor>,
}

impl Coordinator {
    /// Creates a coordinator backed by the given executor.
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }

    /// Returns the executor name.
    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Executes a batch and returns every task's outcome.
    ///
    /// Fails only when the batch itself is malformed (duplicate ids or a
    /// dependency cycle). Individual execution errors land in the result.
    pub async fn execute(
        &self,
        tasks: Vec<AgentTask>,
        options: DispatchOptions,
    ) -> Result<DispatchResult> {
        let limit = if options.max_parallel_agents == 0 {
            tracing::warn!("max_parallel_agents was 0, using 1");
            1
        } else {
            options.max_parallel_agents
        };

        let levels = compute_levels(&tasks)?;
        let mut dispatch = DispatchResult {
            levels: levels.len(),
            ..Default::default()
        };

        tracing::info!(
            executor = %self.executor.name(),
            tasks = tasks.len(),
            levels = levels.len(),
            max_parallel = limit,
            "dispatching batch"
        );

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for (index, level) in levels.into_iter().enumerate() {
            tracing::debug!(level = index, tasks = level.len(), "starting level");
            self.run_level(level, limit, &in_flight, &peak, &mut dispatch)
                .await;
        }

        dispatch.max_parallelism = peak.load(Ordering::SeqCst);
        tracing::info!(
            succeeded = dispatch.results.len() - dispatch.errors.len(),
            failed = dispatch.errors.len(),
            max_parallelism = dispatch.max_parallelism,
            "batch finished"
        );
        Ok(dispatch)
    }

    async fn run_level(
        &self,
        level: Vec<AgentTask>,
        limit: usize,
        in_flight: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
        dispatch: &mut DispatchResult,
    ) {
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut outstanding: Vec<String> = level.iter().map(|t| t.id.clone()).collect();
        let mut set = JoinSet::new();

        for task in level {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let in_flight = Arc::clone(in_flight);
            let peak = Arc::clone(peak);

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return (task.id, Err(e.to_string()), Duration::ZERO);
                    }
                };

                let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);

                let start = Instant::now();
                let result = executor
                    .execute(&task)
                    .await
                    .map(|out| out.output)
                    .map_err(|e| e.to_string());

                in_flight.fetch_sub(1, Ordering::SeqCst);
                (task.id, result, start.elapsed())
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task_id, result, duration)) => {
                    outstanding.retain(|id| id != &task_id);
                    record(dispatch, task_id, result, duration);
                }
                Err(e) => {
                    tracing::error!(error = %e, "agent task aborted");
                }
            }
        }

        // Anything that never reported back panicked or was cancelled.
        for task_id in outstanding {
            record(
                dispatch,
                task_id,
                Err("agent task aborted before reporting".to_string()),
                Duration::ZERO,
            );
        }
    }
}

fn record(
    dispatch: &mut DispatchResult,
    task_id: String,
    result: std::result::Result<String, String>,
    duration: Duration,
) {
    let output = match result {
        Ok(output) => {
            tracing::debug!(task_id = %task_id, ?duration, "task succeeded");
            ExecutionOutput {
                task_id: task_id.clone(),
                success: true,
                output,
                error: None,
                duration,
            }
        }
        Err(message) => {
            tracing::warn!(task_id = %task_id, error = %message, "task failed");
            dispatch.errors.push(TaskError {
                task_id: task_id.clone(),
                message: message.clone(),
            });
            ExecutionOutput {
                task_id: task_id.clone(),
                success: false,
                output: String::new(),
                error: Some(message),
                duration,
            }
        }
    };
    dispatch.results.insert(task_id, output);
}
