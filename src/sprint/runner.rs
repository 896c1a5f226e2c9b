//! Sprint runner: drives each sprint through the test and quality gates,
//! retrying with synthesized tasks until it converges or runs out of
//! iterations, then runs the integration sprint and aggregates.
//!
//! Nothing escapes [`SprintRunner::run_sprints`]: dispatch errors, missing
//! test infrastructure and unparseable reviews are all folded into the
//! per-sprint [`SprintResult`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::backlog::{BacklogSpec, Sprint};
use super::gates::{
    improvement_task, integration_tasks, parse_quality_score, parse_test_counts, review_task,
    FixTaskBuilder, TestRunResult, TestRunner, DEFAULT_QUALITY_SCORE, INTEGRATION_SPRINT_ID,
};
use super::result::{BuildResult, SprintResult, SprintResultStore};
use crate::agent::AgentTask;
use crate::coordinator::{Coordinator, DispatchOptions, DispatchResult};
use crate::monitor::{ResourceMonitor, SystemResourceMonitor};

/// Callback receiving one human-readable line per gate transition and retry.
pub type SprintProgress = Box<dyn Fn(&str) + Send + Sync>;

fn log_progress(message: &str) {
    tracing::info!("{}", message);
}

/// Runs a backlog sprint by sprint.
pub struct SprintRunner {
    coordinator: Coordinator,
    test_runner: Arc<dyn TestRunner>,
    monitor: Arc<dyn ResourceMonitor>,
    store: Option<SprintResultStore>,
    progress: SprintProgress,
}

impl SprintRunner {
    /// Creates a runner with the system resource monitor, no result store,
    /// and progress forwarded to the log.
    pub fn new(coordinator: Coordinator, test_runner: Arc<dyn TestRunner>) -> Self {
        Self {
            coordinator,
            test_runner,
            monitor: Arc::new(SystemResourceMonitor::default()),
            store: None,
            progress: Box::new(log_progress),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Persists each sprint result as it completes.
    pub fn with_result_store(mut self, store: SprintResultStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: SprintProgress) -> Self {
        self.progress = progress;
        self
    }

    fn report(&self, message: impl AsRef<str>) {
        (self.progress)(message.as_ref());
    }

    /// Runs every sprint in order, then the integration sprint, and aggregates.
    pub async fn run_sprints(&self, backlog: &BacklogSpec) -> BuildResult {
        let started = Instant::now();
        tracing::info!(
            sprints = backlog.sprints.len(),
            max_iterations = backlog.max_iterations_per_sprint,
            threshold = backlog.quality_threshold,
            output_path = %backlog.output_path.display(),
            "starting sprints"
        );

        let mut results = Vec::with_capacity(backlog.sprints.len());
        for (index, sprint) in backlog.sprints.iter().enumerate() {
            self.report(format!(
                "Sprint {}/{}: {} ({})",
                index + 1,
                backlog.sprints.len(),
                sprint.name,
                sprint.id
            ));
            let result = self.run_sprint(sprint, backlog).await;
            self.persist(&result);
            results.push(result);
        }

        self.report("Running integration sprint");
        let integration = self.run_integration(backlog).await;
        self.persist(&integration);

        let build = BuildResult::aggregate(
            results,
            integration,
            started,
            backlog.output_path.clone(),
        );
        tracing::info!(
            success = build.success,
            total_tests = build.total_tests,
            final_quality_score = build.final_quality_score,
            duration_ms = build.total_duration_ms,
            "build finished"
        );
        self.report(format!(
            "Build {}: {} tests, quality {}",
            if build.success { "succeeded" } else { "failed" },
            build.total_tests,
            build.final_quality_score
        ));
        build
    }

    /// Iterates one sprint against the gates until it converges or the budget runs out.
    pub async fn run_sprint(&self, sprint: &Sprint, backlog: &BacklogSpec) -> SprintResult {
        let start = Instant::now();
        let max_iterations = backlog.max_iterations_per_sprint;
        let threshold = backlog.quality_threshold;

        let mut tasks = sprint.agent_tasks();
        let mut errors: Vec<String> = Vec::new();
        let mut iterations = 0;
        let mut tests = TestRunResult::empty();
        let mut quality_score = 0;
        let mut success = false;

        if max_iterations == 0 {
            errors.push("maxIterationsPerSprint is 0, sprint was not run".to_string());
        }

        while iterations < max_iterations {
            iterations += 1;
            tracing::info!(sprint_id = %sprint.id, iteration = iterations, tasks = tasks.len(), "dispatching");
            self.report(format!(
                "[{}] iteration {}/{}: dispatching {} task(s)",
                sprint.id,
                iterations,
                max_iterations,
                tasks.len()
            ));

            if let Some(dispatch) = self.dispatch(&sprint.id, tasks, &mut errors).await {
                self.report(format!(
                    "[{}] dispatch finished: {} ok, {} failed",
                    sprint.id,
                    dispatch.results.len() - dispatch.errors.len(),
                    dispatch.errors.len()
                ));
            }

            tests = self.run_tests(&sprint.id, &backlog.output_path).await;
            if !tests.is_clean() {
                if iterations < max_iterations {
                    self.report(format!(
                        "[{}] test gate failed: {} of {} failing, synthesizing fix task",
                        sprint.id, tests.failed, tests.total
                    ));
                    tasks = vec![FixTaskBuilder::new(sprint)
                        .with_failures(&tests.failures, tests.failed)
                        .build(iterations)];
                    continue;
                }
                errors.push(format!(
                    "Tests still failing after {} iteration(s): {} of {} failing",
                    iterations, tests.failed, tests.total
                ));
                quality_score = 0;
                self.report(format!("[{}] test gate failed, no iterations left", sprint.id));
                break;
            }
            self.report(format!(
                "[{}] test gate passed: {}/{} passing",
                sprint.id, tests.passed, tests.total
            ));

            quality_score = self.review(sprint, iterations, &mut errors).await;
            if quality_score >= threshold {
                success = true;
                self.report(format!(
                    "[{}] quality gate passed: {} >= {}",
                    sprint.id, quality_score, threshold
                ));
                break;
            }

            if iterations < max_iterations {
                self.report(format!(
                    "[{}] quality gate failed: {} < {}, synthesizing improvement task",
                    sprint.id, quality_score, threshold
                ));
                tasks = vec![improvement_task(sprint, quality_score, threshold, iterations)];
                continue;
            }
            errors.push(format!(
                "Quality threshold not met: {} < {}",
                quality_score, threshold
            ));
            self.report(format!(
                "[{}] quality gate failed: {} < {}, no iterations left",
                sprint.id, quality_score, threshold
            ));
            break;
        }

        let result = SprintResult {
            sprint_id: sprint.id.clone(),
            success,
            tests_total: tests.total,
            tests_passing: tests.passed,
            quality_score,
            duration_ms: start.elapsed().as_millis() as u64,
            iterations,
            errors,
        };
        tracing::info!(
            sprint_id = %result.sprint_id,
            success = result.success,
            iterations = result.iterations,
            quality_score = result.quality_score,
            "sprint finished"
        );
        result
    }

    /// Runs the integration test and review once, without retries.
    pub async fn run_integration(&self, backlog: &BacklogSpec) -> SprintResult {
        let start = Instant::now();
        let threshold = backlog.quality_threshold;
        let mut errors: Vec<String> = Vec::new();

        let tasks = integration_tasks(&backlog.sprints);
        let (counts, quality_score) =
            match self.dispatch(INTEGRATION_SPRINT_ID, tasks, &mut errors).await {
                Some(dispatch) => {
                    let counts = parse_test_counts(dispatch.output("integration-test").unwrap_or(""));
                    let score = dispatch
                        .output("integration-review")
                        .map(parse_quality_score)
                        .unwrap_or(DEFAULT_QUALITY_SCORE);
                    (counts, score)
                }
                None => (Default::default(), DEFAULT_QUALITY_SCORE),
            };

        let success =
            errors.is_empty() && counts.passing >= counts.total && quality_score >= threshold;
        if quality_score < threshold {
            errors.push(format!(
                "Quality threshold not met: {} < {}",
                quality_score, threshold
            ));
        }

        self.report(format!(
            "[{}] {}/{} passing, quality {}",
            INTEGRATION_SPRINT_ID, counts.passing, counts.total, quality_score
        ));

        SprintResult {
            sprint_id: INTEGRATION_SPRINT_ID.to_string(),
            success,
            tests_total: counts.total,
            tests_passing: counts.passing,
            quality_score,
            duration_ms: start.elapsed().as_millis() as u64,
            iterations: 1,
            errors,
        }
    }

    /// Dispatches a batch, folding every failure into `errors`.
    async fn dispatch(
        &self,
        sprint_id: &str,
        tasks: Vec<AgentTask>,
        errors: &mut Vec<String>,
    ) -> Option<DispatchResult> {
        let options = DispatchOptions::new(self.monitor.max_parallel_agents());
        match self.coordinator.execute(tasks, options).await {
            Ok(dispatch) => {
                for error in &dispatch.errors {
                    tracing::warn!(sprint_id = %sprint_id, task_id = %error.task_id, "task failed");
                    errors.push(format!("Task {} failed: {}", error.task_id, error.message));
                }
                Some(dispatch)
            }
            Err(e) => {
                tracing::error!(sprint_id = %sprint_id, error = %e, "dispatch failed");
                self.report(format!("[{}] dispatch failed: {}", sprint_id, e));
                errors.push(format!("Dispatch failed: {}", e));
                None
            }
        }
    }

    async fn run_tests(&self, sprint_id: &str, cwd: &Path) -> TestRunResult {
        match self.test_runner.run(cwd).await {
            Ok(result) => {
                tracing::debug!(
                    sprint_id = %sprint_id,
                    total = result.total,
                    failed = result.failed,
                    "test gate"
                );
                result
            }
            Err(e) => {
                tracing::warn!(sprint_id = %sprint_id, error = %e, "test runner unavailable");
                self.report(format!(
                    "[{}] test runner unavailable ({}), counting zero tests",
                    sprint_id, e
                ));
                TestRunResult::empty()
            }
        }
    }

    async fn review(&self, sprint: &Sprint, iteration: u32, errors: &mut Vec<String>) -> u32 {
        let task = review_task(sprint, iteration);
        let task_id = task.id.clone();

        let output = self
            .dispatch(&sprint.id, vec![task], errors)
            .await
            .and_then(|dispatch| dispatch.output(&task_id).map(String::from));

        match output {
            Some(text) => {
                let score = parse_quality_score(&text);
                tracing::debug!(sprint_id = %sprint.id, score, "quality gate");
                score
            }
            None => {
                self.report(format!(
                    "[{}] review produced no output, using default score {}",
                    sprint.id, DEFAULT_QUALITY_SCORE
                ));
                DEFAULT_QUALITY_SCORE
            }
        }
    }

    fn persist(&self, result: &SprintResult) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(result) {
            tracing::error!(sprint_id = %result.sprint_id, error = %e, "failed to persist sprint result");
            self.report(format!(
                "[{}] could not save sprint result: {}",
                result.sprint_id, e
            ));
        }
    }
}
