//! Integration tests for the sprint runner.
//!
//! Agents and the test suite are scripted, so these run without any
//! external tooling.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use coco_orchestrator::{
    AgentExecutor, AgentOutput, AgentRole, AgentTask, BacklogSpec, BacklogTask, Coordinator,
    Error, FixedResourceMonitor, Result, Sprint, SprintResultStore, SprintRunner, TestFailure,
    TestRunResult, TestRunner,
};

/// Replies to review tasks from a script; every other task succeeds.
struct ScriptedAgent {
    reviews: Mutex<VecDeque<String>>,
    dispatched: Mutex<Vec<AgentTask>>,
    fail_ids: Vec<String>,
}

impl ScriptedAgent {
    fn new(reviews: &[&str]) -> Self {
        Self {
            reviews: Mutex::new(reviews.iter().map(|r| r.to_string()).collect()),
            dispatched: Mutex::new(Vec::new()),
            fail_ids: Vec::new(),
        }
    }

    fn failing(mut self, id: &str) -> Self {
        self.fail_ids.push(id.to_string());
        self
    }

    fn dispatched_ids(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    fn task(&self, id: &str) -> AgentTask {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        self.dispatched.lock().unwrap().push(task.clone());

        if self.fail_ids.contains(&task.id) {
            return Err(Error::Executor {
                task_id: task.id.clone(),
                message: "agent crashed".to_string(),
            });
        }
        if task.id == "integration-test" {
            return Ok(AgentOutput::new("Ran 24 tests: 24 passing"));
        }
        if task.id.contains("review") {
            let reply = self.reviews.lock().unwrap().pop_front().unwrap_or_default();
            return Ok(AgentOutput::new(reply));
        }
        Ok(AgentOutput::new("done"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Returns queued results in order, then clean runs.
struct ScriptedTests {
    runs: Mutex<VecDeque<TestRunResult>>,
}

impl ScriptedTests {
    fn new(runs: Vec<TestRunResult>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
        }
    }
}

#[async_trait]
impl TestRunner for ScriptedTests {
    async fn run(&self, _cwd: &Path) -> Result<TestRunResult> {
        Ok(self.runs.lock().unwrap().pop_front().unwrap_or(TestRunResult {
            total: 10,
            passed: 10,
            failed: 0,
            failures: Vec::new(),
        }))
    }
}

fn failing_run(failed: u32) -> TestRunResult {
    TestRunResult {
        total: 10,
        passed: 10 - failed,
        failed,
        failures: (0..failed)
            .map(|i| TestFailure {
                name: format!("parser::test_{}", i),
                message: "assertion failed".to_string(),
                file: Some("src/parser.rs".to_string()),
            })
            .collect(),
    }
}

fn one_task_sprint(id: &str) -> Sprint {
    Sprint::new(id, format!("Sprint {}", id)).with_tasks(vec![BacklogTask::new(
        format!("{}-T1", id),
        AgentRole::Coder,
        "Implement it",
    )])
}

fn runner(agent: Arc<ScriptedAgent>, tests: ScriptedTests) -> SprintRunner {
    SprintRunner::new(Coordinator::new(agent), Arc::new(tests))
        .with_monitor(Arc::new(FixedResourceMonitor(2)))
}

#[tokio::test]
async fn happy_path_converges_in_one_iteration() {
    let agent = Arc::new(ScriptedAgent::new(&["Quality score: 92"]));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir())
        .with_quality_threshold(85);

    let result = runner(agent.clone(), ScriptedTests::new(vec![]))
        .run_sprint(&backlog.sprints[0], &backlog)
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.quality_score, 92);
    assert_eq!(result.tests_total, 10);
    assert!(result.errors.is_empty());
    assert_eq!(agent.dispatched_ids(), vec!["S1-T1", "S1-review-1"]);
}

#[tokio::test]
async fn one_retry_then_success() {
    let agent = Arc::new(ScriptedAgent::new(&["score: 90"]));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir())
        .with_quality_threshold(85);

    let result = runner(agent.clone(), ScriptedTests::new(vec![failing_run(2)]))
        .run_sprint(&backlog.sprints[0], &backlog)
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.quality_score, 90);

    // The fix task replaces the original task set.
    assert_eq!(
        agent.dispatched_ids(),
        vec!["S1-T1", "S1-fix-1", "S1-review-2"]
    );
    let fix = agent.task("S1-fix-1");
    assert!(fix.description.contains("parser::test_0"));
    assert!(fix.description.contains("src/parser.rs"));
    assert!(fix.description.contains("assertion failed"));
}

#[tokio::test]
async fn exhaustion_on_quality_fails_sprint() {
    let agent = Arc::new(ScriptedAgent::new(&["score: 60", "score: 60"]));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir())
        .with_quality_threshold(85)
        .with_max_iterations(2);

    let result = runner(agent.clone(), ScriptedTests::new(vec![]))
        .run_sprint(&backlog.sprints[0], &backlog)
        .await;

    assert!(!result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.quality_score, 60);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("Quality threshold not met")));
    assert_eq!(
        agent.dispatched_ids(),
        vec!["S1-T1", "S1-review-1", "S1-improve-1", "S1-review-2"]
    );
    assert!(agent.task("S1-improve-1").description.contains("60/100"));
}

#[tokio::test]
async fn exhaustion_on_tests_skips_review_and_zeroes_score() {
    let agent = Arc::new(ScriptedAgent::new(&["score: 99"]));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir())
        .with_max_iterations(2);

    let result = runner(
        agent.clone(),
        ScriptedTests::new(vec![failing_run(3), failing_run(1)]),
    )
    .run_sprint(&backlog.sprints[0], &backlog)
    .await;

    assert!(!result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.quality_score, 0);
    assert_eq!(result.tests_total, 10);
    assert_eq!(result.tests_passing, 9);
    assert!(result.errors[0].contains("Tests still failing"));
    assert!(!agent.dispatched_ids().iter().any(|id| id.contains("review")));
}

#[tokio::test]
async fn dispatch_errors_are_recorded_but_not_fatal() {
    let agent = Arc::new(ScriptedAgent::new(&["score: 95"]).failing("S1-T1"));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir());

    let result = runner(agent, ScriptedTests::new(vec![]))
        .run_sprint(&backlog.sprints[0], &backlog)
        .await;

    assert!(result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("S1-T1"));
}

#[tokio::test]
async fn unparseable_review_uses_conservative_default() {
    let agent = Arc::new(ScriptedAgent::new(&["Looks fine overall."]));
    let backlog = BacklogSpec::new(vec![one_task_sprint("S1")], std::env::temp_dir())
        .with_max_iterations(1);

    let result = runner(agent, ScriptedTests::new(vec![]))
        .run_sprint(&backlog.sprints[0], &backlog)
        .await;

    assert_eq!(result.quality_score, 65);
    assert!(!result.success);
}

#[tokio::test]
async fn run_sprints_aggregates_and_persists() {
    let temp_dir = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&["score: 90", "score: 40", "score: 40", "score: 86"]));
    let backlog = BacklogSpec::new(
        vec![one_task_sprint("S1"), one_task_sprint("S2")],
        temp_dir.path(),
    )
    .with_max_iterations(2);

    let messages = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&messages);
    let store = SprintResultStore::new(&temp_dir.path().join(".coco"));

    let build = runner(agent, ScriptedTests::new(vec![]))
        .with_result_store(store.clone())
        .with_progress(Box::new(move |m: &str| sink.lock().unwrap().push(m.to_string())))
        .run_sprints(&backlog)
        .await;

    // S1 converges, S2 exhausts, integration passes.
    assert!(!build.success);
    assert_eq!(build.sprint_results.len(), 3);
    assert!(build.sprint_results[0].success);
    assert!(!build.sprint_results[1].success);
    let integration = &build.sprint_results[2];
    assert_eq!(integration.sprint_id, "integration");
    assert!(integration.success);
    assert_eq!(integration.tests_total, 24);
    assert_eq!(integration.tests_passing, 24);

    // Integration tests are not double counted.
    assert_eq!(build.total_tests, 20);
    // (90 + 40 + 86) / 3 = 72
    assert_eq!(build.final_quality_score, 72);
    assert_eq!(build.output_path, temp_dir.path());

    assert_eq!(store.load_all().unwrap().len(), 3);
    assert_eq!(store.load("S2").unwrap(), build.sprint_results[1]);

    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("quality gate passed")));
    assert!(messages.iter().any(|m| m.contains("synthesizing improvement task")));
}
