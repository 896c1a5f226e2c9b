//! Test and quality gates: the test-runner seam, score scraping, and the
//! corrective tasks synthesized when a gate fails.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::backlog::Sprint;
use crate::agent::AgentTask;
use crate::error::{Error, Result};

/// Score used when a reviewer gives no parseable score or fails outright.
pub const DEFAULT_QUALITY_SCORE: u32 = 65;

/// pytest's exit code when it collected no tests.
const PYTEST_NO_TESTS_COLLECTED: i32 = 5;

/// Failures listed in a fix task; the rest are summarized as a count.
pub const MAX_FAILURES_IN_FIX_TASK: usize = 10;

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:score|quality)[:\s]+(\d{1,3})").expect("score regex is valid")
});
static PASSING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+pass").expect("passing regex is valid"));
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+(?:test|spec)").expect("total regex is valid"));

/// One failing test reported by a test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Outcome of one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub failures: Vec<TestFailure>,
}

impl TestRunResult {
    /// A run that found nothing to execute.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Runs the project's test suite.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the tests in `cwd`. An `Err` means the suite could not run at all.
    async fn run(&self, cwd: &Path) -> Result<TestRunResult>;
}

/// Test runner that executes a command and scrapes its output.
///
/// Understands cargo's `N passed; M failed` summary lines (summed over all
/// test binaries) and `test name ... FAILED` lines, as well as pytest-style
/// `FAILED path::name - message` lines.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CommandTestRunner {
    fn default() -> Self {
        Self::new("cargo", vec!["test".to_string()])
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, cwd: &Path) -> Result<TestRunResult> {
        tracing::debug!(command = %self.command, cwd = %cwd.display(), "running tests");

        let child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::TestRunner(format!("failed to spawn {}: {}", self.command, e)))?;

        // The child is killed on drop, so a timed-out suite does not linger.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(command = %self.command, timeout = ?self.timeout, "test suite timed out");
                return Ok(TestRunResult {
                    total: 1,
                    passed: 0,
                    failed: 1,
                    failures: vec![TestFailure {
                        name: self.command.clone(),
                        message: format!("timed out after {:?}", self.timeout),
                        file: None,
                    }],
                });
            }
        };

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let mut result = parse_test_output(&text);

        if result.total == 0 && no_test_suite(output.status.code(), &text) {
            tracing::debug!(command = %self.command, "no test suite found");
            return Ok(TestRunResult::empty());
        }

        // A failing command with no failing tests (e.g. a compile error) still fails the gate.
        if !output.status.success() && result.failed == 0 {
            result.failed = 1;
            result.total += 1;
            result.failures.push(TestFailure {
                name: self.command.clone(),
                message: format!("exited with {}: {}", output.status, tail(&text, 20)),
                file: None,
            });
        }

        tracing::debug!(
            total = result.total,
            passed = result.passed,
            failed = result.failed,
            "tests finished"
        );
        Ok(result)
    }
}

/// Scrapes pass/fail counts and failing test names from test-runner output.
pub fn parse_test_output(text: &str) -> TestRunResult {
    static PASSED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+) passed").expect("passed regex is valid"));
    static FAILED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+) failed").expect("failed regex is valid"));
    static CARGO_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^test (\S+) \.\.\. FAILED").expect("cargo failure regex is valid")
    });
    static PYTEST_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^FAILED (\S+?)::(\S+)(?: - (.*))?$").expect("pytest failure regex is valid")
    });

    let sum = |re: &Regex| -> u32 {
        re.captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .sum()
    };
    let passed = sum(&PASSED);
    let failed = sum(&FAILED);

    let mut failures: Vec<TestFailure> = CARGO_FAILURE
        .captures_iter(text)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_string();
            Some(TestFailure {
                message: failure_message(text, &name),
                name,
                file: None,
            })
        })
        .collect();
    failures.extend(PYTEST_FAILURE.captures_iter(text).filter_map(|c| {
        Some(TestFailure {
            file: Some(c.get(1)?.as_str().to_string()),
            name: c.get(2)?.as_str().to_string(),
            message: c
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
    }));

    let failed = failed.max(failures.len() as u32);
    TestRunResult {
        total: passed + failed,
        passed,
        failed,
        failures,
    }
}

/// Whether the output says there is no suite to run yet: pytest's "no tests
/// collected" exit code or a cargo invocation outside any package.
fn no_test_suite(code: Option<i32>, text: &str) -> bool {
    const MARKERS: [&str; 3] = ["no tests ran", "collected 0 items", "could not find `Cargo.toml`"];
    code == Some(PYTEST_NO_TESTS_COLLECTED) || MARKERS.iter().any(|m| text.contains(m))
}

/// First line of a cargo failure block (`---- name stdout ----`), if present.
fn failure_message(text: &str, name: &str) -> String {
    let header = format!("---- {} stdout ----", name);
    text.lines()
        .skip_while(|line| line.trim() != header)
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "test failed".to_string())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// First `score`/`quality` number in the text, clamped to 100.
pub fn extract_quality_score(text: &str) -> Option<u32> {
    SCORE_RE
        .captures(text)
        .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .map(|score| score.min(100))
}

/// Quality score from reviewer output, or [`DEFAULT_QUALITY_SCORE`] when absent.
pub fn parse_quality_score(text: &str) -> u32 {
    extract_quality_score(text).unwrap_or(DEFAULT_QUALITY_SCORE)
}

/// Test counts scraped from free-form agent output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passing: u32,
    pub total: u32,
}

/// Best-effort `N pass` / `N tests` extraction; zero when absent.
pub fn parse_test_counts(text: &str) -> TestCounts {
    let first = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    TestCounts {
        passing: first(&PASSING_RE),
        total: first(&TOTAL_RE),
    }
}

/// Builds the single task that replaces a sprint's task set after test failures.
pub struct FixTaskBuilder<'a> {
    sprint: &'a Sprint,
    failures: &'a [TestFailure],
    failed: u32,
}

impl<'a> FixTaskBuilder<'a> {
    pub fn new(sprint: &'a Sprint) -> Self {
        Self {
            sprint,
            failures: &[],
            failed: 0,
        }
    }

    /// Sets the failing tests and the total failure count.
    pub fn with_failures(mut self, failures: &'a [TestFailure], failed: u32) -> Self {
        self.failures = failures;
        self.failed = failed;
        self
    }

    pub fn build(&self, iteration: u32) -> AgentTask {
        let mut prompt = String::new();

        prompt.push_str("## Fix Request\n\n");
        prompt.push_str(&format!(
            "{} test(s) are failing after sprint \"{}\". Fix the code so every test passes.\n\n",
            self.failed, self.sprint.name
        ));

        prompt.push_str("### Failing Tests\n\n");
        for (i, failure) in self.failures.iter().take(MAX_FAILURES_IN_FIX_TASK).enumerate() {
            prompt.push_str(&format!("{}. **{}**", i + 1, failure.name));
            if let Some(file) = &failure.file {
                prompt.push_str(&format!(" ({})", file));
            }
            prompt.push('\n');
            if !failure.message.is_empty() {
                prompt.push_str(&format!("   - {}\n", failure.message));
            }
        }
        if self.failures.len() > MAX_FAILURES_IN_FIX_TASK {
            prompt.push_str(&format!(
                "\n...and {} more.\n",
                self.failures.len() - MAX_FAILURES_IN_FIX_TASK
            ));
        }

        AgentTask::new(format!("{}-fix-{}", self.sprint.id, iteration), prompt)
            .with_context(format!("Role: coder\nSprint: {} ({})", self.sprint.name, self.sprint.id))
    }
}

/// Task asking for quality improvements after a low review score.
pub fn improvement_task(sprint: &Sprint, score: u32, threshold: u32, iteration: u32) -> AgentTask {
    let prompt = format!(
        "## Improvement Request\n\n\
         The review of sprint \"{}\" scored {}/100, below the required {}. \
         Improve code quality, error handling, tests and documentation \
         without breaking passing tests.\n",
        sprint.name, score, threshold
    );
    AgentTask::new(format!("{}-improve-{}", sprint.id, iteration), prompt)
        .with_context(format!("Role: optimizer\nSprint: {} ({})", sprint.name, sprint.id))
}

/// Reviewer task for the quality gate.
pub fn review_task(sprint: &Sprint, iteration: u32) -> AgentTask {
    let prompt = format!(
        "## Quality Review\n\n\
         Review the work done in sprint \"{}\". Check correctness, tests, \
         error handling and readability.\n\n\
         End your answer with a line of the form `score: NN` where NN is 0-100.\n",
        sprint.name
    );
    AgentTask::new(format!("{}-review-{}", sprint.id, iteration), prompt)
        .with_context(format!("Role: reviewer\nSprint: {} ({})", sprint.name, sprint.id))
}

/// Id of the integration sprint and its result file.
pub const INTEGRATION_SPRINT_ID: &str = "integration";

/// The two integration tasks: a full test run, then a review depending on it.
pub fn integration_tasks(sprints: &[Sprint]) -> Vec<AgentTask> {
    let names: Vec<&str> = sprints.iter().map(|s| s.name.as_str()).collect();
    let scope = if names.is_empty() {
        "the project".to_string()
    } else {
        names.join(", ")
    };

    let test = AgentTask::new(
        "integration-test",
        format!(
            "## Integration Test\n\n\
             Run the complete test suite across all features ({}). Fix any \
             cross-feature breakage. Report the result as `N passing` and `N tests`.\n",
            scope
        ),
    )
    .with_context("Role: tester\nSprint: integration");

    let review = AgentTask::new(
        "integration-review",
        format!(
            "## Integration Review\n\n\
             Review the integrated project ({}) as a whole. \
             End your answer with a line of the form `score: NN` where NN is 0-100.\n",
            scope
        ),
    )
    .with_context("Role: reviewer\nSprint: integration")
    .with_dependencies(vec!["integration-test".to_string()]);

    vec![test, review]
}
