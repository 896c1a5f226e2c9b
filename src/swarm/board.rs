//! Task board for swarm runs: the dependency graph and its state machine.
//!
//! Every transition takes a `&SwarmBoard` and returns a new board. The input
//! is never modified, so a caller holding an older board keeps a consistent
//! snapshot. Stats are derived and recomputed after each transition.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::{SwarmFeature, SwarmSpec};
use crate::error::{Error, Result};

/// Status of a board task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or dispatch.
    #[default]
    Pending,
    /// Selected for dispatch and running.
    InProgress,
    /// Finished successfully.
    Done,
    /// Finished unsuccessfully. Never retried by the board itself.
    Failed,
    /// Pending task that can no longer run because a dependency failed.
    Blocked,
}

impl TaskStatus {
    /// Returns true for statuses no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a board task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    AcceptanceTest,
    Implement,
    Integrate,
    Review,
}

impl TaskType {
    /// Per-feature pipeline, in dependency order.
    pub const PIPELINE: [TaskType; 4] = [
        TaskType::AcceptanceTest,
        TaskType::Implement,
        TaskType::Integrate,
        TaskType::Review,
    ];

    /// Suffix used in generated task ids.
    pub fn slug(&self) -> &'static str {
        match self {
            TaskType::AcceptanceTest => "acceptance-test",
            TaskType::Implement => "implement",
            TaskType::Integrate => "integrate",
            TaskType::Review => "review",
        }
    }
}

/// A single unit of schedulable work on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmTask {
    /// Stable task identifier (e.g. "F1-implement").
    pub id: String,
    /// Feature this task implements.
    pub feature_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Prompt-level description of the work.
    #[serde(default)]
    pub description: String,
    /// Ids that must be `done` before this task is ready.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Role/owner tag assigned on dispatch.
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Attempts so far; incremented on done and failed.
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwarmTask {
    /// Creates a pending task.
    pub fn new(id: impl Into<String>, feature_id: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            feature_id: feature_id.into(),
            task_type,
            description: String::new(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            assigned_to: None,
            iterations: 0,
            result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Sets the dependencies.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Checks if this task is ready to dispatch (pending, all dependencies done).
    pub fn is_ready(&self, done_tasks: &HashSet<&str>) -> bool {
        self.status == TaskStatus::Pending
            && self
                .dependencies
                .iter()
                .all(|dep| done_tasks.contains(dep.as_str()))
    }
}

/// Derived counts over the board's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardStats {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub in_progress: usize,
    #[serde(default)]
    pub blocked: usize,
}

impl BoardStats {
    /// Recomputes stats from a task list.
    pub fn from_tasks(tasks: &[SwarmTask]) -> Self {
        let mut stats = BoardStats {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Pending => {}
            }
        }
        stats
    }

    /// Tasks still waiting to run.
    pub fn pending(&self) -> usize {
        self.total
            .saturating_sub(self.done + self.failed + self.in_progress + self.blocked)
    }
}

/// The full task graph for a swarm run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmBoard {
    pub project_name: String,
    pub features: Vec<SwarmFeature>,
    pub tasks: Vec<SwarmTask>,
    pub stats: BoardStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwarmBoard {
    /// Creates a board from an explicit task list.
    pub fn new(
        project_name: impl Into<String>,
        features: Vec<SwarmFeature>,
        tasks: Vec<SwarmTask>,
    ) -> Self {
        let now = Utc::now();
        let stats = BoardStats::from_tasks(&tasks);
        Self {
            project_name: project_name.into(),
            features,
            tasks,
            stats,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a task by id.
    pub fn task(&self, id: &str) -> Option<&SwarmTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Returns true when every task reached a terminal or blocked state.
    pub fn is_settled(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.status.is_terminal() || t.status == TaskStatus::Blocked)
    }

    /// Checks for dependency cycles using DFS. Returns the cycle path if found.
    pub fn has_cycle(&self) -> Option<String> {
        let deps: HashMap<&str, Vec<&str>> = self
            .tasks
            .iter()
            .map(|t| {
                (
                    t.id.as_str(),
                    t.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        find_cycle(&deps)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS cycle search over an id → dependency-ids map. Unknown ids are leaves.
pub(crate) fn find_cycle(deps: &HashMap<&str, Vec<&str>>) -> Option<String> {
    fn dfs<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<String> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for &dep in deps.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            match colors.get(dep) {
                Some(Color::Gray) => {
                    path.push(dep);
                    return Some(path.join(" -> "));
                }
                Some(Color::White) => {
                    if let Some(cycle) = dfs(dep, deps, colors, path) {
                        return Some(cycle);
                    }
                }
                Some(Color::Black) | None => {}
            }
        }

        colors.insert(node, Color::Black);
        path.pop();
        None
    }

    let mut colors: HashMap<&str, Color> = deps.keys().map(|&k| (k, Color::White)).collect();
    let mut ids: Vec<&str> = deps.keys().copied().collect();
    ids.sort_unstable();

    for id in ids {
        if colors.get(id) == Some(&Color::White) {
            let mut path = Vec::new();
            if let Some(cycle) = dfs(id, deps, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn task_id(feature_id: &str, task_type: TaskType) -> String {
    format!("{}-{}", feature_id, task_type.slug())
}

fn describe(feature: &SwarmFeature, task_type: TaskType) -> String {
    let mut desc = match task_type {
        TaskType::AcceptanceTest => format!("Write acceptance tests for: {}", feature.name),
        TaskType::Implement => format!("Implement feature: {}", feature.name),
        TaskType::Integrate => format!("Integrate feature into the project: {}", feature.name),
        TaskType::Review => format!("Review implementation of: {}", feature.name),
    };
    if !feature.description.is_empty() {
        desc.push_str("\n\n");
        desc.push_str(&feature.description);
    }
    if !feature.acceptance_criteria.is_empty() {
        desc.push_str("\n\nAcceptance criteria:\n");
        for criterion in &feature.acceptance_criteria {
            desc.push_str(&format!("- {}\n", criterion));
        }
    }
    desc
}

/// Builds a board from a spec.
///
/// Each feature becomes a four-task chain (acceptance-test → implement →
/// integrate → review). A feature's first task depends on the review task of
/// each feature it depends on. Feature dependencies must point at features
/// declared earlier in the list, which keeps the graph acyclic.
pub fn create_board(spec: &SwarmSpec) -> Result<SwarmBoard> {
    let mut declared: HashSet<&str> = HashSet::new();
    let mut tasks = Vec::with_capacity(spec.features.len() * TaskType::PIPELINE.len());

    for feature in &spec.features {
        for dep in &feature.dependencies {
            if !declared.contains(dep.as_str()) {
                return Err(Error::Config(format!(
                    "feature {} depends on {} which is not declared before it",
                    feature.id, dep
                )));
            }
        }
        if !declared.insert(feature.id.as_str()) {
            return Err(Error::Config(format!("duplicate feature id {}", feature.id)));
        }

        let mut previous: Option<String> = None;
        for task_type in TaskType::PIPELINE {
            let deps = match &previous {
                Some(prev) => vec![prev.clone()],
                None => feature
                    .dependencies
                    .iter()
                    .map(|dep| task_id(dep, TaskType::Review))
                    .collect(),
            };
            let id = task_id(&feature.id, task_type);
            tasks.push(
                SwarmTask::new(&id, &feature.id, task_type)
                    .with_description(describe(feature, task_type))
                    .with_dependencies(deps),
            );
            previous = Some(id);
        }
    }

    tracing::debug!(
        project = %spec.project_name,
        features = spec.features.len(),
        tasks = tasks.len(),
        "created swarm board"
    );

    Ok(SwarmBoard::new(
        spec.project_name.clone(),
        spec.features.clone(),
        tasks,
    ))
}

/// Returns the first pending task (in list order) whose dependencies are all done.
///
/// `None` means nothing is ready: either everything finished, or the remaining
/// pending tasks wait on dependencies that are not done.
pub fn get_next_task(board: &SwarmBoard) -> Option<&SwarmTask> {
    let done = done_ids(board);
    board.tasks.iter().find(|t| t.is_ready(&done))
}

/// Returns every pending task whose dependencies are all done, in list order.
pub fn ready_tasks(board: &SwarmBoard) -> Vec<&SwarmTask> {
    let done = done_ids(board);
    board.tasks.iter().filter(|t| t.is_ready(&done)).collect()
}

fn done_ids(board: &SwarmBoard) -> HashSet<&str> {
    board
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .map(|t| t.id.as_str())
        .collect()
}

/// Moves a pending task to `in_progress`, tagging it with an optional owner.
pub fn mark_task_in_progress(
    board: &SwarmBoard,
    task_id: &str,
    assigned_to: Option<&str>,
) -> Result<SwarmBoard> {
    transition(board, task_id, TaskStatus::InProgress, |task| {
        task.assigned_to = assigned_to.map(String::from);
    })
}

/// Moves an in-progress task to `done`, storing its result.
pub fn mark_task_done(board: &SwarmBoard, task_id: &str, result: &str) -> Result<SwarmBoard> {
    transition(board, task_id, TaskStatus::Done, |task| {
        task.result = Some(result.to_string());
        task.failure_reason = None;
        task.iterations += 1;
    })
}

/// Moves an in-progress task to `failed`, storing the reason.
pub fn mark_task_failed(board: &SwarmBoard, task_id: &str, reason: &str) -> Result<SwarmBoard> {
    transition(board, task_id, TaskStatus::Failed, |task| {
        task.failure_reason = Some(reason.to_string());
        task.result = None;
        task.iterations += 1;
    })
}

/// Moves a pending task to `blocked`, recording why it can no longer run.
pub fn mark_task_blocked(board: &SwarmBoard, task_id: &str, reason: &str) -> Result<SwarmBoard> {
    transition(board, task_id, TaskStatus::Blocked, |task| {
        task.failure_reason = Some(reason.to_string());
    })
}

/// Pending tasks with at least one failed or blocked dependency, with the offending id.
pub fn blocked_by_failure(board: &SwarmBoard) -> Vec<(&SwarmTask, &str)> {
    let dead: HashSet<&str> = board
        .tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
        .map(|t| t.id.as_str())
        .collect();

    board
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter_map(|t| {
            t.dependencies
                .iter()
                .find(|dep| dead.contains(dep.as_str()))
                .map(|dep| (t, dep.as_str()))
        })
        .collect()
}

fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::InProgress, TaskStatus::Done)
            | (TaskStatus::InProgress, TaskStatus::Failed)
            | (TaskStatus::Pending, TaskStatus::Blocked)
    )
}

fn transition(
    board: &SwarmBoard,
    task_id: &str,
    to: TaskStatus,
    apply: impl FnOnce(&mut SwarmTask),
) -> Result<SwarmBoard> {
    let index = board
        .tasks
        .iter()
        .position(|t| t.id == task_id)
        .ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;

    let from = board.tasks[index].status;
    if !can_transition(from, to) {
        return Err(Error::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
        });
    }

    let now = Utc::now();
    let mut next = board.clone();
    let task = &mut next.tasks[index];
    task.status = to;
    task.updated_at = now;
    apply(task);

    next.stats = BoardStats::from_tasks(&next.tasks);
    next.updated_at = now;

    tracing::debug!(task_id = %task_id, from = %from, to = %to, "task transition");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(features: Vec<SwarmFeature>) -> SwarmSpec {
        let mut spec = SwarmSpec::new("demo");
        spec.features = features;
        spec
    }

    fn two_feature_board() -> SwarmBoard {
        create_board(&spec_with(vec![
            SwarmFeature::new("F1", "Login"),
            SwarmFeature::new("F2", "Logout").with_dependencies(vec!["F1".to_string()]),
        ]))
        .unwrap()
    }

    fn run_to_done(board: &SwarmBoard, id: &str) -> SwarmBoard {
        let board = mark_task_in_progress(board, id, None).unwrap();
        mark_task_done(&board, id, "ok").unwrap()
    }

    fn assert_stats_consistent(board: &SwarmBoard) {
        let stats = board.stats;
        assert_eq!(stats, BoardStats::from_tasks(&board.tasks));
        assert_eq!(stats.total, board.tasks.len());
        let pending = board
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        assert_eq!(
            stats.done + stats.failed + stats.in_progress + stats.blocked + pending,
            board.tasks.len()
        );
        assert_eq!(stats.pending(), pending);
    }

    #[test]
    fn create_board_chains_feature_pipeline() {
        let board = two_feature_board();

        assert_eq!(board.tasks.len(), 8);
        assert_eq!(board.tasks[0].id, "F1-acceptance-test");
        assert!(board.tasks[0].dependencies.is_empty());
        assert_eq!(board.tasks[1].dependencies, vec!["F1-acceptance-test"]);
        assert_eq!(board.tasks[3].task_type, TaskType::Review);
        assert_eq!(board.tasks[4].dependencies, vec!["F1-review"]);
        assert!(board.has_cycle().is_none());
        assert_eq!(board.stats.total, 8);
    }

    #[test]
    fn create_board_rejects_forward_feature_dependency() {
        let result = create_board(&spec_with(vec![
            SwarmFeature::new("F1", "a").with_dependencies(vec!["F2".to_string()]),
            SwarmFeature::new("F2", "b"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn create_board_includes_acceptance_criteria_in_description() {
        let board = create_board(&spec_with(vec![SwarmFeature::new("F1", "Login")
            .with_acceptance_criteria(vec!["rejects bad password".to_string()])]))
        .unwrap();

        assert!(board.tasks[0].description.contains("rejects bad password"));
    }

    #[test]
    fn next_task_is_first_ready_in_list_order() {
        let board = create_board(&spec_with(vec![
            SwarmFeature::new("F1", "a"),
            SwarmFeature::new("F2", "b"),
        ]))
        .unwrap();

        assert_eq!(get_next_task(&board).unwrap().id, "F1-acceptance-test");
        assert_eq!(ready_tasks(&board).len(), 2);
    }

    #[test]
    fn next_task_never_has_undone_dependency() {
        let mut board = two_feature_board();
        while let Some(task) = get_next_task(&board) {
            for dep in &task.dependencies {
                assert_eq!(board.task(dep).unwrap().status, TaskStatus::Done);
            }
            let id = task.id.clone();
            board = run_to_done(&board, &id);
            assert_stats_consistent(&board);
        }
        assert_eq!(board.stats.done, 8);
        assert!(board.is_settled());
    }

    #[test]
    fn next_task_is_none_when_dependency_failed() {
        let board = two_feature_board();
        let board = mark_task_in_progress(&board, "F1-acceptance-test", Some("tester")).unwrap();
        let board = mark_task_failed(&board, "F1-acceptance-test", "no framework").unwrap();

        assert!(get_next_task(&board).is_none());
        assert!(!board.is_settled());
        assert_stats_consistent(&board);
    }

    #[test]
    fn transitions_do_not_mutate_input_board() {
        let board = two_feature_board();
        let snapshot = board.clone();

        let started = mark_task_in_progress(&board, "F1-acceptance-test", None).unwrap();
        let finished = mark_task_done(&started, "F1-acceptance-test", "tests written").unwrap();

        assert_eq!(board, snapshot);
        assert_eq!(started.tasks[0].status, TaskStatus::InProgress);
        assert_eq!(finished.tasks[0].status, TaskStatus::Done);
        assert!(!std::ptr::eq(started.tasks.as_ptr(), finished.tasks.as_ptr()));
    }

    #[test]
    fn done_stores_result_and_counts_iteration() {
        let board = run_to_done(&two_feature_board(), "F1-acceptance-test");
        let task = board.task("F1-acceptance-test").unwrap();

        assert_eq!(task.result.as_deref(), Some("ok"));
        assert!(task.failure_reason.is_none());
        assert_eq!(task.iterations, 1);
        assert!(task.updated_at >= task.created_at);
        assert_eq!(board.stats.done, 1);
    }

    #[test]
    fn failed_stores_reason_and_counts_iteration() {
        let board = mark_task_in_progress(&two_feature_board(), "F1-acceptance-test", None).unwrap();
        let board = mark_task_failed(&board, "F1-acceptance-test", "boom").unwrap();
        let task = board.task("F1-acceptance-test").unwrap();

        assert_eq!(task.failure_reason.as_deref(), Some("boom"));
        assert!(task.result.is_none());
        assert_eq!(task.iterations, 1);
        assert_eq!(board.stats.failed, 1);
    }

    #[test]
    fn in_progress_records_owner() {
        let board =
            mark_task_in_progress(&two_feature_board(), "F1-acceptance-test", Some("tester-1"))
                .unwrap();
        assert_eq!(board.tasks[0].assigned_to.as_deref(), Some("tester-1"));
        assert_eq!(board.stats.in_progress, 1);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let board = two_feature_board();
        let result = mark_task_done(&board, "F1-acceptance-test", "skip ahead");
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Done,
                ..
            })
        ));

        let done = run_to_done(&board, "F1-acceptance-test");
        assert!(mark_task_in_progress(&done, "F1-acceptance-test", None).is_err());
    }

    #[test]
    fn unknown_task_is_rejected() {
        let result = mark_task_in_progress(&two_feature_board(), "nope", None);
        assert!(matches!(result, Err(Error::UnknownTask(id)) if id == "nope"));
    }

    #[test]
    fn blocked_by_failure_lists_direct_dependents_only() {
        let board = mark_task_in_progress(&two_feature_board(), "F1-acceptance-test", None).unwrap();
        let board = mark_task_failed(&board, "F1-acceptance-test", "boom").unwrap();

        let stuck = blocked_by_failure(&board);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].0.id, "F1-implement");
        assert_eq!(stuck[0].1, "F1-acceptance-test");

        // The next task down is listed once its own dependency is blocked.
        let board = mark_task_blocked(&board, "F1-implement", "dependency failed").unwrap();
        let stuck = blocked_by_failure(&board);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].0.id, "F1-integrate");
        assert_eq!(board.stats.blocked, 1);
        assert_stats_consistent(&board);
    }

    #[test]
    fn detects_cycle_in_loaded_board() {
        let board = SwarmBoard::new(
            "p",
            vec![],
            vec![
                SwarmTask::new("A", "F", TaskType::Implement).with_dependencies(vec!["B".into()]),
                SwarmTask::new("B", "F", TaskType::Review).with_dependencies(vec!["A".into()]),
            ],
        );
        assert!(board.has_cycle().is_some());
    }

    #[test]
    fn board_serializes_with_camel_case_fields() {
        let board = two_feature_board();
        let json = serde_json::to_string(&board).unwrap();

        assert!(json.contains("\"projectName\":\"demo\""));
        assert!(json.contains("\"featureId\":\"F1\""));
        assert!(json.contains("\"type\":\"acceptance-test\""));
        assert!(json.contains("\"inProgress\":0"));
        assert!(json.contains("\"createdAt\""));
    }

    #[test]
    fn task_status_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(TaskStatus::Blocked.to_string(), "blocked");
    }
}
