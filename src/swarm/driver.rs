//! Runs a persisted board to quiescence, one task at a time.

use std::sync::Arc;

use uuid::Uuid;

use super::board::{
    blocked_by_failure, get_next_task, mark_task_blocked, mark_task_done, mark_task_failed,
    mark_task_in_progress, SwarmBoard, SwarmTask, TaskStatus,
};
use super::store::BoardStore;
use crate::agent::{AgentExecutor, AgentTask};
use crate::error::Result;
use crate::sprint::AgentRole;

/// Drives a board with an agent executor, persisting after every transition.
///
/// Tasks run sequentially in readiness order. The store is the only writer
/// of the board file while the driver runs.
pub struct BoardDriver {
    store: BoardStore,
    executor: Arc<dyn AgentExecutor>,
}

impl BoardDriver {
    pub fn new(store: BoardStore, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { store, executor }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    /// Loads the persisted board and runs it.
    ///
    /// Tasks still `in_progress` were cut off by an earlier run and have no
    /// live agent, so they are failed first and their dependents end blocked.
    pub async fn resume(&self) -> Result<SwarmBoard> {
        let board = fail_interrupted(self.store.load()?)?;
        self.run(board).await
    }

    /// Runs every ready task until none is left, then marks stalled tasks blocked.
    ///
    /// Execution failures land on the board as `failed` tasks; only
    /// persistence and transition errors are returned.
    pub async fn run(&self, board: SwarmBoard) -> Result<SwarmBoard> {
        let mut board = board;
        self.store.save(&board)?;

        tracing::info!(
            project = %board.project_name,
            tasks = board.stats.total,
            executor = %self.executor.name(),
            "driving swarm board"
        );

        while let Some(task) = get_next_task(&board).cloned() {
            board = self.run_task(&board, &task).await?;
        }

        board = block_stalled(board)?;
        self.store.save(&board)?;

        tracing::info!(
            done = board.stats.done,
            failed = board.stats.failed,
            blocked = board.stats.blocked,
            pending = board.stats.pending(),
            "swarm board settled"
        );
        Ok(board)
    }

    async fn run_task(&self, board: &SwarmBoard, task: &SwarmTask) -> Result<SwarmBoard> {
        let role = AgentRole::from(task.task_type);
        let owner = format!("{}-{}", role, &Uuid::new_v4().simple().to_string()[..8]);

        let board = mark_task_in_progress(board, &task.id, Some(&owner))?;
        self.store.save(&board)?;

        let agent_task = AgentTask::new(&task.id, &task.description)
            .with_context(format!("role: {}\nfeature: {}", role, task.feature_id));

        let board = match self.executor.execute(&agent_task).await {
            Ok(output) => {
                tracing::info!(task_id = %task.id, owner = %owner, "task done");
                mark_task_done(&board, &task.id, &output.output)?
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, owner = %owner, error = %e, "task failed");
                mark_task_failed(&board, &task.id, &e.to_string())?
            }
        };
        self.store.save(&board)?;
        Ok(board)
    }
}

/// Reason recorded on tasks found `in_progress` when a board is resumed.
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

fn fail_interrupted(mut board: SwarmBoard) -> Result<SwarmBoard> {
    let stale: Vec<String> = board
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .map(|t| t.id.clone())
        .collect();
    for task_id in stale {
        tracing::warn!(task_id = %task_id, "task was interrupted, marking failed");
        board = mark_task_failed(&board, &task_id, INTERRUPTED_REASON)?;
    }
    Ok(board)
}

/// Marks pending tasks behind failed or blocked dependencies as blocked, transitively.
fn block_stalled(mut board: SwarmBoard) -> Result<SwarmBoard> {
    loop {
        let stalled: Vec<(String, String)> = blocked_by_failure(&board)
            .into_iter()
            .map(|(task, dep)| (task.id.clone(), dep.to_string()))
            .collect();
        if stalled.is_empty() {
            return Ok(board);
        }
        for (task_id, dep) in stalled {
            tracing::debug!(task_id = %task_id, dependency = %dep, "blocking task");
            board = mark_task_blocked(&board, &task_id, &format!("dependency {} did not complete", dep))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOutput;
    use crate::error::Error;
    use crate::swarm::{create_board, SwarmFeature, SwarmSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fails any task whose id contains the configured marker.
    struct ScriptedExecutor {
        fail_marker: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(fail_marker: Option<&str>) -> Self {
            Self {
                fail_marker: fail_marker.map(String::from),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
            self.seen.lock().unwrap().push(task.id.clone());
            match &self.fail_marker {
                Some(marker) if task.id.contains(marker.as_str()) => Err(Error::Executor {
                    task_id: task.id.clone(),
                    message: "agent gave up".to_string(),
                }),
                _ => Ok(AgentOutput::new(format!("finished {}", task.id))),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn two_feature_board() -> SwarmBoard {
        let mut spec = SwarmSpec::new("driver-test");
        spec.features = vec![
            SwarmFeature::new("auth", "Auth"),
            SwarmFeature::new("api", "API").with_dependencies(vec!["auth".to_string()]),
        ];
        create_board(&spec).unwrap()
    }

    #[tokio::test]
    async fn runs_all_tasks_in_pipeline_order() {
        let temp_dir = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::new(None));
        let driver = BoardDriver::new(BoardStore::new(temp_dir.path()), executor.clone());

        let board = driver.run(two_feature_board()).await.unwrap();

        assert_eq!(board.stats.done, 8);
        assert!(board.is_settled());
        let seen = executor.seen.lock().unwrap().clone();
        assert_eq!(seen[0], "auth-acceptance-test");
        assert_eq!(seen[3], "auth-review");
        assert_eq!(seen[4], "api-acceptance-test");

        let task = board.task("auth-implement").unwrap();
        assert_eq!(task.iterations, 1);
        assert!(task.assigned_to.as_deref().unwrap().starts_with("coder-"));
        assert_eq!(task.result.as_deref(), Some("finished auth-implement"));

        let persisted = driver.store().load().unwrap();
        assert_eq!(persisted, board);
    }

    #[tokio::test]
    async fn failure_blocks_downstream_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::new(Some("auth-implement")));
        let driver = BoardDriver::new(BoardStore::new(temp_dir.path()), executor);

        let board = driver.run(two_feature_board()).await.unwrap();

        assert_eq!(board.stats.done, 1);
        assert_eq!(board.stats.failed, 1);
        assert_eq!(board.stats.blocked, 6);
        assert_eq!(board.stats.pending(), 0);

        let failed = board.task("auth-implement").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.failure_reason.as_deref().unwrap().contains("agent gave up"));

        let blocked = board.task("api-review").unwrap();
        assert_eq!(blocked.status, TaskStatus::Blocked);
        assert!(blocked.failure_reason.is_some());
    }

    #[tokio::test]
    async fn resume_fails_interrupted_task_and_finishes_the_rest() {
        let temp_dir = TempDir::new().unwrap();
        let store = BoardStore::new(temp_dir.path());
        let mut spec = SwarmSpec::new("resume-test");
        spec.features = vec![
            SwarmFeature::new("auth", "Auth"),
            SwarmFeature::new("api", "API").with_dependencies(vec!["auth".to_string()]),
            SwarmFeature::new("docs", "Docs"),
        ];
        let board = create_board(&spec).unwrap();
        let board = mark_task_in_progress(&board, "auth-acceptance-test", Some("tester-1234abcd")).unwrap();
        store.save(&board).unwrap();

        let executor = Arc::new(ScriptedExecutor::new(None));
        let driver = BoardDriver::new(store, executor.clone());
        let board = driver.resume().await.unwrap();

        assert_eq!(board.stats.in_progress, 0);
        assert_eq!(board.stats.pending(), 0);
        assert_eq!(board.stats.failed, 1);
        assert_eq!(board.stats.blocked, 7);
        assert_eq!(board.stats.done, 4);

        let interrupted = board.task("auth-acceptance-test").unwrap();
        assert_eq!(interrupted.status, TaskStatus::Failed);
        assert_eq!(interrupted.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
        assert!(!executor
            .seen
            .lock()
            .unwrap()
            .contains(&"auth-acceptance-test".to_string()));
        assert_eq!(driver.store().load().unwrap(), board);
    }

    #[test]
    fn block_stalled_follows_the_whole_chain() {
        let board = mark_task_in_progress(&two_feature_board(), "auth-acceptance-test", None).unwrap();
        let board = mark_task_failed(&board, "auth-acceptance-test", "boom").unwrap();

        let board = block_stalled(board).unwrap();

        assert_eq!(board.stats.blocked, 7);
        assert_eq!(board.stats.pending(), 0);
        let last = board.task("api-review").unwrap();
        assert_eq!(last.status, TaskStatus::Blocked);
        assert_eq!(
            last.failure_reason.as_deref(),
            Some("dependency api-integrate did not complete")
        );
    }

    #[tokio::test]
    async fn resume_without_board_is_missing_state() {
        let temp_dir = TempDir::new().unwrap();
        let driver = BoardDriver::new(
            BoardStore::new(temp_dir.path()),
            Arc::new(ScriptedExecutor::new(None)),
        );
        assert!(matches!(driver.resume().await, Err(Error::MissingState(_))));
    }
}
