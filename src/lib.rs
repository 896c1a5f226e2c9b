//! coco orchestration engine
//!
//! Dependency-graph task boards, a bounded-parallel coordinator that
//! dispatches agent tasks level by level, and a sprint runner that iterates
//! work against test and quality gates until it converges.

pub mod agent;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod persist;
pub mod sprint;
pub mod swarm;
pub mod validate;

pub use agent::{AgentExecutor, AgentOutput, AgentTask, CommandExecutor};
pub use config::OrchestratorConfig;
pub use coordinator::{
    compute_levels, Coordinator, DispatchOptions, DispatchResult, ExecutionOutput, TaskError,
};
pub use error::{Error, Result};
pub use monitor::{FixedResourceMonitor, ResourceMonitor, SystemResourceMonitor};
pub use sprint::{
    parse_quality_score, parse_test_counts, AgentRole, BacklogSpec, BacklogTask, BuildResult,
    CommandTestRunner, Sprint, SprintProgress, SprintResult, SprintResultStore, SprintRunner,
    TestFailure, TestRunResult, TestRunner, DEFAULT_QUALITY_SCORE,
};
pub use swarm::{
    create_board, get_next_task, mark_task_blocked, mark_task_done, mark_task_failed,
    mark_task_in_progress, BoardDriver, BoardStats, BoardStore, SwarmBoard, SwarmFeature,
    SwarmSpec, SwarmTask, TaskStatus, TaskType,
};
pub use validate::{Validate, ValidationResult};
