//! Swarm mode: a feature spec turned into a persisted task board.

pub mod board;
pub mod driver;
pub mod spec;
pub mod store;

pub use board::{
    blocked_by_failure, create_board, get_next_task, mark_task_blocked, mark_task_done,
    mark_task_failed, mark_task_in_progress, ready_tasks, BoardStats, SwarmBoard, SwarmTask,
    TaskStatus, TaskType,
};
pub(crate) use board::find_cycle;
pub use driver::BoardDriver;
pub use spec::{Priority, QualityConfig, SwarmFeature, SwarmSpec};
pub use store::BoardStore;
