//! Sprint mode: a backlog of sprints, each iterated against test and quality
//! gates, followed by one integration sprint.

pub mod backlog;
pub mod gates;
pub mod result;
pub mod runner;

pub use backlog::{AgentRole, BacklogSpec, BacklogTask, Sprint};
pub use gates::{
    extract_quality_score, parse_quality_score, parse_test_counts, parse_test_output,
    CommandTestRunner, FixTaskBuilder, TestCounts, TestFailure, TestRunResult, TestRunner,
    DEFAULT_QUALITY_SCORE, INTEGRATION_SPRINT_ID, MAX_FAILURES_IN_FIX_TASK,
};
pub use result::{BuildResult, SprintResult, SprintResultStore};
pub use runner::{SprintProgress, SprintRunner};
