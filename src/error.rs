//! Error types for the coco orchestration engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::swarm::TaskStatus;

/// Top-level error type for orchestration operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing orchestration state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML spec could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration or spec error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A persisted state file is missing.
    #[error("state file not found: {0}")]
    MissingState(PathBuf),

    /// A task id is not present in the board.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The requested status change is not a legal transition.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Dependency cycle detected in a task batch or board.
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// An agent executor failed to run a task.
    #[error("executor failed on {task_id}: {message}")]
    Executor { task_id: String, message: String },

    /// The test runner could not execute.
    #[error("test runner failed: {0}")]
    TestRunner(String),
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
