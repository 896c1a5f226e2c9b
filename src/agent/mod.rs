//! Agent executor seam: the minimal task contract and the trait that runs it.
//!
//! The orchestration core never looks inside an agent's output except where
//! the sprint runner scrapes it for scores and test counts.

mod command;

pub use command::CommandExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A unit of work handed to an agent executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTask {
    /// Task id, unique within one dispatch batch.
    pub id: String,
    /// What the agent should do.
    pub description: String,
    /// Extra context (role, sprint, acceptance criteria).
    #[serde(default)]
    pub context: String,
    /// Ids in the same batch that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AgentTask {
    /// Creates a task with no context or dependencies.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            context: String::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Sets the dependencies.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Renders the prompt sent to an agent.
    pub fn prompt(&self) -> String {
        if self.context.is_empty() {
            self.description.clone()
        } else {
            format!("{}\n\n## Context\n\n{}", self.description, self.context)
        }
    }
}

/// Text produced by an agent for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: String,
}

impl AgentOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Trait for anything that can carry out an [`AgentTask`].
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Runs the task and returns its text output, or an error.
    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput>;

    /// Returns the name of this executor.
    fn name(&self) -> &str;
}
