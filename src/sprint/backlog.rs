//! Sprint backlog: the input of the sprint runner.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::gates::INTEGRATION_SPRINT_ID;
use super::result::sprint_id_problem;
use crate::agent::AgentTask;
use crate::error::Result;
use crate::swarm::{SwarmBoard, SwarmSpec, TaskType};
use crate::validate::{Validate, ValidationResult};

/// Kind of agent a backlog task is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Researcher,
    Coder,
    Tester,
    Reviewer,
    Optimizer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Researcher => "researcher",
            AgentRole::Coder => "coder",
            AgentRole::Tester => "tester",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Optimizer => "optimizer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TaskType> for AgentRole {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::AcceptanceTest => AgentRole::Tester,
            TaskType::Implement | TaskType::Integrate => AgentRole::Coder,
            TaskType::Review => AgentRole::Reviewer,
        }
    }
}

/// One task in a sprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogTask {
    pub id: String,
    pub role: AgentRole,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of tasks in the same sprint that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl BacklogTask {
    pub fn new(id: impl Into<String>, role: AgentRole, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Converts to the coordinator's task contract.
    pub fn to_agent_task(&self, sprint: &Sprint) -> AgentTask {
        let description = if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.description)
        };

        let mut context = format!(
            "Role: {}\nSprint: {} ({})",
            self.role, sprint.name, sprint.id
        );
        if !self.acceptance_criteria.is_empty() {
            context.push_str("\n\nAcceptance criteria:");
            for criterion in &self.acceptance_criteria {
                context.push_str(&format!("\n- {}", criterion));
            }
        }

        AgentTask::new(&self.id, description)
            .with_context(context)
            .with_dependencies(self.dependencies.clone())
    }
}

/// A named group of tasks iterated against the gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<BacklogTask>,
}

impl Sprint {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<BacklogTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// The sprint's tasks as coordinator tasks.
    pub fn agent_tasks(&self) -> Vec<AgentTask> {
        self.tasks.iter().map(|t| t.to_agent_task(self)).collect()
    }
}

/// Ordered sprints plus the gate settings they run under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogSpec {
    pub sprints: Vec<Sprint>,
    #[serde(default = "default_max_iterations_per_sprint")]
    pub max_iterations_per_sprint: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u32,
    /// Project directory the agents and the test runner work in.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

/// A backlog file as written, before gate defaults are filled in.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BacklogFile {
    sprints: Vec<Sprint>,
    max_iterations_per_sprint: Option<u32>,
    quality_threshold: Option<u32>,
    #[serde(default = "default_output_path")]
    output_path: PathBuf,
}

fn default_max_iterations_per_sprint() -> u32 {
    3
}

fn default_quality_threshold() -> u32 {
    85
}

fn default_output_path() -> PathBuf {
    PathBuf::from(".")
}

impl BacklogSpec {
    pub fn new(sprints: Vec<Sprint>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            sprints,
            max_iterations_per_sprint: default_max_iterations_per_sprint(),
            quality_threshold: default_quality_threshold(),
            output_path: output_path.into(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations_per_sprint = max;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: u32) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Loads a backlog from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_defaults(
            path,
            default_max_iterations_per_sprint(),
            default_quality_threshold(),
        )
    }

    /// Loads a backlog, taking the gate settings the file leaves out from
    /// the given defaults.
    pub fn load_with_defaults(
        path: &Path,
        max_iterations_per_sprint: u32,
        quality_threshold: u32,
    ) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: BacklogFile = serde_yaml::from_str(&contents)?;
        Ok(Self {
            sprints: file.sprints,
            max_iterations_per_sprint: file
                .max_iterations_per_sprint
                .unwrap_or(max_iterations_per_sprint),
            quality_threshold: file.quality_threshold.unwrap_or(quality_threshold),
            output_path: file.output_path,
        })
    }

    /// Builds a backlog with one sprint per feature of a swarm board.
    ///
    /// Each sprint holds the feature's four board tasks. Dependencies on
    /// other features are dropped since sprints already run in order.
    pub fn from_swarm(spec: &SwarmSpec, board: &SwarmBoard, output_path: impl Into<PathBuf>) -> Self {
        let sprints = board
            .features
            .iter()
            .map(|feature| {
                let tasks = board
                    .tasks
                    .iter()
                    .filter(|t| t.feature_id == feature.id)
                    .map(|t| {
                        let deps = t
                            .dependencies
                            .iter()
                            .filter(|dep| {
                                board
                                    .task(dep)
                                    .is_some_and(|d| d.feature_id == feature.id)
                            })
                            .cloned()
                            .collect();
                        BacklogTask::new(&t.id, AgentRole::from(t.task_type), t.task_type.slug())
                            .with_description(&t.description)
                            .with_acceptance_criteria(feature.acceptance_criteria.clone())
                            .with_dependencies(deps)
                    })
                    .collect();
                Sprint::new(&feature.id, &feature.name).with_tasks(tasks)
            })
            .collect();

        Self {
            sprints,
            max_iterations_per_sprint: spec.quality_config.max_iterations,
            quality_threshold: spec.quality_config.min_score,
            output_path: output_path.into(),
        }
    }
}

impl Validate for BacklogSpec {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.sprints.is_empty() {
            result.add_warning("backlog has no sprints");
        }
        if self.max_iterations_per_sprint == 0 {
            result.add_error("maxIterationsPerSprint must be at least 1");
        }
        if self.quality_threshold > 100 {
            result.add_error("qualityThreshold must be between 0 and 100");
        }

        let mut sprint_ids: HashSet<&str> = HashSet::new();
        for sprint in &self.sprints {
            if let Some(problem) = sprint_id_problem(&sprint.id) {
                result.add_error(format!("sprint '{}' id '{}' {}", sprint.name, sprint.id, problem));
            }
            if sprint.id == INTEGRATION_SPRINT_ID {
                result.add_error(format!(
                    "sprint id '{}' is reserved for the integration sprint",
                    INTEGRATION_SPRINT_ID
                ));
            }
            if !sprint_ids.insert(sprint.id.as_str()) {
                result.add_error(format!("duplicate sprint id {}", sprint.id));
            }
            if sprint.tasks.is_empty() {
                result.add_warning(format!("sprint {} has no tasks", sprint.id));
            }

            let task_ids: HashSet<&str> = sprint.tasks.iter().map(|t| t.id.as_str()).collect();
            if task_ids.len() != sprint.tasks.len() {
                result.add_error(format!("sprint {} has duplicate task ids", sprint.id));
            }
            for task in &sprint.tasks {
                for dep in &task.dependencies {
                    if !task_ids.contains(dep.as_str()) {
                        result.add_warning(format!(
                            "task {} depends on {} which is not in sprint {}",
                            task.id, dep, sprint.id
                        ));
                    }
                }
            }
        }

        result
    }
}
