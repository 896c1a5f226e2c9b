//! Orchestrator configuration, loaded from `.coco/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validate::{Validate, ValidationResult};

/// Environment variable overriding `paths.state_dir`.
pub const STATE_DIR_ENV: &str = "COCO_STATE_DIR";

/// Agent dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on concurrent agents; the resource monitor may report less.
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,
    /// Agent CLI binary.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Arguments placed before the prompt.
    #[serde(default = "default_agent_args")]
    pub agent_args: Vec<String>,
    /// Wall-clock limit per agent task in seconds.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
}

fn default_max_parallel_agents() -> usize {
    4
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_agent_timeout() -> u64 {
    1800 // 30 minutes
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: default_max_parallel_agents(),
            agent_command: default_agent_command(),
            agent_args: default_agent_args(),
            agent_timeout_secs: default_agent_timeout(),
        }
    }
}

impl ExecutionConfig {
    /// Returns the agent timeout as a Duration.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

/// Gate settings used when a backlog file does not set its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySettings {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_max_iterations_per_sprint")]
    pub max_iterations_per_sprint: u32,
}

fn default_threshold() -> u32 {
    85
}

fn default_max_iterations_per_sprint() -> u32 {
    3
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_iterations_per_sprint: default_max_iterations_per_sprint(),
        }
    }
}

/// Test command run by the test gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default = "default_test_command")]
    pub command: String,
    #[serde(default = "default_test_args")]
    pub args: Vec<String>,
}

fn default_test_command() -> String {
    "cargo".to_string()
}

fn default_test_args() -> Vec<String> {
    vec!["test".to_string()]
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
            args: default_test_args(),
        }
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of persisted state; board and sprint results live below it.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".coco")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub quality: QualitySettings,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl OrchestratorConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    /// `COCO_STATE_DIR` overrides `paths.state_dir` either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            tracing::debug!(path = %path.display(), "loaded configuration");
            config
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };
        config.apply_env(std::env::var(STATE_DIR_ENV).ok());
        Ok(config)
    }

    fn apply_env(&mut self, state_dir: Option<String>) {
        if let Some(dir) = state_dir.filter(|d| !d.trim().is_empty()) {
            self.paths.state_dir = PathBuf::from(dir);
        }
    }

    /// State directory resolved against a project directory.
    pub fn state_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.paths.state_dir)
    }
}

impl Validate for OrchestratorConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.execution.max_parallel_agents == 0 {
            result.add_warning("execution.max_parallel_agents is 0, agents will run one at a time");
        }
        if self.execution.agent_command.trim().is_empty() {
            result.add_error("execution.agent_command cannot be empty");
        }
        if self.execution.agent_timeout_secs == 0 {
            result.add_error("execution.agent_timeout_secs must be greater than 0");
        }
        if self.quality.threshold > 100 {
            result.add_error("quality.threshold must be between 0 and 100");
        }
        if self.quality.max_iterations_per_sprint == 0 {
            result.add_error("quality.max_iterations_per_sprint must be at least 1");
        }
        if self.tests.command.trim().is_empty() {
            result.add_error("tests.command cannot be empty");
        }

        result
    }
}
