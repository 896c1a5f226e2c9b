//! Agent executor that shells out to a headless coding-agent CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{AgentExecutor, AgentOutput, AgentTask};

/// Runs each task as `<cli> <args...> <prompt>` in the project directory.
pub struct CommandExecutor {
    /// Path to the agent CLI binary.
    cli_path: String,
    /// Arguments placed before the prompt.
    args: Vec<String>,
    /// Working directory for the agent.
    working_dir: PathBuf,
    /// Wall-clock limit per task.
    timeout: Duration,
}

impl CommandExecutor {
    /// Creates an executor using the `claude --print` headless mode.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: "claude".to_string(),
            args: vec!["--print".to_string()],
            working_dir: working_dir.into(),
            timeout: Duration::from_secs(1800),
        }
    }

    /// Sets the CLI binary and leading arguments.
    pub fn with_command(mut self, cli_path: impl Into<String>, args: Vec<String>) -> Self {
        self.cli_path = cli_path.into();
        self.args = args;
        self
    }

    /// Sets the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the full argument list for a task.
    fn build_args(&self, task: &AgentTask) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(task.prompt());
        args
    }
}

#[async_trait]
impl AgentExecutor for CommandExecutor {
    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        tracing::info!(
            task_id = %task.id,
            cli = %self.cli_path,
            working_dir = ?self.working_dir,
            "running agent"
        );

        let child = Command::new(&self.cli_path)
            .args(self.build_args(task))
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Executor {
                task_id: task.id.clone(),
                message: format!("failed to spawn {}: {}", self.cli_path, e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Executor {
                task_id: task.id.clone(),
                message: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| Error::Executor {
                task_id: task.id.clone(),
                message: format!("failed to wait for {}: {}", self.cli_path, e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Executor {
                task_id: task.id.clone(),
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        tracing::debug!(task_id = %task.id, bytes = stdout.len(), "agent finished");
        Ok(AgentOutput::new(stdout))
    }

    fn name(&self) -> &str {
        &self.cli_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_is_claude_print() {
        let executor = CommandExecutor::new("/tmp");
        let args = executor.build_args(&AgentTask::new("T1", "do it"));
        assert_eq!(executor.name(), "claude");
        assert_eq!(args, vec!["--print", "do it"]);
    }

    #[test]
    fn custom_command_keeps_prompt_last() {
        let executor = CommandExecutor::new("/tmp")
            .with_command("agent", vec!["run".to_string(), "--quiet".to_string()]);
        let args = executor.build_args(&AgentTask::new("T1", "task").with_context("ctx"));
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "--quiet");
        assert!(args[2].contains("ctx"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let executor = CommandExecutor::new(std::env::temp_dir())
            .with_command("echo", vec!["score: 90".to_string()]);
        let out = executor.execute(&AgentTask::new("T1", "ignored")).await.unwrap();
        assert!(out.output.contains("score: 90"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_executor_error() {
        let executor = CommandExecutor::new(std::env::temp_dir()).with_command("false", vec![]);
        let err = executor.execute(&AgentTask::new("T1", "x")).await.unwrap_err();
        assert!(matches!(err, Error::Executor { task_id, .. } if task_id == "T1"));
    }

    #[tokio::test]
    async fn missing_binary_is_executor_error() {
        let executor = CommandExecutor::new(std::env::temp_dir())
            .with_command("definitely-not-an-agent-cli-xyz", vec![]);
        let err = executor.execute(&AgentTask::new("T1", "x")).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
