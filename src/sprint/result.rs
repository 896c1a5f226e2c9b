//! Sprint and build results, the aggregator, and the sprint-result store.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic};

/// Outcome of one sprint. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintResult {
    pub sprint_id: String,
    pub success: bool,
    pub tests_total: u32,
    pub tests_passing: u32,
    /// Last quality score (0-100).
    pub quality_score: u32,
    pub duration_ms: u64,
    /// Gate iterations performed.
    pub iterations: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Aggregate over every feature sprint plus the integration sprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// True iff every sprint, integration included, succeeded.
    pub success: bool,
    /// Feature sprints in run order, then the integration sprint.
    pub sprint_results: Vec<SprintResult>,
    /// Tests across feature sprints only.
    pub total_tests: u32,
    /// Wall clock from the first sprint's start to aggregation.
    pub total_duration_ms: u64,
    /// Rounded mean quality score over all sprints.
    pub final_quality_score: u32,
    pub output_path: PathBuf,
}

impl BuildResult {
    /// Combines feature-sprint results with the integration result.
    ///
    /// The integration sprint re-runs the same suite, so its tests are left
    /// out of `total_tests` but its score counts towards the mean.
    pub fn aggregate(
        feature_results: Vec<SprintResult>,
        integration: SprintResult,
        started: Instant,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        let total_tests = feature_results.iter().map(|r| r.tests_total).sum();

        let mut sprint_results = feature_results;
        sprint_results.push(integration);

        let success = sprint_results.iter().all(|r| r.success);
        let score_sum: u64 = sprint_results.iter().map(|r| u64::from(r.quality_score)).sum();
        let final_quality_score =
            (score_sum as f64 / sprint_results.len() as f64).round() as u32;

        Self {
            success,
            sprint_results,
            total_tests,
            total_duration_ms: started.elapsed().as_millis() as u64,
            final_quality_score,
            output_path: output_path.into(),
        }
    }

    /// Percentage of sprints that succeeded.
    pub fn success_rate(&self) -> f64 {
        let total = self.sprint_results.len();
        if total == 0 {
            return 100.0;
        }
        let passed = self.sprint_results.iter().filter(|r| r.success).count();
        (passed as f64 / total as f64) * 100.0
    }

    /// Ids of the sprints that failed.
    pub fn failed_sprints(&self) -> Vec<&str> {
        self.sprint_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.sprint_id.as_str())
            .collect()
    }
}

/// Why a sprint id cannot name a result file, if it cannot.
pub(crate) fn sprint_id_problem(sprint_id: &str) -> Option<&'static str> {
    if sprint_id.trim().is_empty() {
        Some("is empty")
    } else if sprint_id.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if sprint_id == "." || sprint_id.contains("..") {
        Some("contains a relative path component")
    } else {
        None
    }
}

/// Writes one JSON document per sprint under `<state_dir>/sprints/`.
#[derive(Debug, Clone)]
pub struct SprintResultStore {
    dir: PathBuf,
}

impl SprintResultStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("sprints"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a sprint's result is stored in. Ids that would leave the
    /// store's directory are rejected.
    pub fn path(&self, sprint_id: &str) -> Result<PathBuf> {
        if let Some(problem) = sprint_id_problem(sprint_id) {
            return Err(Error::Config(format!("sprint id '{}' {}", sprint_id, problem)));
        }
        Ok(self.dir.join(format!("{}.json", sprint_id)))
    }

    pub fn save(&self, result: &SprintResult) -> Result<PathBuf> {
        let path = self.path(&result.sprint_id)?;
        write_json_atomic(&path, result)?;
        tracing::debug!(sprint_id = %result.sprint_id, path = %path.display(), "saved sprint result");
        Ok(path)
    }

    pub fn load(&self, sprint_id: &str) -> Result<SprintResult> {
        read_json(&self.path(sprint_id)?)
    }

    /// Every stored result, sorted by sprint id. Empty when nothing was saved.
    pub fn load_all(&self) -> Result<Vec<SprintResult>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                results.push(read_json::<SprintResult>(&path)?);
            }
        }
        results.sort_by(|a, b| a.sprint_id.cmp(&b.sprint_id));
        Ok(results)
    }
}
