//! Swarm spec: the typed project description a board is built from.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validate::{Validate, ValidationResult};

/// Priority of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Quality gates configured for a swarm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityConfig {
    /// Minimum review score (0-100) for a feature to pass.
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    /// Maximum gate iterations per feature.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Minimum line coverage percentage.
    #[serde(default = "default_min_coverage")]
    pub min_coverage: u32,
}

fn default_min_score() -> u32 {
    85
}

fn default_max_iterations() -> u32 {
    3
}

fn default_min_coverage() -> u32 {
    80
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_iterations: default_max_iterations(),
            min_coverage: default_min_coverage(),
        }
    }
}

/// A single feature/requirement in the swarm spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmFeature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of features that must be finished first. Must reference earlier features.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl SwarmFeature {
    /// Creates a feature with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
            priority: Priority::default(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Sets the feature dependencies.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the acceptance criteria.
    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }
}

/// Full project spec consumed by the swarm board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSpec {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    pub features: Vec<SwarmFeature>,
    #[serde(default)]
    pub quality_config: QualityConfig,
}

impl SwarmSpec {
    /// Creates an empty spec for the given project.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            description: String::new(),
            tech_stack: Vec::new(),
            features: Vec::new(),
            quality_config: QualityConfig::default(),
        }
    }

    /// Loads a spec from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

impl Validate for SwarmSpec {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.project_name.trim().is_empty() {
            result.add_error("projectName cannot be empty");
        }
        if self.features.is_empty() {
            result.add_warning("spec has no features");
        }
        if self.quality_config.min_score > 100 {
            result.add_error("qualityConfig.minScore must be between 0 and 100");
        }
        if self.quality_config.max_iterations == 0 {
            result.add_error("qualityConfig.maxIterations must be at least 1");
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for feature in &self.features {
            if feature.id.trim().is_empty() {
                result.add_error(format!("feature '{}' has an empty id", feature.name));
            }
            for dep in &feature.dependencies {
                if !seen.contains(dep.as_str()) {
                    result.add_error(format!(
                        "feature {} depends on {} which is not declared before it",
                        feature.id, dep
                    ));
                }
            }
            if !seen.insert(feature.id.as_str()) {
                result.add_error(format!("duplicate feature id {}", feature.id));
            }
        }

        result
    }
}
