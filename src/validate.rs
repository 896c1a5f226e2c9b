//! Checks run on specs, backlogs and configuration before any work is dispatched.

use crate::error::{Error, Result};

/// Problems found by a [`Validate`] check.
///
/// Errors stop the run; warnings are logged and the run goes on.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Logs the warnings under `source`, then fails with every error joined.
    pub fn ensure_valid(self, source: &str) -> Result<()> {
        for warning in &self.warnings {
            tracing::warn!(source = %source, "{}", warning);
        }
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(Error::Config(format!("{}: {}", source, self.errors.join("; "))))
    }
}

/// Implemented by inputs that can be checked up front.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}
