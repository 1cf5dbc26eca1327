//! Per-module mutation passes.
//!
//! The passes here are invoked per module by an external parallel scheduler;
//! each decision is a pure function of the module's own state plus the
//! shared [`crate::session::Session`] registries. Module-scoped failures are
//! collected in a [`PhaseErrors`] sink so one run reports every offending
//! module instead of stopping at the first.

pub mod api_variant;
pub mod snapshot;

use anyhow::{anyhow, Result};
use std::fmt::Write as _;
use std::sync::Mutex;

/// One module-scoped error.
#[derive(Debug)]
pub struct ModuleError {
    pub module: String,
    pub message: String,
}

/// Thread-safe sink for module-scoped errors within one phase.
#[derive(Debug)]
pub struct PhaseErrors {
    phase: &'static str,
    errors: Mutex<Vec<ModuleError>>,
}

impl PhaseErrors {
    pub fn new(phase: &'static str) -> PhaseErrors {
        PhaseErrors {
            phase,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, module: &str, err: anyhow::Error) {
        self.errors
            .lock()
            .expect("phase error sink poisoned")
            .push(ModuleError {
                module: module.to_string(),
                message: format!("{err:#}"),
            });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().expect("phase error sink poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().expect("phase error sink poisoned").len()
    }

    /// Collapse the sink into a single error listing every offender, or
    /// Ok(()) when the phase was clean.
    pub fn into_result(self) -> Result<()> {
        let errors = self.errors.into_inner().expect("phase error sink poisoned");
        if errors.is_empty() {
            return Ok(());
        }
        let mut message = format!("{} error(s) in {} phase:", errors.len(), self.phase);
        for err in &errors {
            let _ = write!(message, "\n  module '{}': {}", err.module, err.message);
        }
        Err(anyhow!(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn empty_sink_is_ok() {
        assert!(PhaseErrors::new("test").into_result().is_ok());
    }

    #[test]
    fn all_offenders_are_reported() {
        let sink = PhaseErrors::new("expansion");
        sink.push("libfoo", anyhow!("bad symbol file"));
        sink.push("libbar", anyhow!("unknown variant"));
        let message = sink.into_result().unwrap_err().to_string();
        assert!(message.contains("libfoo"));
        assert!(message.contains("libbar"));
        assert!(message.contains("2 error(s)"));
    }
}
