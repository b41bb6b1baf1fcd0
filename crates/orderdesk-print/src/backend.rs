// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Execution backend contract.
//
// The print service never knows how printing actually happens. It hands each
// job to a `PrintBackend`, which may write the artifact to disk (simulation)
// or pass it to the operating system's spooler (system). Backends are
// blocking; the service runs them off the async executor.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use orderdesk_core::config::{BackendKind, ServiceConfig};
use orderdesk_core::error::Result;
use orderdesk_core::types::{JobId, PrintJob};

use crate::simulation::SimulationBackend;
use crate::system::SystemBackend;

/// Result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Failure detail; `None` on success.
    pub error: Option<String>,
    /// Where the artifact was persisted, for backends that persist it.
    pub output_path: Option<PathBuf>,
}

impl ExecutionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
            output_path: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            output_path: None,
        }
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }
}

/// Capability set every execution strategy provides.
pub trait PrintBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Names of the printers this backend can reach. Never fails; an
    /// unavailable spooler yields an empty list.
    fn list_printers(&self) -> Vec<String>;

    /// The default printer, if one exists.
    fn default_printer(&self) -> Option<String>;

    /// Print or save `artifact` for `job`.
    ///
    /// `on_progress(current, total)` is called zero or more times with
    /// `current` rising from 1 to `total`. Returns once the work is done or
    /// has irrecoverably failed, without leaving a partial artifact behind.
    fn execute(
        &self,
        job: &PrintJob,
        artifact: &[u8],
        on_progress: &mut dyn FnMut(u32, u32),
    ) -> ExecutionOutcome;

    /// Persist the job's metadata snapshot. Backends without durable storage
    /// do nothing.
    fn persist_snapshot(&self, _job: &PrintJob) -> Result<()> {
        Ok(())
    }

    /// Load a previously persisted snapshot.
    fn load_snapshot(&self, _job_id: &JobId) -> Option<PrintJob> {
        None
    }
}

/// Build the backend selected by `config`.
pub fn create_backend(config: &ServiceConfig) -> Result<Arc<dyn PrintBackend>> {
    config.validate()?;
    let backend: Arc<dyn PrintBackend> = match config.backend {
        BackendKind::Simulation => Arc::new(SimulationBackend::from_config(config)?),
        BackendKind::System => Arc::new(SystemBackend::from_config(config)),
    };
    info!(backend = backend.name(), "print backend created");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        let ok = ExecutionOutcome::succeeded().with_output(PathBuf::from("/tmp/a.pdf"));
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.output_path, Some(PathBuf::from("/tmp/a.pdf")));

        let failed = ExecutionOutcome::failed("offline");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("offline"));
    }

    #[test]
    fn factory_selects_simulation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServiceConfig {
            backend: BackendKind::Simulation,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let backend = create_backend(&config).expect("backend");
        assert_eq!(backend.name(), "simulation");
        assert_eq!(backend.default_printer().as_deref(), Some("DEV_PDF_Printer"));
    }

    #[test]
    fn factory_selects_system() {
        let config = ServiceConfig {
            backend: BackendKind::System,
            ..Default::default()
        };
        let backend = create_backend(&config).expect("backend");
        assert_eq!(backend.name(), "system");
    }

    #[test]
    fn factory_rejects_invalid_config() {
        let config = ServiceConfig {
            default_max_attempts: 0,
            ..Default::default()
        };
        assert!(create_backend(&config).is_err());
    }
}
