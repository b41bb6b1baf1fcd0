// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Simulation backend for development and tests.
//
// Instead of talking to a printer, each job is saved under its own directory:
//
//   <output_dir>/print_job_<id>/
//     document.<ext>   -- the artifact bytes
//     metadata.json    -- job snapshot, rewritten on every terminal status
//
// Every target id costs one unit of simulated work (a sleep plus a progress
// report). A single random draw at the end decides whether the printer
// "fails", so tests can force either outcome with a fixed random source.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, warn};

use orderdesk_core::config::{ServiceConfig, SimulatedPrinterConfig};
use orderdesk_core::error::{PrintError, Result};
use orderdesk_core::types::{JobId, PrintJob};

use crate::backend::{ExecutionOutcome, PrintBackend};
use crate::integrity::verify_artifact;

const JOB_DIR_PREFIX: &str = "print_job_";
const METADATA_FILE: &str = "metadata.json";
const ARTIFACT_STEM: &str = "document";

// ---------------------------------------------------------------------------
// Random sources
// ---------------------------------------------------------------------------

/// Source of uniform values in [0, 1) for failure injection.
pub trait RandomSource: Send + Sync {
    fn next_unit(&self) -> f64;
}

/// The thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Reproducible sequence from a seed.
#[derive(Debug)]
pub struct SeededRandom(Mutex<StdRng>);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random::<f64>()
    }
}

/// Always returns the same value (clamped into [0, 1)).
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

// ---------------------------------------------------------------------------
// Mock printers
// ---------------------------------------------------------------------------

/// A mock printer with a per-unit delay and a failure probability.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPrinter {
    pub name: String,
    pub page_delay: Duration,
    pub error_rate: f64,
}

impl SimulatedPrinter {
    pub fn new(name: impl Into<String>, page_delay: Duration, error_rate: f64) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PrintError::Config("simulated printer name cannot be empty".into()));
        }
        if !(0.0..=1.0).contains(&error_rate) {
            return Err(PrintError::Config(format!(
                "error rate {error_rate} for '{name}' is outside [0, 1]"
            )));
        }
        Ok(Self {
            name,
            page_delay,
            error_rate,
        })
    }
}

impl TryFrom<&SimulatedPrinterConfig> for SimulatedPrinter {
    type Error = PrintError;

    fn try_from(cfg: &SimulatedPrinterConfig) -> Result<Self> {
        Self::new(cfg.name.clone(), cfg.page_delay(), cfg.error_rate)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend that writes artifacts and snapshots to disk.
pub struct SimulationBackend {
    output_dir: PathBuf,
    printers: Vec<SimulatedPrinter>,
    artifact_extension: String,
    random: Box<dyn RandomSource>,
}

impl SimulationBackend {
    /// Create a backend writing under `output_dir`, drawing failures from the
    /// thread RNG.
    pub fn new(output_dir: impl Into<PathBuf>, printers: Vec<SimulatedPrinter>) -> Self {
        Self {
            output_dir: output_dir.into(),
            printers,
            artifact_extension: "pdf".into(),
            random: Box::new(ThreadRandom),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let printers = config
            .simulated_printers
            .iter()
            .map(SimulatedPrinter::try_from)
            .collect::<Result<Vec<_>>>()?;
        info!(
            output_dir = %config.output_dir.display(),
            printers = printers.len(),
            "simulation backend configured"
        );
        Ok(Self::new(config.output_dir.clone(), printers)
            .with_artifact_extension(config.artifact_extension.clone()))
    }

    /// Replace the failure-injection source.
    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn printer(&self, name: &str) -> Option<&SimulatedPrinter> {
        self.printers.iter().find(|p| p.name == name)
    }

    /// Directory holding everything persisted for one job.
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(format!("{JOB_DIR_PREFIX}{job_id}"))
    }

    pub fn metadata_path(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id).join(METADATA_FILE)
    }

    pub fn artifact_path(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id)
            .join(format!("{ARTIFACT_STEM}.{}", self.artifact_extension))
    }

    /// Every readable job snapshot in the output directory, oldest first.
    pub fn list_snapshots(&self) -> Result<Vec<PrintJob>> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let is_job_dir = entry.file_name().to_string_lossy().starts_with(JOB_DIR_PREFIX)
                && entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_job_dir {
                continue;
            }

            let path = entry.path().join(METADATA_FILE);
            match PrintJob::read_snapshot(&path) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }

        jobs.sort_by_key(|j| j.created_at);
        debug!(count = jobs.len(), "listed job snapshots");
        Ok(jobs)
    }

    /// The most recently created job, if any were persisted.
    pub fn latest_snapshot(&self) -> Result<Option<PrintJob>> {
        Ok(self.list_snapshots()?.pop())
    }

    fn run(
        &self,
        job: &PrintJob,
        artifact: &[u8],
        printer: &SimulatedPrinter,
        on_progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PathBuf> {
        if artifact.is_empty() {
            return Err(PrintError::execution("artifact is empty"));
        }

        let job_dir = self.job_dir(&job.id());
        std::fs::create_dir_all(&job_dir)?;

        let artifact_path = self.artifact_path(&job.id());
        write_atomically(&artifact_path, artifact)?;
        debug!(path = %artifact_path.display(), bytes = artifact.len(), "artifact saved");
        if let Some(expected) = &job.artifact_sha256 {
            verify_artifact(&std::fs::read(&artifact_path)?, expected)?;
        }

        let mut snapshot = job.clone();
        snapshot.output_path = Some(artifact_path.clone());
        snapshot.write_snapshot(self.metadata_path(&job.id()))?;

        let total = unit_count(job.target_ids().len());
        for current in 1..=total {
            std::thread::sleep(printer.page_delay);
            on_progress(current, total);
        }

        let roll = self.random.next_unit();
        if roll < printer.error_rate {
            return Err(PrintError::execution(format!(
                "simulated failure on {} (roll {roll:.3} below error rate {:.3})",
                printer.name, printer.error_rate
            )));
        }

        Ok(artifact_path)
    }
}

impl PrintBackend for SimulationBackend {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn list_printers(&self) -> Vec<String> {
        self.printers.iter().map(|p| p.name.clone()).collect()
    }

    fn default_printer(&self) -> Option<String> {
        self.printers.first().map(|p| p.name.clone())
    }

    #[instrument(skip_all, fields(job_id = %job.id(), printer = %job.printer_name()))]
    fn execute(
        &self,
        job: &PrintJob,
        artifact: &[u8],
        on_progress: &mut dyn FnMut(u32, u32),
    ) -> ExecutionOutcome {
        let Some(printer) = self.printer(job.printer_name()) else {
            warn!("unknown simulated printer");
            return ExecutionOutcome::failed(format!(
                "printer '{}' is not available",
                job.printer_name()
            ));
        };

        info!(units = job.target_ids().len(), "simulating print job");
        match self.run(job, artifact, printer, on_progress) {
            Ok(path) => {
                info!(path = %path.display(), "simulated print job completed");
                ExecutionOutcome::succeeded().with_output(path)
            }
            Err(e) => {
                let path = self.artifact_path(&job.id());
                if path.exists()
                    && let Err(rm) = std::fs::remove_file(&path)
                {
                    warn!(path = %path.display(), error = %rm, "could not remove artifact");
                }
                warn!(error = %e, "simulated print job failed");
                ExecutionOutcome::failed(e.to_string())
            }
        }
    }

    fn persist_snapshot(&self, job: &PrintJob) -> Result<()> {
        std::fs::create_dir_all(self.job_dir(&job.id()))?;
        job.write_snapshot(self.metadata_path(&job.id()))?;
        debug!(job_id = %job.id(), status = %job.status, "snapshot persisted");
        Ok(())
    }

    fn load_snapshot(&self, job_id: &JobId) -> Option<PrintJob> {
        let path = self.metadata_path(job_id);
        if !path.exists() {
            return None;
        }
        match PrintJob::read_snapshot(&path) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable snapshot");
                None
            }
        }
    }
}

/// Units of simulated work for `targets` target ids, saturating at `u32::MAX`.
fn unit_count(targets: usize) -> u32 {
    u32::try_from(targets).unwrap_or(u32::MAX)
}

/// Write via a `.part` sibling and rename, so readers never see a partial file.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let partial = path.with_extension("part");
    if let Err(e) = std::fs::write(&partial, data) {
        let _ = std::fs::remove_file(&partial);
        return Err(e.into());
    }
    std::fs::rename(&partial, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&partial);
    })?;
    Ok(())
}
