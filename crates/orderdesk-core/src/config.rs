// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PrintError, Result};
use crate::types::DEFAULT_MAX_ATTEMPTS;

/// File name used when the config is stored in the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Which execution backend the print service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Writes artifacts to disk with simulated delays and failures.
    Simulation,
    /// Hands artifacts to the operating system's print spooler.
    System,
}

/// One mock printer for the simulation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPrinterConfig {
    pub name: String,
    /// Delay per unit of work (one unit per target id).
    pub page_delay_ms: u64,
    /// Probability in [0, 1] that a job on this printer fails.
    pub error_rate: f64,
}

impl SimulatedPrinterConfig {
    pub fn new(name: impl Into<String>, page_delay_ms: u64, error_rate: f64) -> Self {
        Self {
            name: name.into(),
            page_delay_ms,
            error_rate,
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// Persistent print service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Execution backend chosen at start-up.
    pub backend: BackendKind,
    /// Root directory for simulated print output (one subdirectory per job).
    pub output_dir: PathBuf,
    /// Attempt limit given to jobs created by the front end.
    pub default_max_attempts: u32,
    /// How long `shutdown` waits for an in-flight job.
    pub shutdown_timeout_ms: u64,
    /// File extension for persisted artifacts.
    pub artifact_extension: String,
    /// Mock printer table for the simulation backend. The first is the default.
    pub simulated_printers: Vec<SimulatedPrinterConfig>,
    /// Spooler submit command (CUPS `lp`).
    pub lp_command: String,
    /// Spooler query command (CUPS `lpstat`).
    pub lpstat_command: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::System,
            output_dir: crate::data_dir::data_subdir("prints"),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            shutdown_timeout_ms: 5_000,
            artifact_extension: "pdf".into(),
            simulated_printers: default_simulated_printers(),
            lp_command: "lp".into(),
            lpstat_command: "lpstat".into(),
        }
    }
}

/// The development printer table.
pub fn default_simulated_printers() -> Vec<SimulatedPrinterConfig> {
    vec![
        SimulatedPrinterConfig::new("DEV_PDF_Printer", 50, 0.0),
        SimulatedPrinterConfig::new("DEV_Label_Printer", 100, 0.0),
        SimulatedPrinterConfig::new("DEV_Flaky_Printer", 50, 0.3),
    ]
}

impl ServiceConfig {
    /// Load the config at `path`, falling back to defaults if it is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        info!(path = %path.display(), backend = ?config.backend, "config loaded");
        Ok(config)
    }

    /// Persist the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_attempts < 1 {
            return Err(PrintError::Config("default_max_attempts must be at least 1".into()));
        }
        if self.artifact_extension.is_empty() || self.artifact_extension.contains('/') {
            return Err(PrintError::Config(format!(
                "invalid artifact extension '{}'",
                self.artifact_extension
            )));
        }
        for printer in &self.simulated_printers {
            if printer.name.trim().is_empty() {
                return Err(PrintError::Config("simulated printer with empty name".into()));
            }
            if !(0.0..=1.0).contains(&printer.error_rate) {
                return Err(PrintError::Config(format!(
                    "error rate {} for '{}' is outside [0, 1]",
                    printer.error_rate, printer.name
                )));
            }
        }
        if self.backend == BackendKind::System
            && (self.lp_command.is_empty() || self.lpstat_command.is_empty())
        {
            return Err(PrintError::Config("spooler commands cannot be empty".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Apply process environment overrides.
    ///
    /// `DEV_MODE=1` or running under WSL selects the simulation backend;
    /// `ORDERDESK_OUTPUT_DIR` moves the simulated print output.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok(), is_wsl());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>, wsl: bool) {
        if wsl || var("DEV_MODE").as_deref() == Some("1") {
            self.backend = BackendKind::Simulation;
        }
        if let Some(dir) = var("ORDERDESK_OUTPUT_DIR").filter(|d| !d.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
    }
}

/// Whether we are running inside Windows Subsystem for Linux.
pub fn is_wsl() -> bool {
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_ascii_lowercase().contains("microsoft"))
        .unwrap_or(false)
}
