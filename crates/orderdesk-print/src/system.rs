// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// System spooler backend (CUPS command-line tools).
//
// Discovery goes through `lpstat`, submission through `lp`. The artifact is
// spooled from a temporary file that is removed as soon as `lp` returns. A
// zero exit status is treated as success even though the spooler may still be
// printing at that point; there is no stronger signal available from `lp`.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use orderdesk_core::config::ServiceConfig;
use orderdesk_core::error::{PrintError, Result};
use orderdesk_core::types::PrintJob;

use crate::backend::{ExecutionOutcome, PrintBackend};

/// Longest title passed to `lp -t`.
const MAX_TITLE_LEN: usize = 120;

/// Backend that hands artifacts to the operating system's print spooler.
#[derive(Debug, Clone)]
pub struct SystemBackend {
    lp_command: String,
    lpstat_command: String,
}

impl Default for SystemBackend {
    fn default() -> Self {
        Self::new("lp", "lpstat")
    }
}

impl SystemBackend {
    pub fn new(lp_command: impl Into<String>, lpstat_command: impl Into<String>) -> Self {
        Self {
            lp_command: lp_command.into(),
            lpstat_command: lpstat_command.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.lp_command.clone(), config.lpstat_command.clone())
    }

    /// Run `lpstat` with `args`, returning stdout on a zero exit.
    fn lpstat(&self, args: &[&str]) -> Option<String> {
        match Command::new(&self.lpstat_command).args(args).output() {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                warn!(
                    command = %self.lpstat_command,
                    status = %output.status,
                    stderr = %stderr_text(&output),
                    "lpstat failed"
                );
                None
            }
            Err(e) => {
                warn!(command = %self.lpstat_command, error = %e, "could not run lpstat");
                None
            }
        }
    }

    fn submit(&self, job: &PrintJob, artifact: &[u8]) -> Result<()> {
        if artifact.is_empty() {
            return Err(PrintError::execution("artifact is empty"));
        }

        let mut spool = NamedTempFile::new()?;
        spool.write_all(artifact)?;
        spool.flush()?;

        let copies = job.copies().to_string();
        let title = job_title(job);
        debug!(spool = %spool.path().display(), "invoking lp");
        let output = Command::new(&self.lp_command)
            .arg("-d")
            .arg(job.printer_name())
            .arg("-n")
            .arg(&copies)
            .arg("-t")
            .arg(&title)
            .arg(spool.path())
            .output()
            .map_err(|e| PrintError::execution(format!("could not run {}: {e}", self.lp_command)))?;

        if !output.status.success() {
            let detail = stderr_text(&output);
            return Err(PrintError::execution(if detail.is_empty() {
                format!("{} exited with {}", self.lp_command, output.status)
            } else {
                format!("{} exited with {}: {detail}", self.lp_command, output.status)
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        info!(response = %stdout.trim(), "spooler accepted job");
        Ok(())
    }
}

impl PrintBackend for SystemBackend {
    fn name(&self) -> &'static str {
        "system"
    }

    fn list_printers(&self) -> Vec<String> {
        self.lpstat(&["-a"])
            .map(|out| parse_printer_list(&out))
            .unwrap_or_default()
    }

    fn default_printer(&self) -> Option<String> {
        self.lpstat(&["-d"]).and_then(|out| parse_default_printer(&out))
    }

    #[instrument(skip_all, fields(job_id = %job.id(), printer = %job.printer_name()))]
    fn execute(
        &self,
        job: &PrintJob,
        artifact: &[u8],
        on_progress: &mut dyn FnMut(u32, u32),
    ) -> ExecutionOutcome {
        match self.submit(job, artifact) {
            Ok(()) => {
                on_progress(1, 1);
                ExecutionOutcome::succeeded()
            }
            Err(e) => {
                warn!(error = %e, "spooler rejected job");
                ExecutionOutcome::failed(e.to_string())
            }
        }
    }
}

/// Printer names from `lpstat -a` ("<name> accepting requests since ...").
pub fn parse_printer_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

/// Default destination from `lpstat -d`.
pub fn parse_default_printer(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains("destination"))?;
    if line.trim_start().starts_with("no system default") {
        return None;
    }
    let (_, name) = line.split_once(':')?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_owned())
}

/// Spooler job title listing the orders on the job.
fn job_title(job: &PrintJob) -> String {
    let mut title = format!("orders {}", job.target_ids().join(","));
    if title.len() > MAX_TITLE_LEN {
        let mut cut = MAX_TITLE_LEN;
        while !title.is_char_boundary(cut) {
            cut -= 1;
        }
        title.truncate(cut);
    }
    title
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}
