// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types: the print job record and its lifecycle states.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PrintError, Result};

/// Attempts allowed before a failed job stops being retryable.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = PrintError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| PrintError::validation(format!("malformed job id '{s}': {e}")))
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for the worker.
    Pending,
    /// Currently being executed by a backend.
    Processing,
    /// Successfully printed or saved.
    Completed,
    /// Execution failed; the error message says why.
    Failed,
    /// Cancelled before execution started.
    Cancelled,
}

impl JobStatus {
    /// No further automatic transition happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Waiting for, or undergoing, execution.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Lowercase keyword, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to print a rendered artifact for a set of orders.
///
/// Identity fields (`id`, `target_ids`, `printer_name`, `copies`) are fixed at
/// creation and only exposed through accessors. Lifecycle fields are public;
/// once a job is submitted they are mutated exclusively by the print service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintJob {
    id: JobId,
    target_ids: Vec<String>,
    printer_name: String,
    copies: u32,
    /// Rendered document bytes. Stored next to the snapshot, never inside it.
    #[serde(skip)]
    pub artifact: Option<Vec<u8>>,
    /// SHA-256 hex digest of the artifact, recorded at submission.
    pub artifact_sha256: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of times the job entered `Processing`.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Where a backend persisted the artifact, if it does so.
    pub output_path: Option<PathBuf>,
}

impl PrintJob {
    /// Create a single-copy job with the default attempt limit.
    pub fn new(target_ids: Vec<String>, printer_name: impl Into<String>) -> Result<Self> {
        Self::create(target_ids, printer_name, 1, DEFAULT_MAX_ATTEMPTS)
    }

    /// Create a new `Pending` job with a fresh id.
    ///
    /// Duplicate target ids are collapsed, keeping the first occurrence.
    pub fn create(
        target_ids: Vec<String>,
        printer_name: impl Into<String>,
        copies: u32,
        max_attempts: u32,
    ) -> Result<Self> {
        let mut unique: Vec<String> = Vec::with_capacity(target_ids.len());
        for target in target_ids {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }

        let now = Utc::now();
        let job = Self {
            id: JobId::new(),
            target_ids: unique,
            printer_name: printer_name.into(),
            copies,
            artifact: None,
            artifact_sha256: None,
            status: JobStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            attempts: 0,
            max_attempts,
            output_path: None,
        };
        job.validate()?;
        Ok(job)
    }

    /// Check the identity invariants shared by `create` and `from_snapshot`.
    fn validate(&self) -> Result<()> {
        if self.target_ids.is_empty() {
            return Err(PrintError::validation("at least one target id is required"));
        }
        if self.target_ids.iter().any(|t| t.is_empty()) {
            return Err(PrintError::validation("target ids cannot be empty strings"));
        }
        if self.printer_name.trim().is_empty() {
            return Err(PrintError::validation("printer name cannot be empty"));
        }
        if self.copies < 1 {
            return Err(PrintError::validation("copies must be at least 1"));
        }
        if self.max_attempts < 1 {
            return Err(PrintError::validation("max attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn target_ids(&self) -> &[String] {
        &self.target_ids
    }

    pub fn printer_name(&self) -> &str {
        &self.printer_name
    }

    pub fn copies(&self) -> u32 {
        self.copies
    }

    /// Move the job to `status`, refreshing `updated_at`.
    ///
    /// Entering `Processing` counts an attempt. A supplied error is stored;
    /// without one the previous message survives only into `Failed` or
    /// `Cancelled`. Transition legality is checked by the print service.
    pub fn update_status(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.updated_at = Utc::now();

        self.error_message = match (error, status) {
            (Some(e), _) => Some(e),
            (None, JobStatus::Failed | JobStatus::Cancelled) => self.error_message.take(),
            (None, _) => None,
        };

        if status == JobStatus::Processing {
            self.attempts += 1;
        }
    }

    /// A failed (or never started) job with attempts left.
    pub fn can_retry(&self) -> bool {
        matches!(self.status, JobStatus::Failed | JobStatus::Pending)
            && self.attempts < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Time between creation and the last status change.
    pub fn duration(&self) -> TimeDelta {
        self.updated_at - self.created_at
    }

    /// Time since creation.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.created_at
    }

    // -- Snapshots -----------------------------------------------------------

    /// Key-value snapshot of the record (artifact bytes excluded).
    pub fn to_snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a record from a snapshot produced by [`PrintJob::to_snapshot`].
    pub fn from_snapshot(value: serde_json::Value) -> Result<Self> {
        let record: SnapshotRecord = serde_json::from_value(value)?;
        let job = Self {
            id: record.id,
            target_ids: record.target_ids,
            printer_name: record.printer_name,
            copies: record.copies,
            artifact: None,
            artifact_sha256: record.artifact_sha256,
            status: record.status,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at.unwrap_or(record.created_at),
            attempts: record.attempts.unwrap_or(0),
            max_attempts: record.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            output_path: record.output_path,
        };
        job.validate()?;
        Ok(job)
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn write_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_snapshot()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a snapshot written by [`PrintJob::write_snapshot`].
    pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_snapshot(serde_json::from_str(&data)?)
    }
}

impl std::fmt::Display for PrintJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PrintJob(id={}, orders={}, printer={}, status={}, attempts={}/{})",
            self.id,
            self.target_ids.len(),
            self.printer_name,
            self.status,
            self.attempts,
            self.max_attempts
        )
    }
}

/// On-disk shape of a snapshot. Optional fields tolerate older files.
#[derive(Deserialize)]
struct SnapshotRecord {
    id: JobId,
    target_ids: Vec<String>,
    printer_name: String,
    copies: u32,
    #[serde(default)]
    artifact_sha256: Option<String>,
    status: JobStatus,
    #[serde(default)]
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attempts: Option<u32>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    output_path: Option<PathBuf>,
}
