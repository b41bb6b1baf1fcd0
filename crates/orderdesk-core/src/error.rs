// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Orderdesk.

use thiserror::Error;

use crate::types::JobId;

/// Top-level error type for all Orderdesk print operations.
#[derive(Debug, Error)]
pub enum PrintError {
    // -- Submission errors (synchronous, never retried) --
    #[error("invalid print job: {0}")]
    Validation(String),

    #[error("print service has been stopped")]
    ServiceStopped,

    #[error("unknown print job {0}")]
    UnknownJob(JobId),

    // -- Backend errors (delivered through the completion callback) --
    #[error("print execution failed: {0}")]
    Execution(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintError {
    /// Shorthand for building a [`PrintError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for building a [`PrintError::Execution`].
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintError>;
