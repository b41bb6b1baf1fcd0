// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Orderdesk — Core job record, error, and configuration types shared by the
// print backends and the front end.

pub mod config;
pub mod data_dir;
pub mod error;
pub mod types;

pub use config::{BackendKind, ServiceConfig, SimulatedPrinterConfig};
pub use error::{PrintError, Result};
pub use types::*;
