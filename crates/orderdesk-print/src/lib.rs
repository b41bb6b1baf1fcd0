// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Orderdesk Print — execution backends and the background print worker.
// This crate turns the job records defined in `orderdesk-core` into printed
// (or, in development, saved) output.

pub mod backend;
pub mod integrity;
pub mod service;
pub mod simulation;
pub mod system;

pub use backend::{ExecutionOutcome, PrintBackend, create_backend};
pub use service::{JobCallbacks, PrintService};
pub use simulation::{FixedRandom, RandomSource, SeededRandom, SimulatedPrinter, SimulationBackend};
pub use system::SystemBackend;
