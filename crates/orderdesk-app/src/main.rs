// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Orderdesk — print rendered order documents.
//
// Entry point. Initialises logging, loads the service config, and runs one
// command against the configured print backend.

mod args;

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use orderdesk_core::config::{BackendKind, CONFIG_FILE, ServiceConfig};
use orderdesk_core::data_dir;
use orderdesk_core::error::{PrintError, Result};
use orderdesk_core::types::PrintJob;
use orderdesk_print::{JobCallbacks, PrintService, SimulationBackend};

use args::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "orderdesk failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<ExitCode> {
    let config_path = args
        .config
        .unwrap_or_else(|| data_dir::data_dir().join(CONFIG_FILE));
    let mut config = ServiceConfig::load(&config_path)?;
    config.apply_env();
    config.validate()?;

    info!(backend = ?config.backend, "Orderdesk starting");
    if config.backend == BackendKind::Simulation {
        log_latest_job(&config);
    }

    match args.command {
        Command::Latest => {
            let backend = SimulationBackend::from_config(&config)?;
            match backend.latest_snapshot()? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job.to_snapshot()?)?),
                None => println!("no print jobs in {}", backend.output_dir().display()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Printers => {
            let service = PrintService::from_config(&config)?;
            let default = service.default_printer();
            for name in service.list_printers() {
                let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
                println!("{marker} {name}");
            }
            service.shutdown(config.shutdown_timeout()).await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Print {
            printer,
            copies,
            file,
            order_ids,
        } => {
            let service = PrintService::from_config(&config)?;
            let printer = printer
                .or_else(|| service.default_printer())
                .ok_or_else(|| PrintError::validation("no printer given and no default printer"))?;
            let job = PrintJob::create(order_ids, printer, copies, config.default_max_attempts)?;
            let artifact = std::fs::read(&file)?;

            let (done_tx, done_rx) = oneshot::channel();
            let callbacks = JobCallbacks::new()
                .on_progress(|current, total| info!(current, total, "printing"))
                .on_complete(move |success, error| {
                    let _ = done_tx.send((success, error));
                });

            let job_id = service.submit(job, artifact, callbacks)?;
            let outcome = done_rx.await;
            let stopped = service.shutdown(config.shutdown_timeout()).await;
            if !stopped {
                warn!("print worker did not stop within the shutdown timeout");
            }

            match outcome {
                Ok((true, _)) => {
                    println!("job {job_id} completed");
                    Ok(ExitCode::SUCCESS)
                }
                Ok((false, error)) => {
                    println!(
                        "job {job_id} failed: {}",
                        error.as_deref().unwrap_or("unknown error")
                    );
                    Ok(ExitCode::FAILURE)
                }
                Err(_) => Err(PrintError::execution(format!(
                    "job {job_id} finished without reporting an outcome"
                ))),
            }
        }
    }
}

/// Log the newest simulated job so a developer can inspect the last run.
fn log_latest_job(config: &ServiceConfig) {
    let latest = SimulationBackend::from_config(config).and_then(|b| b.latest_snapshot());
    match latest {
        Ok(Some(job)) => info!(job = %job, "latest simulated print job"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "could not inspect simulated print output"),
    }
}
