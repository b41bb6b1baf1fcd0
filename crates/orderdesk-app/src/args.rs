// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "orderdesk",
    about = "Print rendered order documents",
    author,
    version
)]
pub struct Cli {
    /// Service config file (defaults to `<data dir>/config.json`).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List printers; the default is marked with `*`.
    Printers,
    /// Print a rendered file for one or more orders.
    Print {
        /// Printer name; the backend's default printer when omitted.
        #[arg(long, short)]
        printer: Option<String>,
        /// Copies to print.
        #[arg(long, short = 'n', default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        copies: u32,
        /// Rendered artifact to send.
        file: PathBuf,
        /// Orders the artifact belongs to.
        #[arg(required = true, value_name = "ORDER_ID")]
        order_ids: Vec<String>,
    },
    /// Show the newest simulated job snapshot.
    Latest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("orderdesk").chain(line.split_whitespace()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_print_command() {
        let cli = parse("--config /etc/od.json print --copies 2 -p DEV_PDF_Printer slip.pdf o1 o2")
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/od.json")));
        assert_eq!(
            cli.command,
            Command::Print {
                printer: Some("DEV_PDF_Printer".into()),
                copies: 2,
                file: PathBuf::from("slip.pdf"),
                order_ids: vec!["o1".into(), "o2".into()],
            }
        );
    }

    #[test]
    fn printer_and_copies_have_defaults() {
        let cli = parse("print slip.pdf o1").expect("parse");
        assert_eq!(
            cli.command,
            Command::Print {
                printer: None,
                copies: 1,
                file: PathBuf::from("slip.pdf"),
                order_ids: vec!["o1".into()],
            }
        );
    }

    #[test]
    fn config_is_accepted_after_subcommand() {
        let cli = parse("printers --config od.json").expect("parse");
        assert_eq!(cli.command, Command::Printers);
        assert_eq!(cli.config, Some(PathBuf::from("od.json")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("frobnicate").is_err());
        assert!(parse("print slip.pdf").is_err());
        assert!(parse("print --copies many slip.pdf o1").is_err());
        assert!(parse("print --copies 0 slip.pdf o1").is_err());
        assert!(parse("latest --config").is_err());
    }
}
