//! CLI entrypoint for the Qortal node lifecycle manager.
//!
//! The binary delegates to [`warden_cli::run`], which loads configuration,
//! parses the subcommand and drives the node manager. Progress events and the
//! final report are written to stdout as JSON lines; diagnostics go to stderr.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    warden_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
