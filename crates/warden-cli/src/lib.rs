//! Command-line interface runtime for the node lifecycle manager.
//!
//! The module owns argument parsing, configuration bootstrapping and report
//! rendering. The runner can be driven from the binary entrypoint or from
//! tests, where the configuration loader, progress sink and IO streams are
//! substituted.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use warden_core::ProgressSink;

mod cli;
mod commands;
mod config;
mod errors;
mod output;
pub mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, command_arguments, split_config_arguments};
pub(crate) use errors::AppError;
pub use output::JsonLinesProgress;

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    io: IoStreams<'a, W, E>,
    loader: &'a L,
    progress: Arc<dyn ProgressSink>,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(io: IoStreams<'a, W, E>, loader: &'a L, progress: Arc<dyn ProgressSink>) -> Self {
        Self { io, loader, progress }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let result = Cli::try_parse_from(command_arguments(&args, &split))
            .map_err(AppError::CliUsage)
            .and_then(|cli| {
                self.loader
                    .load(&split.config_arguments)
                    .map(|config| (cli, config))
            })
            .and_then(|(cli, config)| {
                telemetry::initialise(&config)?;
                let manager = commands::build_manager(&config, Arc::clone(&self.progress))?;
                let report = commands::execute(&cli.command, &manager)?;
                output::write_report(&mut *self.io.stdout, &report)
            });

        match result {
            Ok(()) => ExitCode::SUCCESS,
            // Help and version requests are not failures.
            Err(AppError::CliUsage(error)) if !error.use_stderr() => {
                let _ = write!(self.io.stdout, "{error}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(self.io.stderr, "{error}");
                ExitCode::FAILURE
            }
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
///
/// Progress events go straight to the process stdout so they are visible while
/// long operations run; the final report is written to `stdout`.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let progress: Arc<dyn ProgressSink> = Arc::new(JsonLinesProgress::new(io::stdout()));
    run_with_loader(args, IoStreams::new(stdout, stderr), &OrthoConfigLoader, progress)
}

/// Runs the CLI with a custom configuration loader and progress sink.
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    io: IoStreams<'_, W, E>,
    loader: &L,
    progress: Arc<dyn ProgressSink>,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader, progress).run(args)
}
