//! Entry point for the `zapd` binary.
//!
//! Delegates to [`zapd::run`], which parses the command line, initialises
//! telemetry and executes the requested `--cmd`.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: listener and worker threads log to stderr while the
    // daemon runs.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    zapd::run(std::env::args_os(), &mut stdout, &mut stderr)
}
