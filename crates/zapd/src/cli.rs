//! `--cmd` dispatch: maps lifecycle commands onto supervisor operations and
//! exit codes.

use std::ffi::OsString;
use std::fmt::Display;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use tracing::{error, info, warn};
use zap_config::{Config, DaemonCommand};

use crate::environment::Environment;
use crate::process::{
    Daemonizer, ProcessSignaller, ShutdownSignal, StartError, StopOutcome, Supervisor,
    SystemShutdownSignal,
};
use crate::telemetry;
use crate::workers::RequestHandler;

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Exit status for an unrecognised command or malformed arguments.
const USAGE_EXIT: u8 = 2;

/// Runs the daemon command line with the given arguments and output streams.
#[must_use]
pub fn run<I, T, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    let config = match Config::load_from_iter(args) {
        Ok(config) => config,
        Err(error) => return report_parse_error(&error, stdout, stderr),
    };
    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(error) => {
            report(stderr, &error);
            return ExitCode::FAILURE;
        }
    };
    info!(
        target: CLI_TARGET,
        version = env!("CARGO_PKG_VERSION"),
        "Zabbix Application Proxy"
    );

    let mut supervisor = Supervisor::new(config.pid_path());
    let code = dispatch(
        &config,
        &mut supervisor,
        SystemShutdownSignal::new(),
        stdout,
        stderr,
    );
    telemetry.flush();
    code
}

fn report_parse_error<W: Write, E: Write>(
    error: &clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            report(stdout, &error.render());
            ExitCode::SUCCESS
        }
        _ => {
            report(stderr, &error.render());
            ExitCode::from(USAGE_EXIT)
        }
    }
}

/// Executes the command selected by `config` against `supervisor`.
pub(crate) fn dispatch<D, P, S, W, E>(
    config: &Config,
    supervisor: &mut Supervisor<D, P>,
    shutdown: S,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    D: Daemonizer,
    P: ProcessSignaller,
    S: ShutdownSignal,
    W: Write,
    E: Write,
{
    match config.action() {
        DaemonCommand::Help => {
            report(stdout, &Config::usage());
            ExitCode::SUCCESS
        }
        DaemonCommand::Start => run_daemon(config, supervisor, shutdown, stderr, false),
        DaemonCommand::Stop => match supervisor.stop() {
            Ok(StopOutcome::NotRunning) => {
                info!(target: CLI_TARGET, "nothing to stop");
                ExitCode::SUCCESS
            }
            Ok(StopOutcome::Stopped { .. }) => ExitCode::SUCCESS,
            Err(error) => {
                report(stderr, &error);
                ExitCode::FAILURE
            }
        },
        DaemonCommand::Restart => run_daemon(config, supervisor, shutdown, stderr, true),
        DaemonCommand::Unknown(command) => {
            warn!(target: CLI_TARGET, command = %command, "unknown command");
            report(stderr, &format_args!("unknown command '{command}'"));
            report(stderr, &Config::usage());
            ExitCode::from(USAGE_EXIT)
        }
    }
}

fn run_daemon<D, P, S, E>(
    config: &Config,
    supervisor: &mut Supervisor<D, P>,
    shutdown: S,
    stderr: &mut E,
    restart: bool,
) -> ExitCode
where
    D: Daemonizer,
    P: ProcessSignaller,
    S: ShutdownSignal,
    E: Write,
{
    let build_handler = || {
        Environment::from_config(config)
            .map(|environment| Arc::new(environment) as Arc<dyn RequestHandler>)
            .inspect_err(|error| {
                error!(target: CLI_TARGET, error = %error, "environment initialisation failed");
            })
    };

    let started = if restart {
        supervisor.restart(config, build_handler, shutdown)
    } else {
        build_handler()
            .map_err(StartError::from)
            .and_then(|handler| supervisor.start(config, handler, shutdown))
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(error) => {
            if restart {
                error!(target: CLI_TARGET, error = %error, "restart failed");
            } else {
                error!(target: CLI_TARGET, error = %error, "start failed");
            }
            report(stderr, &error);
            return ExitCode::FAILURE;
        }
    };

    match supervisor.serve(handle) {
        Ok(report_summary) => {
            if !report_summary.is_clean() {
                warn!(
                    target: CLI_TARGET,
                    timed_out = report_summary.timed_out().len(),
                    "some workers had to be killed"
                );
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(target: CLI_TARGET, error = %error, "daemon stopped with an error");
            report(stderr, &error);
            ExitCode::FAILURE
        }
    }
}

fn report<W: Write>(out: &mut W, message: &dyn Display) {
    if writeln!(out, "{message}").is_err() {
        warn!(target: CLI_TARGET, "failed to write command output");
    }
}
