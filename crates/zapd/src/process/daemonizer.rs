//! Implements the detach step of daemon start-up.

use std::ffi::OsStr;

use daemonize_me::{Daemon, Group, User};
use nix::errno::Errno;
use nix::unistd::{Uid, chdir, setgid, setgroups, setuid};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use super::account::RunAs;

/// Whether start-up detaches from the controlling terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    /// Mode selected by the `--daemonize` flag.
    #[must_use]
    pub const fn from_flag(daemonize: bool) -> Self {
        if daemonize {
            Self::Background
        } else {
            Self::Foreground
        }
    }
}

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches (in background mode) and enters the run-as account.
    ///
    /// In background mode only the detached child returns from this call.
    fn daemonize(&self, mode: LaunchMode, account: &RunAs) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[error("failed to daemonise: {0}")]
    System(#[from] daemonize_me::DaemonError),
    /// The working directory could not be changed.
    #[error("failed to change directory to '{path}': {source}")]
    Chdir {
        /// Target directory.
        path: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Switching to the run-as account failed.
    #[error("failed to drop privileges to {account}: {source}")]
    DropPrivileges {
        /// `user:group` being entered.
        account: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Daemoniser that delegates to `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn detach(account: &RunAs) -> Result<(), DaemonizeError> {
        info!(
            target: PROCESS_TARGET,
            user = account.user(),
            group = account.group(),
            home = %account.home().display(),
            "daemonising into background"
        );
        Daemon::new()
            .work_dir(account.home())
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .user(User::try_from(account.user())?)
            .group(Group::try_from(account.group())?)
            .start()?;
        info!(
            target: PROCESS_TARGET,
            "daemon process detached; continuing in child"
        );
        Ok(())
    }

    fn stay_attached(account: &RunAs) -> Result<(), DaemonizeError> {
        chdir(account.home()).map_err(|source| DaemonizeError::Chdir {
            path: account.home().display().to_string(),
            source,
        })?;
        if !Uid::effective().is_root() {
            info!(
                target: PROCESS_TARGET,
                "not running as root; keeping current account"
            );
            return Ok(());
        }
        drop_privileges(account)?;
        info!(
            target: PROCESS_TARGET,
            user = account.user(),
            group = account.group(),
            "dropped privileges"
        );
        Ok(())
    }
}

/// Enters `account`, leaving the run-as group as the only supplementary group.
fn drop_privileges(account: &RunAs) -> Result<(), DaemonizeError> {
    let drop_error = |source| DaemonizeError::DropPrivileges {
        account: format!("{}:{}", account.user(), account.group()),
        source,
    };
    setgroups(&[account.gid()]).map_err(drop_error)?;
    setgid(account.gid()).map_err(drop_error)?;
    setuid(account.uid()).map_err(drop_error)
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, mode: LaunchMode, account: &RunAs) -> Result<(), DaemonizeError> {
        match mode {
            LaunchMode::Background => Self::detach(account),
            LaunchMode::Foreground => Self::stay_attached(account),
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, Gid, Group, User, fork, getgroups, getuid};

    use super::*;

    #[test]
    fn root_drop_clears_supplementary_groups() {
        if !Uid::effective().is_root() {
            return;
        }
        let Some(user) = User::from_name("nobody").expect("query nobody") else {
            return;
        };
        let Some(group) = Group::from_gid(user.gid).expect("query nobody's group") else {
            return;
        };
        let account = RunAs::resolve(&user.name, &group.name).expect("resolve nobody");

        // SAFETY: the child only changes its own credentials and exits.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                let entered = setgroups(&[account.gid(), Gid::from_raw(0)]).is_ok()
                    && drop_privileges(&account).is_ok()
                    && getuid() == account.uid()
                    && getgroups().is_ok_and(|groups| groups == vec![account.gid()]);
                std::process::exit(i32::from(!entered));
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).expect("reap child");
                assert_eq!(status, WaitStatus::Exited(child, 0));
            }
        }
    }
}
