//! Signal delivery and liveness probing for `stop`.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Signals used by the termination schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful request (`SIGTERM`).
    Terminate,
    /// Forced termination (`SIGKILL`).
    Kill,
}

impl StopSignal {
    /// The corresponding OS signal.
    #[must_use]
    pub const fn signal(self) -> Signal {
        match self {
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.signal().as_str())
    }
}

/// Sends signals to, and probes, a process identified by PID.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSignaller: Send + Sync {
    /// Delivers `signal` to `pid`. `Errno::ESRCH` means the process is gone.
    fn send(&self, pid: u32, signal: StopSignal) -> Result<(), Errno>;

    /// Whether `pid` names a live process.
    fn is_alive(&self, pid: u32) -> Result<bool, Errno>;
}

/// Signaller backed by `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaller;

impl ProcessSignaller for SystemSignaller {
    fn send(&self, pid: u32, signal: StopSignal) -> Result<(), Errno> {
        kill(to_pid(pid)?, signal.signal())
    }

    fn is_alive(&self, pid: u32) -> Result<bool, Errno> {
        match kill(to_pid(pid)?, None) {
            Ok(()) | Err(Errno::EPERM) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(errno),
        }
    }
}

fn to_pid(pid: u32) -> Result<Pid, Errno> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
        .ok_or(Errno::EINVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert_eq!(SystemSignaller.is_alive(std::process::id()), Ok(true));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn child");
        let pid = child.id();
        child.wait().expect("reap child");
        assert_eq!(SystemSignaller.is_alive(pid), Ok(false));
    }

    #[test]
    fn zero_pid_is_refused() {
        assert_eq!(SystemSignaller.is_alive(0), Err(Errno::EINVAL));
        assert_eq!(SystemSignaller.send(0, StopSignal::Terminate), Err(Errno::EINVAL));
    }

    #[test]
    fn signals_render_by_name() {
        assert_eq!(StopSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(StopSignal::Kill.to_string(), "SIGKILL");
    }
}
