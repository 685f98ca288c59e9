//! The escalating termination schedule used by `stop`.

use std::time::Duration;

use super::signaller::StopSignal;

/// One stage of the schedule: send `signal` up to `attempts` times, waiting
/// `interval` after each before checking liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationStep {
    /// Signal sent in this stage.
    pub signal: StopSignal,
    /// Maximum signals sent in this stage.
    pub attempts: u32,
    /// Wait after each signal.
    pub interval: Duration,
}

/// Ordered termination stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSchedule {
    steps: Vec<EscalationStep>,
}

impl StopSchedule {
    /// Builds a schedule from explicit stages.
    #[must_use]
    pub const fn new(steps: Vec<EscalationStep>) -> Self {
        Self { steps }
    }

    /// The standard graceful-then-forced schedule with intervals replaced.
    #[must_use]
    pub fn with_intervals(graceful: Duration, forced: Duration) -> Self {
        Self::new(vec![
            EscalationStep {
                signal: StopSignal::Terminate,
                attempts: 10,
                interval: graceful,
            },
            EscalationStep {
                signal: StopSignal::Kill,
                attempts: 10,
                interval: forced,
            },
        ])
    }

    /// Stages in order.
    #[must_use]
    pub fn steps(&self) -> &[EscalationStep] {
        &self.steps
    }

    /// Total signals the schedule may send.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|step| step.attempts).sum()
    }

    /// Every signal in sending order, paired with the wait that follows it.
    pub fn attempts(&self) -> impl Iterator<Item = (StopSignal, Duration)> + '_ {
        self.steps.iter().flat_map(|step| {
            (0..step.attempts).map(move |_| (step.signal, step.interval))
        })
    }
}

impl Default for StopSchedule {
    /// `SIGTERM` every second ten times, then `SIGKILL` every five seconds ten
    /// times.
    fn default() -> Self {
        Self::with_intervals(Duration::from_secs(1), Duration::from_secs(5))
    }
}
