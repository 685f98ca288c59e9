//! Tuning knobs for the handoff queue and worker pool.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Behaviour of the listener when the handoff queue is full.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueuePolicy {
    /// Close the new connection immediately so the accept loop never stalls.
    #[default]
    Reject,
    /// Wait up to the queue timeout for room, then close the connection.
    Block,
}

/// How worker units are isolated from the listener and from each other.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerIsolation {
    /// Each worker is a forked child process.
    #[default]
    Process,
    /// Each worker is a thread inside the supervisor process.
    Thread,
}
