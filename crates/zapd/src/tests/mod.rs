//! Cross-component behaviour suites for the daemon.

mod cli_behaviour;
mod pipeline_behaviour;
mod support;
