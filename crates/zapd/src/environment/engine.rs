//! Default engine: records what it is given and logs requests.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::{ENVIRONMENT_TARGET, EnvironmentError, Executable, FactSource, Loadable, Source};

/// Entry point invoked for every request handed to a worker.
pub const HANDLE_REQUEST: &str = "handle-request";

/// Engine that keeps a record of loaded sources and answers nothing.
///
/// Requests are logged and the connection is closed without a reply.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    loaded: Vec<String>,
    facts: usize,
    requests: AtomicU64,
}

impl RecordingEngine {
    /// Creates an engine with nothing loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptions of every source loaded so far, in load order.
    #[must_use]
    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    /// Facts accepted so far.
    #[must_use]
    pub const fn facts(&self) -> usize {
        self.facts
    }

    /// Requests executed by this copy of the engine.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Loadable for RecordingEngine {
    fn load(&mut self, source: &Source) -> Result<(), EnvironmentError> {
        let bytes = source.read()?;
        info!(
            target: ENVIRONMENT_TARGET,
            source = %source,
            bytes = bytes.len(),
            "source loaded"
        );
        self.loaded.push(source.to_string());
        Ok(())
    }
}

impl FactSource for RecordingEngine {
    fn load_facts(&mut self, source: &Source) -> Result<usize, EnvironmentError> {
        let bytes = source.read()?;
        let count = String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        self.facts += count;
        info!(
            target: ENVIRONMENT_TARGET,
            source = %source,
            facts = count,
            "facts loaded"
        );
        Ok(count)
    }
}

impl Executable for RecordingEngine {
    fn execute(&self, entry: &str, input: &[u8]) -> Result<Option<Vec<u8>>, EnvironmentError> {
        if entry != HANDLE_REQUEST {
            return Err(EnvironmentError::UnknownEntryPoint {
                name: entry.to_owned(),
            });
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        info!(
            target: ENVIRONMENT_TARGET,
            bytes = input.len(),
            "request received"
        );
        debug!(
            target: ENVIRONMENT_TARGET,
            request = %String::from_utf8_lossy(input),
            "request body"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn inline_facts_count_non_blank_lines() {
        let mut engine = RecordingEngine::new();
        let loaded = engine
            .load_facts(&Source::Inline(b"(host a)\n\n(host b)\n".to_vec()))
            .expect("facts");
        assert_eq!(loaded, 2);
        assert_eq!(engine.facts(), 2);
    }

    #[rstest]
    fn load_records_source_description() {
        let mut engine = RecordingEngine::new();
        engine
            .load(&Source::Inline(b"(defrule r => )".to_vec()))
            .expect("load");
        assert_eq!(engine.loaded(), ["inline:15 bytes"]);
    }

    #[rstest]
    fn request_entry_produces_no_reply() {
        let engine = RecordingEngine::new();
        let reply = engine.execute(HANDLE_REQUEST, b"ping").expect("execute");
        assert!(reply.is_none());
        assert_eq!(engine.requests(), 1);
    }

    #[rstest]
    fn unknown_entry_is_an_error() {
        let engine = RecordingEngine::new();
        let error = engine.execute("main", b"").expect_err("unknown entry");
        assert!(matches!(
            error,
            EnvironmentError::UnknownEntryPoint { ref name } if name == "main"
        ));
    }
}
