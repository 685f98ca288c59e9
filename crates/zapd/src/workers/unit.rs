//! The loop run by every worker unit.

use std::any::Any;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::unistd::{Pid, getppid};
use tracing::{debug, warn};

use super::{ConnectionError, RequestHandler, WORKER_TARGET};
use crate::handoff::{ConnectionHandle, HandoffQueue};

const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Identity and cancellation state of one worker unit.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    id: usize,
    poll_interval: Duration,
    shutdown_requested: Arc<AtomicBool>,
}

impl WorkerRecord {
    /// Builds a record with its own shutdown flag.
    #[must_use]
    pub fn new(id: usize, poll_interval: Duration) -> Self {
        Self::with_flag(id, poll_interval, Arc::new(AtomicBool::new(false)))
    }

    /// Builds a record around an existing shutdown flag.
    #[must_use]
    pub const fn with_flag(
        id: usize,
        poll_interval: Duration,
        shutdown_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            poll_interval,
            shutdown_requested,
        }
    }

    /// Unit identifier, unique within a pool.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Pause between polls of an empty queue.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Asks the unit to exit the next time it finds the queue empty.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_requested)
    }
}

/// Per-unit counters.
#[derive(Debug, Default)]
pub struct WorkerStats {
    served: AtomicU64,
    failed: AtomicU64,
    polls: AtomicU64,
}

impl WorkerStats {
    /// Connections handled to completion.
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Connections or dequeues that ended in an error.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Times the unit polled the queue.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

/// How a unit reads each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSettings {
    /// Maximum bytes read from a connection.
    pub read_bytes: usize,
    /// Read timeout; zero means block until data or end-of-stream.
    pub read_timeout: Duration,
}

/// Result of a single poll of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A connection was received and served.
    Served,
    /// A connection was received but serving it failed.
    Failed,
    /// The queue was empty.
    Idle,
    /// Dequeuing failed.
    QueueFault,
}

/// One worker unit's loop and collaborators.
pub struct Worker {
    record: WorkerRecord,
    queue: Arc<HandoffQueue>,
    handler: Arc<dyn RequestHandler>,
    settings: ServeSettings,
    stats: Arc<WorkerStats>,
    parent: Option<Pid>,
}

impl Worker {
    /// Assembles a unit.
    #[must_use]
    pub fn new(
        record: WorkerRecord,
        queue: Arc<HandoffQueue>,
        handler: Arc<dyn RequestHandler>,
        settings: ServeSettings,
    ) -> Self {
        Self {
            record,
            queue,
            handler,
            settings,
            stats: Arc::new(WorkerStats::default()),
            parent: None,
        }
    }

    /// Makes the unit stop once `parent` is no longer its parent process.
    ///
    /// Checked whenever the queue is found empty and between pause slices.
    #[must_use]
    pub const fn watching_parent(mut self, parent: Pid) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Requests shutdown if the watched parent has exited.
    ///
    /// Returns whether shutdown is now requested.
    pub fn check_parent(&self) -> bool {
        if let Some(parent) = self.parent
            && getppid() != parent
            && !self.record.shutdown_requested()
        {
            warn!(
                target: WORKER_TARGET,
                worker = self.record.id,
                parent = parent.as_raw(),
                "supervisor exited; stopping worker"
            );
            self.record.request_shutdown();
        }
        self.record.shutdown_requested()
    }

    /// The unit's record.
    #[must_use]
    pub const fn record(&self) -> &WorkerRecord {
        &self.record
    }

    /// Shared view of the unit's counters.
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until shutdown is requested and the queue is found empty.
    pub fn run(&self) {
        debug!(target: WORKER_TARGET, worker = self.record.id, "worker started");
        loop {
            match self.poll_once() {
                PollOutcome::Served | PollOutcome::Failed => {}
                PollOutcome::Idle | PollOutcome::QueueFault => {
                    if self.check_parent() {
                        break;
                    }
                    self.pause();
                }
            }
        }
        debug!(
            target: WORKER_TARGET,
            worker = self.record.id,
            served = self.stats.served(),
            failed = self.stats.failed(),
            polls = self.stats.polls(),
            "worker stopped"
        );
    }

    /// Polls the queue once and serves at most one connection.
    pub fn poll_once(&self) -> PollOutcome {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);
        match self.queue.try_pop() {
            Ok(Some(handle)) => self.serve_logged(handle),
            Ok(None) => PollOutcome::Idle,
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: WORKER_TARGET,
                    worker = self.record.id,
                    error = %error,
                    "failed to receive connection"
                );
                PollOutcome::QueueFault
            }
        }
    }

    fn serve_logged(&self, handle: ConnectionHandle) -> PollOutcome {
        let peer = handle.peer().unwrap_or("-").to_owned();
        match self.serve(handle) {
            Ok(()) => {
                self.stats.served.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: WORKER_TARGET,
                    worker = self.record.id,
                    peer,
                    "connection served"
                );
                PollOutcome::Served
            }
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: WORKER_TARGET,
                    worker = self.record.id,
                    peer,
                    error = %error,
                    "connection failed"
                );
                PollOutcome::Failed
            }
        }
    }

    fn serve(&self, handle: ConnectionHandle) -> Result<(), ConnectionError> {
        let mut stream = handle.into_stream();
        let timeout = Some(self.settings.read_timeout).filter(|timeout| !timeout.is_zero());
        stream
            .set_read_timeout(timeout)
            .map_err(|source| ConnectionError::Configure { source })?;

        let mut request = vec![0_u8; self.settings.read_bytes];
        let read = stream
            .read(&mut request)
            .map_err(|source| ConnectionError::Read { source })?;
        request.truncate(read);
        if request.is_empty() {
            debug!(
                target: WORKER_TARGET,
                worker = self.record.id,
                "peer closed before sending a request"
            );
            return Ok(());
        }

        let handler = Arc::clone(&self.handler);
        let response = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&request)))
            .map_err(|payload| ConnectionError::Panicked {
                message: panic_message(payload.as_ref()),
            })??;

        if let Some(reply) = response {
            stream
                .write_all(&reply)
                .and_then(|()| stream.flush())
                .map_err(|source| ConnectionError::Write { source })?;
        }
        Ok(())
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.record.poll_interval;
        while !self.check_parent() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
