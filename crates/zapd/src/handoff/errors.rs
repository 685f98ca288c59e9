//! Error types for the handoff queue.

use nix::errno::Errno;
use thiserror::Error;

use super::ConnectionHandle;

/// Errors raised while creating or draining the handoff queue.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// The socket pair backing the queue could not be created.
    #[error("failed to create handoff socket pair: {source}")]
    Create {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A socket option could not be applied.
    #[error("failed to set {option} on handoff socket: {source}")]
    Configure {
        /// Name of the option being applied.
        option: &'static str,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Receiving a record failed.
    #[error("failed to receive from handoff queue: {source}")]
    Receive {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Control data or the frame did not fit the receive buffers.
    #[error("handoff record was truncated")]
    Truncated,
    /// A record carried no descriptor, or more than one.
    #[error("handoff record carried {count} descriptors; expected exactly one")]
    DescriptorCount {
        /// Number of descriptors received.
        count: usize,
    },
    /// The frame accompanying a descriptor could not be decoded.
    #[error("failed to decode handoff frame: {source}")]
    Frame {
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// Every sending end of the queue has been closed.
    #[error("handoff queue closed")]
    Closed,
}

/// A handle that could not be enqueued.
///
/// The rejected handle is returned so the caller decides how to close it.
#[derive(Debug, Error)]
pub enum PushError {
    /// The queue had no room within the configured policy.
    #[error("handoff queue is full")]
    Full {
        /// Connection that was not enqueued.
        handle: ConnectionHandle,
    },
    /// Sending the descriptor failed.
    #[error("failed to transfer connection descriptor: {source}")]
    Transfer {
        /// Underlying OS error.
        #[source]
        source: Errno,
        /// Connection that was not enqueued.
        handle: ConnectionHandle,
    },
    /// The frame could not be encoded.
    #[error("failed to encode handoff frame: {source}")]
    Encode {
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
        /// Connection that was not enqueued.
        handle: ConnectionHandle,
    },
}

impl PushError {
    /// Recovers the rejected connection.
    #[must_use]
    pub fn into_handle(self) -> ConnectionHandle {
        match self {
            Self::Full { handle } | Self::Transfer { handle, .. } | Self::Encode { handle, .. } => {
                handle
            }
        }
    }
}
