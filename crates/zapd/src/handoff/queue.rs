//! Kernel-backed FIFO moving connection descriptors between processes.
//!
//! The queue is a `SOCK_SEQPACKET` Unix socket pair. Each record carries one
//! descriptor as `SCM_RIGHTS` ancillary data and a small JSON frame. The
//! kernel hands every record to exactly one reader, so the pair can be shared
//! by any number of worker threads or forked worker processes without extra
//! locking.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockProtocol,
    SockType, recvmsg, sendmsg, setsockopt, socketpair, sockopt,
};
use nix::sys::time::{TimeVal, TimeValLike};
use tracing::debug;
use zap_config::{Config, QueuePolicy};

use super::handle::HandoffFrame;
use super::{ConnectionHandle, HANDOFF_TARGET, HandoffError, PushError};

const FRAME_CAPACITY: usize = 512;
const MIN_SEND_TIMEOUT: Duration = Duration::from_millis(1);

/// Construction options for [`HandoffQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    policy: QueuePolicy,
    send_timeout: Duration,
    buffer_bytes: Option<usize>,
}

impl QueueOptions {
    /// Builds options for the given backpressure policy.
    #[must_use]
    pub const fn new(policy: QueuePolicy, send_timeout: Duration) -> Self {
        Self {
            policy,
            send_timeout,
            buffer_bytes: None,
        }
    }

    /// Derives options from the daemon configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            policy: config.queue_policy(),
            send_timeout: config.queue_timeout(),
            buffer_bytes: config.queue_buffer_bytes(),
        }
    }

    /// Overrides the kernel send buffer size.
    #[must_use]
    pub const fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = Some(bytes);
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new(QueuePolicy::Reject, Duration::from_millis(250))
    }
}

/// Cross-process FIFO of [`ConnectionHandle`]s.
#[derive(Debug)]
pub struct HandoffQueue {
    sender: OwnedFd,
    receiver: OwnedFd,
    policy: QueuePolicy,
}

impl HandoffQueue {
    /// Creates the socket pair backing the queue.
    pub fn new(options: QueueOptions) -> Result<Self, HandoffError> {
        let (sender, receiver) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None::<SockProtocol>,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|source| HandoffError::Create { source })?;

        if let Some(bytes) = options.buffer_bytes {
            setsockopt(&sender, sockopt::SndBuf, &bytes).map_err(|source| {
                HandoffError::Configure {
                    option: "SO_SNDBUF",
                    source,
                }
            })?;
        }
        if options.policy == QueuePolicy::Block {
            let timeout = options.send_timeout.max(MIN_SEND_TIMEOUT);
            let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            setsockopt(&sender, sockopt::SendTimeout, &TimeVal::milliseconds(millis)).map_err(
                |source| HandoffError::Configure {
                    option: "SO_SNDTIMEO",
                    source,
                },
            )?;
        }

        Ok(Self {
            sender,
            receiver,
            policy: options.policy,
        })
    }

    /// Backpressure policy applied by [`HandoffQueue::push`].
    #[must_use]
    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Appends a connection to the tail of the queue.
    ///
    /// On success the caller's descriptor is closed; the kernel holds the only
    /// remaining reference until a worker receives it. On failure the handle is
    /// returned inside the error, still open.
    pub fn push(&self, handle: ConnectionHandle) -> Result<(), PushError> {
        let frame = match serde_json::to_vec(&handle.frame()) {
            Ok(frame) => frame,
            Err(source) => return Err(PushError::Encode { source, handle }),
        };
        let fds = [handle.raw_fd()];
        let control = [ControlMessage::ScmRights(&fds)];
        let iov = [IoSlice::new(&frame)];
        let flags = match self.policy {
            QueuePolicy::Reject => MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL,
            QueuePolicy::Block => MsgFlags::MSG_NOSIGNAL,
        };

        loop {
            match sendmsg::<()>(self.sender.as_raw_fd(), &iov, &control, flags, None) {
                Ok(_) => {
                    debug!(
                        target: HANDOFF_TARGET,
                        peer = handle.peer().unwrap_or("-"),
                        "connection enqueued"
                    );
                    drop(handle);
                    return Ok(());
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN | Errno::ENOBUFS) => return Err(PushError::Full { handle }),
                Err(source) => return Err(PushError::Transfer { source, handle }),
            }
        }
    }

    /// Removes the connection at the head of the queue without blocking.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub fn try_pop(&self) -> Result<Option<ConnectionHandle>, HandoffError> {
        let mut frame = [0_u8; FRAME_CAPACITY];
        let record = loop {
            match self.receive(&mut frame) {
                Ok(record) => break record,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(None),
                Err(source) => return Err(HandoffError::Receive { source }),
            }
        };

        let Record {
            bytes,
            flags,
            mut fds,
        } = record;
        if bytes == 0 && fds.is_empty() {
            return Err(HandoffError::Closed);
        }
        if flags.intersects(MsgFlags::MSG_CTRUNC | MsgFlags::MSG_TRUNC) {
            return Err(HandoffError::Truncated);
        }
        if fds.len() != 1 {
            return Err(HandoffError::DescriptorCount { count: fds.len() });
        }
        let Some(fd) = fds.pop() else {
            return Err(HandoffError::DescriptorCount { count: 0 });
        };
        let payload = frame.get(..bytes).ok_or(HandoffError::Truncated)?;
        let decoded: HandoffFrame =
            serde_json::from_slice(payload).map_err(|source| HandoffError::Frame { source })?;
        Ok(Some(ConnectionHandle::from_parts(fd, decoded)))
    }

    fn receive(&self, frame: &mut [u8]) -> Result<Record, Errno> {
        let mut iov = [IoSliceMut::new(frame)];
        let mut control = nix::cmsg_space!([RawFd; 1]);
        let message = recvmsg::<()>(
            self.receiver.as_raw_fd(),
            &mut iov,
            Some(&mut control),
            receive_flags(),
        )?;

        let mut fds = Vec::new();
        for cmsg in message.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: descriptors delivered through SCM_RIGHTS are freshly
                // installed in this process and owned by nothing else yet.
                fds.extend(
                    received
                        .into_iter()
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                );
            }
        }
        Ok(Record {
            bytes: message.bytes,
            flags: message.flags,
            fds,
        })
    }
}

struct Record {
    bytes: usize,
    flags: MsgFlags,
    fds: Vec<OwnedFd>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn receive_flags() -> MsgFlags {
    MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn receive_flags() -> MsgFlags {
    MsgFlags::MSG_DONTWAIT
}
