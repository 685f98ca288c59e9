use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use serde::{Deserialize, Serialize};

use crate::transport::{ConnectionStream, Transport};

/// Exclusive ownership of one accepted connection's descriptor.
///
/// A handle is created by the listener, moved into the handoff queue, and
/// rebuilt by exactly one worker. Dropping it closes the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    fd: OwnedFd,
    transport: Transport,
    peer: Option<String>,
}

impl ConnectionHandle {
    /// Wraps an accepted TCP connection.
    #[must_use]
    pub fn from_tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            fd: OwnedFd::from(stream),
            transport: Transport::Tcp,
            peer: Some(peer.to_string()),
        }
    }

    /// Wraps an accepted Unix domain connection.
    #[must_use]
    pub fn from_unix(stream: UnixStream) -> Self {
        let peer = stream
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|path| path.display().to_string()));
        Self {
            fd: OwnedFd::from(stream),
            transport: Transport::Unix,
            peer,
        }
    }

    pub(crate) fn from_parts(fd: OwnedFd, frame: HandoffFrame) -> Self {
        Self {
            fd,
            transport: frame.transport,
            peer: frame.peer,
        }
    }

    /// Socket family of the connection.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Remote address recorded at accept time, when known.
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Rebuilds a usable stream, consuming the handle.
    #[must_use]
    pub fn into_stream(self) -> ConnectionStream {
        ConnectionStream::from_fd(self.transport, self.fd)
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub(crate) fn frame(&self) -> HandoffFrame {
        HandoffFrame {
            transport: self.transport,
            peer: self.peer.clone(),
        }
    }
}

/// Metadata that travels alongside a transferred descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HandoffFrame {
    pub(crate) transport: Transport,
    pub(crate) peer: Option<String>,
}
