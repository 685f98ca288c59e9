//! Front-end listener: accepts connections and pushes them onto the handoff
//! queue.
//!
//! The accept loop blocks in `accept(2)` on a dedicated thread. Shutdown sets a
//! flag and calls `shutdown(2)` on the passive socket, which on Linux makes the
//! blocked `accept` return immediately.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{Shutdown, shutdown};
use tracing::{debug, info, warn};
use zap_config::SocketEndpoint;

use super::{BindError, LISTENER_TARGET, ListenerError};
use crate::handoff::{ConnectionHandle, HandoffQueue, PushError};

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Passive socket bound to the configured endpoint.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
    socket_path: Option<PathBuf>,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds the passive socket described by `endpoint`.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, BindError> {
        let (listener, socket_path) = match endpoint {
            SocketEndpoint::Tcp { host, port } => (ListenerKind::Tcp(bind_tcp(host, *port)?), None),
            SocketEndpoint::Unix { path } => {
                endpoint
                    .prepare_filesystem()
                    .map_err(|source| BindError::Prepare { source })?;
                let unix = bind_unix(path.as_std_path())?;
                // Pinned before start-up changes directory so cleanup finds it.
                let socket_path = std::path::absolute(path.as_std_path())
                    .unwrap_or_else(|_| path.as_std_path().to_path_buf());
                (ListenerKind::Unix(unix), Some(socket_path))
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            socket_path,
        })
    }

    /// Bound TCP address; `None` for Unix endpoints.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            ListenerKind::Unix(_) => None,
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.as_fd().as_raw_fd()
    }

    /// Starts the accept loop on its own thread.
    ///
    /// `on_fatal` runs on the listener thread if the loop ends because of an
    /// unrecoverable accept error. It is not called for a requested shutdown.
    pub fn start<F>(
        self,
        queue: Arc<HandoffQueue>,
        on_fatal: F,
    ) -> Result<ListenerHandle, ListenerError>
    where
        F: FnOnce(&ListenerError) + Send + 'static,
    {
        let listener = Arc::new(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ListenerStats::default());

        let worker = AcceptLoop {
            listener: Arc::clone(&listener),
            queue,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let handle = thread::Builder::new()
            .name("zapd-listener".to_owned())
            .spawn(move || {
                let result = worker.run();
                if let Err(error) = &result {
                    on_fatal(error);
                }
                result
            })
            .map_err(|source| ListenerError::Spawn { source })?;

        Ok(ListenerHandle {
            listener,
            shutdown,
            stats,
            handle: Some(handle),
        })
    }
}

impl AsFd for SocketListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.as_fd(),
            ListenerKind::Unix(listener) => listener.as_fd(),
        }
    }
}

/// Running totals kept by the accept loop.
#[derive(Debug, Default)]
pub struct ListenerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl ListenerStats {
    /// Connections accepted and handed to the queue.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections closed because the queue would not take them.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub struct ListenerHandle {
    listener: Arc<SocketListener>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
    handle: Option<thread::JoinHandle<Result<(), ListenerError>>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop and wakes it if blocked.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        wake(&self.listener);
    }

    /// Accept loop counters.
    #[must_use]
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Waits for the accept thread and returns the loop's outcome.
    pub fn join(mut self) -> Result<(), ListenerError> {
        self.handle.take().map_or(Ok(()), |handle| {
            handle.join().unwrap_or(Err(ListenerError::ThreadPanic))
        })
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            wake(&self.listener);
        }
    }
}

fn wake(listener: &SocketListener) {
    match shutdown(listener.raw_fd(), Shutdown::Both) {
        Ok(()) | Err(Errno::ENOTCONN) => {}
        Err(error) => debug!(
            target: LISTENER_TARGET,
            error = %error,
            "failed to wake listener"
        ),
    }
}

struct AcceptLoop {
    listener: Arc<SocketListener>,
    queue: Arc<HandoffQueue>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
}

impl AcceptLoop {
    fn run(self) -> Result<(), ListenerError> {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "socket listener active"
        );
        let result = self.accept_until_shutdown();
        if let Some(path) = &self.listener.socket_path {
            cleanup_unix_socket(path);
        }
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "socket listener stopped"
        );
        result
    }

    fn accept_until_shutdown(&self) -> Result<(), ListenerError> {
        let mut last_error = None::<Errno>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match accept_connection(&self.listener) {
                Ok(handle) => {
                    last_error = None;
                    self.enqueue(handle);
                }
                Err(_) if self.shutdown.load(Ordering::SeqCst) => break,
                Err(error) => {
                    let errno = error.raw_os_error().map_or(Errno::UnknownErrno, Errno::from_raw);
                    if is_fatal(errno) {
                        return Err(ListenerError::Accept {
                            endpoint: self.listener.endpoint.to_string(),
                            source: errno,
                        });
                    }
                    if last_error != Some(errno) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(errno);
                    if errno != Errno::EINTR {
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
            }
        }
        Ok(())
    }

    fn enqueue(&self, handle: ConnectionHandle) {
        match self.queue.push(handle) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(PushError::Full { handle }) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: LISTENER_TARGET,
                    peer = handle.peer().unwrap_or("-"),
                    "handoff queue full; closing connection"
                );
            }
            Err(error) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: LISTENER_TARGET,
                    error = %error,
                    "failed to hand off connection; closing it"
                );
                drop(error.into_handle());
            }
        }
    }
}

fn accept_connection(listener: &SocketListener) -> io::Result<ConnectionHandle> {
    match &listener.listener {
        ListenerKind::Tcp(tcp) => {
            let (stream, peer) = tcp.accept()?;
            Ok(ConnectionHandle::from_tcp(stream, peer))
        }
        ListenerKind::Unix(unix) => {
            let (stream, _) = unix.accept()?;
            Ok(ConnectionHandle::from_unix(stream))
        }
    }
}

/// Accept errors that mean the passive socket itself is unusable.
const fn is_fatal(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EBADF | Errno::EINVAL | Errno::ENOTSOCK | Errno::EOPNOTSUPP | Errno::EFAULT
    )
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, BindError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| BindError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| BindError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| BindError::BindTcp { addr, source })
}

fn bind_unix(path: &Path) -> Result<UnixListener, BindError> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| BindError::UnixMetadata {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(BindError::UnixNotSocket {
                path: path.display().to_string(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(BindError::UnixInUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| BindError::UnixCleanup {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(BindError::UnixConnect {
                    path: path.display().to_string(),
                    source,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| BindError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

fn cleanup_unix_socket(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path.display(),
            "failed to remove unix socket file"
        );
    }
}
