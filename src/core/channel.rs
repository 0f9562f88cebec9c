//! Blocking request/response channel to the kernel module
//!
//! [`KernelChannel`] owns one raw netlink socket bound to this process and a
//! multicast group, with a fixed receive timeout. Each [`Exchange::exchange`]
//! call sends one datagram and blocks for one reply. There is no queuing,
//! pipelining or retry; retry policy belongs to the caller.
//!
//! If the socket cannot be created at startup the channel stays degraded for
//! its whole lifetime and every exchange fails with
//! [`TransportError::NotInitialized`] without touching the network.

use nix::errno::Errno;
use nix::sys::socket::{MsgFlags, NetlinkAddr, bind, recv, send, setsockopt, sockopt};
use nix::sys::time::{TimeVal, TimeValLike};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::error::TransportError;

/// Netlink protocol family registered by the filter module
pub const DEFAULT_NETLINK_FAMILY: i32 = 25;

/// Receive timeout used when none is configured
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(3500);

/// Largest reply accepted; a full rule table fits comfortably
pub const DEFAULT_RECEIVE_BUFFER: usize = 1024 * 1024;

/// One blocking request/response round trip.
///
/// Implemented by [`KernelChannel`] and by scripted peers in tests.
pub trait Exchange {
    /// Sends `request` and waits for exactly one response.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the channel is degraded, the send or
    /// receive fails, or no reply arrives before the timeout.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Socket parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub family: i32,
    pub multicast_group: u32,
    pub receive_timeout: Duration,
    pub receive_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            family: DEFAULT_NETLINK_FAMILY,
            multicast_group: 0,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            receive_buffer: DEFAULT_RECEIVE_BUFFER,
        }
    }
}

#[derive(Debug)]
enum SocketState {
    Ready(OwnedFd),
    Degraded(String),
}

#[derive(Debug)]
pub struct KernelChannel {
    state: SocketState,
    config: ChannelConfig,
    local_id: u32,
    /// A reply may still arrive for a request that timed out
    stale: bool,
}

impl KernelChannel {
    /// Creates and binds the netlink socket.
    ///
    /// Never fails: a construction error is logged and leaves the channel
    /// degraded.
    pub fn open(config: ChannelConfig) -> Self {
        let local_id = nix::unistd::getpid().as_raw().unsigned_abs();

        let state = match open_netlink_socket(&config, local_id) {
            Ok(fd) => {
                info!(
                    family = config.family,
                    group = config.multicast_group,
                    "Netlink socket initialized"
                );
                SocketState::Ready(fd)
            }
            Err(e) => {
                error!(
                    family = config.family,
                    "Failed to initialize netlink socket: {}", e
                );
                SocketState::Degraded(e.desc().to_string())
            }
        };

        Self {
            state,
            config,
            local_id,
            stale: false,
        }
    }

    /// Wraps an already connected datagram socket.
    ///
    /// The receive timeout from `config` is applied; family and group are
    /// ignored. Used to run the channel over a local socket pair.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the receive timeout cannot be set.
    pub fn from_fd(fd: OwnedFd, config: ChannelConfig, local_id: u32) -> nix::Result<Self> {
        set_receive_timeout(&fd, config.receive_timeout)?;
        Ok(Self {
            state: SocketState::Ready(fd),
            config,
            local_id,
            stale: false,
        })
    }

    /// Identity the socket is bound to; also sent as the header sender id
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SocketState::Ready(_))
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.receive_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Exchange for KernelChannel {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let timeout_ms = self.timeout_ms();
        let fd = match &self.state {
            SocketState::Ready(fd) => fd,
            SocketState::Degraded(reason) => {
                return Err(TransportError::NotInitialized(reason.clone()));
            }
        };

        let mut buf = vec![0u8; self.config.receive_buffer.max(1)];

        if self.stale {
            let dropped = drain_pending(fd, &mut buf);
            if dropped > 0 {
                warn!(
                    "Discarded {} late response(s) from an earlier request",
                    dropped
                );
            }
            self.stale = false;
        }

        send(fd.as_raw_fd(), request, MsgFlags::empty()).map_err(|e| io_failure("send", e))?;
        debug!(bytes = request.len(), "Sent request to kernel module");

        // MSG_TRUNC makes recv report the full datagram length
        match recv(fd.as_raw_fd(), &mut buf, MsgFlags::MSG_TRUNC) {
            Ok(n) if n > buf.len() => {
                error!(
                    limit = buf.len(),
                    actual = n,
                    "Kernel response exceeds receive buffer"
                );
                Err(TransportError::ResponseTooLarge {
                    limit: buf.len(),
                    actual: n,
                })
            }
            Ok(n) => {
                buf.truncate(n);
                debug!(bytes = n, "Received response from kernel module");
                Ok(buf)
            }
            Err(e) if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => {
                self.stale = true;
                warn!(
                    "Timeout waiting for kernel response after {} ms",
                    timeout_ms
                );
                Err(TransportError::Timeout { timeout_ms })
            }
            Err(e) => Err(io_failure("recv", e)),
        }
    }
}

fn open_netlink_socket(config: &ChannelConfig, local_id: u32) -> nix::Result<OwnedFd> {
    use nix::libc;

    // nix's SockProtocol has no variant for module-registered families
    // SAFETY: plain socket(2) call with constant arguments, no pointers involved
    let raw = Errno::result(unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            config.family,
        )
    })?;
    // SAFETY: `raw` was just returned by socket(2) and is owned by nothing else
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    bind(
        fd.as_raw_fd(),
        &NetlinkAddr::new(local_id, config.multicast_group),
    )?;
    set_receive_timeout(&fd, config.receive_timeout)?;
    Ok(fd)
}

/// Applies SO_RCVTIMEO with microsecond precision.
///
/// A zero timeval disables the timeout, so the value never goes below 1 µs.
fn set_receive_timeout(fd: &OwnedFd, timeout: Duration) -> nix::Result<()> {
    let micros = i64::try_from(timeout.as_micros())
        .unwrap_or(i64::MAX)
        .max(1);
    setsockopt(fd, sockopt::ReceiveTimeout, &TimeVal::microseconds(micros))
}

/// Reads and drops every datagram already queued on the socket.
fn drain_pending(fd: &OwnedFd, buf: &mut [u8]) -> usize {
    let mut dropped = 0;
    while recv(fd.as_raw_fd(), buf, MsgFlags::MSG_DONTWAIT).is_ok() {
        dropped += 1;
    }
    dropped
}

fn io_failure(op: &'static str, errno: Errno) -> TransportError {
    error!("Socket {} failed: {}", op, errno);
    TransportError::IoFailure {
        op,
        errno: Some(errno as i32),
        message: errno.desc().to_string(),
    }
}
