//! TCP utilities for the blocking socket boundary.
//!
//! Generic socket tuning that is protocol-agnostic. Uses `socket2::SockRef`
//! so the options are applied to the existing descriptor without taking
//! ownership of it.

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Enable TCP_NODELAY for minimal latency.
///
/// Disables Nagle's algorithm. Request/reply protocols send many small
/// method frames, which Nagle would otherwise hold back.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_nodelay(true)
}

/// Enable TCP keepalive probes after `idle` of silence.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
pub fn configure_tcp_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Connect a blocking TCP stream and apply the requested tuning.
///
/// # Errors
///
/// Returns the connect error of the last address tried, or a socket option error.
pub fn connect(
    addr: impl ToSocketAddrs,
    nodelay: bool,
    keepalive: Option<Duration>,
) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    if nodelay {
        enable_tcp_nodelay(&stream)?;
    }
    if let Some(idle) = keepalive {
        configure_tcp_keepalive(&stream, idle)?;
    }
    debug!(peer = ?stream.peer_addr().ok(), nodelay, ?keepalive, "tcp connected");
    Ok(stream)
}
